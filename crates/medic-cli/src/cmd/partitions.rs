use std::path::Path;

use anyhow::bail;
use clap::Subcommand;
use medic_core::partition::TableTick;

use crate::controller::{load, load_checked, open_store, Controller};
use crate::output::{print_json, print_table, short_time};

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum PartitionsSubcommand {
    /// Run one PartitionManager tick over every configured table
    Tick,

    /// List partition descriptors from the audit store
    List {
        /// Only this table
        #[arg(long)]
        table: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(config_path: &Path, subcmd: PartitionsSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        PartitionsSubcommand::Tick => tick(config_path, json),
        PartitionsSubcommand::List { table } => list(config_path, table.as_deref(), json),
    }
}

// ---------------------------------------------------------------------------
// tick
// ---------------------------------------------------------------------------

fn tick(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let cfg = load_checked(config_path)?;
    let rt = tokio::runtime::Runtime::new()?;
    let ticks = rt.block_on(async move {
        let controller = Controller::assemble(&cfg)?;
        Ok::<_, anyhow::Error>(match controller.partitions {
            Some(manager) => Some(manager.tick().await),
            None => None,
        })
    })?;

    let Some(ticks) = ticks else {
        if json {
            print_json(&Vec::<TableTick>::new())?;
        } else {
            println!("No partitioned tables configured.");
        }
        return Ok(());
    };

    if json {
        print_json(&ticks)?;
    } else {
        print_ticks(&ticks);
    }

    let failed: Vec<&str> = ticks
        .iter()
        .filter(|t| t.error.is_some())
        .map(|t| t.table.as_str())
        .collect();
    if !failed.is_empty() {
        bail!("partition tick failed for: {}", failed.join(", "));
    }
    Ok(())
}

fn print_ticks(ticks: &[TableTick]) {
    let mut rows = Vec::new();
    for t in ticks {
        if t.skipped {
            rows.push(vec![
                t.table.clone(),
                "-".into(),
                "skipped".into(),
                "-".into(),
                String::new(),
            ]);
        }
        for e in &t.events {
            rows.push(vec![
                e.table.clone(),
                e.partition.clone(),
                e.transition.to_string(),
                e.state.to_string(),
                e.detail.clone().unwrap_or_default(),
            ]);
        }
        if let Some(err) = &t.error {
            rows.push(vec![
                t.table.clone(),
                "-".into(),
                "error".into(),
                "-".into(),
                err.clone(),
            ]);
        }
    }
    if rows.is_empty() {
        println!("Nothing to do.");
        return;
    }
    print_table(&["TABLE", "PARTITION", "TRANSITION", "STATE", "DETAIL"], rows);
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

fn list(config_path: &Path, table: Option<&str>, json: bool) -> anyhow::Result<()> {
    let cfg = load(config_path)?;
    let store = open_store(&cfg)?;
    let mut partitions = store.all_partitions()?;
    if let Some(table) = table {
        partitions.retain(|p| p.table == table);
    }

    if json {
        return print_json(&partitions);
    }
    if partitions.is_empty() {
        println!("No partitions.");
        return Ok(());
    }
    let rows = partitions
        .iter()
        .map(|p| {
            vec![
                p.table.clone(),
                p.name.clone(),
                short_time(&p.range_start),
                short_time(&p.range_end),
                p.state.to_string(),
                p.archive_attempts.to_string(),
                p.last_error.clone().unwrap_or_default(),
            ]
        })
        .collect();
    print_table(
        &["TABLE", "NAME", "START", "END", "STATE", "ATTEMPTS", "LAST ERROR"],
        rows,
    );
    Ok(())
}
