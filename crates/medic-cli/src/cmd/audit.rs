use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use medic_core::types::{ActionSource, DecisionRecord, Outcome};
use uuid::Uuid;

use crate::controller::{load, open_store};
use crate::output::{print_json, print_table, short_time};

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum AuditSubcommand {
    /// List decision records, newest first
    List {
        #[arg(long, default_value = "20")]
        limit: usize,
        /// Only cycles started at or after this RFC 3339 instant
        #[arg(long)]
        since: Option<String>,
    },

    /// Show one decision record in full
    Show {
        /// Cycle id (uuid)
        cycle_id: String,
    },

    /// List partition transition events, newest first
    Events {
        #[arg(long)]
        table: Option<String>,
        #[arg(long, default_value = "50")]
        limit: usize,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(config_path: &Path, subcmd: AuditSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        AuditSubcommand::List { limit, since } => list(config_path, limit, since.as_deref(), json),
        AuditSubcommand::Show { cycle_id } => show(config_path, &cycle_id, json),
        AuditSubcommand::Events { table, limit } => {
            events(config_path, table.as_deref(), limit, json)
        }
    }
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

fn list(config_path: &Path, limit: usize, since: Option<&str>, json: bool) -> anyhow::Result<()> {
    let since = since
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .with_context(|| format!("--since '{raw}' is not RFC 3339"))
        })
        .transpose()?;
    let store = open_store(&load(config_path)?)?;
    let records = store.decisions(since, limit)?;

    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No decision records.");
        return Ok(());
    }
    let rows = records
        .iter()
        .map(|r| {
            vec![
                r.cycle_id.to_string(),
                short_time(&r.started_at),
                r.anomalies.len().to_string(),
                r.candidates.len().to_string(),
                executed_count(r).to_string(),
                flags(r),
            ]
        })
        .collect();
    print_table(
        &["CYCLE", "STARTED", "ANOMALIES", "CANDIDATES", "EXECUTED", "FLAGS"],
        rows,
    );
    Ok(())
}

fn executed_count(r: &DecisionRecord) -> usize {
    r.executed
        .iter()
        .filter(|e| e.outcome != Outcome::Skipped)
        .count()
}

fn flags(r: &DecisionRecord) -> String {
    let mut flags = Vec::new();
    if r.cancelled {
        flags.push("cancelled".to_string());
    }
    if !r.missing_signals.is_empty() {
        flags.push(format!("missing:{}", r.missing_signals.join(",")));
    }
    flags.join(" ")
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(config_path: &Path, cycle_id: &str, json: bool) -> anyhow::Result<()> {
    let id =
        Uuid::parse_str(cycle_id).with_context(|| format!("'{cycle_id}' is not a cycle id"))?;
    let store = open_store(&load(config_path)?)?;
    let record = store.decision(id)?;

    if json {
        return print_json(&record);
    }
    println!("cycle:    {}", record.cycle_id);
    println!("started:  {}", record.started_at.to_rfc3339());
    println!("finished: {}", record.finished_at.to_rfc3339());
    if record.cancelled {
        println!("cancelled by shutdown");
    }
    if !record.missing_signals.is_empty() {
        println!("missing:  {}", record.missing_signals.join(", "));
    }
    println!();
    for a in &record.anomalies {
        let rule = a.rule_id.as_deref().unwrap_or("-");
        println!(
            "anomaly  {} = {} {} [{}] rule={rule}",
            a.signal.name, a.signal.value, a.signal.unit, a.severity
        );
    }
    for (v, e) in record.verdicts.iter().zip(&record.executed) {
        println!(
            "action   {} ({}, confidence {:.2}): {} ({}) -> {}: {}",
            v.action.label(),
            match v.action.source {
                ActionSource::Rule => "rule",
                ActionSource::Advisor => "advisor",
            },
            v.action.confidence,
            v.decision,
            v.reason,
            e.outcome,
            e.detail
        );
    }
    // Cancelled cycles skip evaluation; their candidates have no verdict.
    for e in record.executed.iter().skip(record.verdicts.len()) {
        println!("action   {} -> {}: {}", e.action.label(), e.outcome, e.detail);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// events
// ---------------------------------------------------------------------------

fn events(config_path: &Path, table: Option<&str>, limit: usize, json: bool) -> anyhow::Result<()> {
    let store = open_store(&load(config_path)?)?;
    let events = store.partition_events(table, limit)?;

    if json {
        return print_json(&events);
    }
    if events.is_empty() {
        println!("No partition events.");
        return Ok(());
    }
    let rows = events
        .iter()
        .map(|e| {
            vec![
                short_time(&e.at),
                e.table.clone(),
                e.partition.clone(),
                e.transition.to_string(),
                e.state.to_string(),
                e.detail.clone().unwrap_or_default(),
            ]
        })
        .collect();
    print_table(
        &["AT", "TABLE", "PARTITION", "TRANSITION", "STATE", "DETAIL"],
        rows,
    );
    Ok(())
}
