use std::path::Path;

use anyhow::bail;
use medic_core::healing::CycleReport;
use medic_core::shutdown::Shutdown;
use medic_core::types::Outcome;

use crate::controller::{load_checked, Controller};
use crate::output::{print_json, print_table};

/// Run exactly one HealingLoop cycle and print its decision record.
pub fn run(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let cfg = load_checked(config_path)?;
    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async move {
        let controller = Controller::assemble(&cfg)?;
        Ok::<_, anyhow::Error>(controller.healing.run_cycle(&Shutdown::never()).await)
    })?;

    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }

    if !report.persisted {
        bail!(
            "decision record {} could not be persisted",
            report.record.cycle_id
        );
    }
    Ok(())
}

fn print_report(report: &CycleReport) {
    let rec = &report.record;
    println!("cycle {}", rec.cycle_id);
    if !rec.missing_signals.is_empty() {
        println!("missing signals: {}", rec.missing_signals.join(", "));
    }
    if rec.anomalies.is_empty() {
        println!("no anomalies");
        return;
    }
    for a in &rec.anomalies {
        println!(
            "anomaly: {} = {} {} [{}]",
            a.signal.name, a.signal.value, a.signal.unit, a.severity
        );
    }
    println!();

    let rows = rec
        .verdicts
        .iter()
        .zip(&rec.executed)
        .map(|(v, e)| {
            vec![
                v.action.label(),
                v.decision.to_string(),
                e.outcome.to_string(),
                if e.outcome == Outcome::Skipped {
                    v.reason.clone()
                } else {
                    e.detail.clone()
                },
            ]
        })
        .collect();
    print_table(&["ACTION", "DECISION", "OUTCOME", "DETAIL"], rows);
}
