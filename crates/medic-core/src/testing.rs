//! Scripted in-memory collaborators for tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use medic_advisor::HistoryPoint;

use crate::advisor::ReasoningAdvisor;
use crate::alert::{Alert, AlertSink};
use crate::audit::{AppendOutcome, AuditSink, PartitionCatalog};
use crate::error::{MedicError, Result};
use crate::executor::{ExecutionContext, ExecutionSurface, Invocation};
use crate::partition::{PartitionBackend, PartitionDescriptor, PartitionEvent};
use crate::telemetry::TelemetryReader;
use crate::types::{ActionParams, Anomaly, DecisionRecord, RemediationAction, Signal};

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Reading {
    Value(f64),
    Fail,
    Stall,
}

/// Unset signals read as unavailable.
#[derive(Default)]
pub struct ScriptedTelemetry {
    readings: Mutex<HashMap<String, Reading>>,
}

impl ScriptedTelemetry {
    pub fn set(&self, signal: &str, value: f64) {
        self.put(signal, Reading::Value(value));
    }

    pub fn fail(&self, signal: &str) {
        self.put(signal, Reading::Fail);
    }

    /// The read never completes.
    pub fn stall(&self, signal: &str) {
        self.put(signal, Reading::Stall);
    }

    fn put(&self, signal: &str, reading: Reading) {
        self.readings
            .lock()
            .unwrap()
            .insert(signal.to_string(), reading);
    }
}

#[async_trait]
impl TelemetryReader for ScriptedTelemetry {
    async fn read_signal(&self, name: &str, _window: Duration) -> Result<Signal> {
        let reading = self.readings.lock().unwrap().get(name).copied();
        match reading {
            Some(Reading::Value(value)) => Ok(Signal {
                name: name.to_string(),
                value,
                unit: String::new(),
                observed_at: Utc::now(),
            }),
            Some(Reading::Stall) => std::future::pending().await,
            Some(Reading::Fail) | None => Err(MedicError::SignalUnavailable {
                signal: name.to_string(),
                reason: "scripted failure".into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Advisor
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ScriptedAdvisor {
    answer: Mutex<Vec<RemediationAction>>,
    stalled: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedAdvisor {
    /// Returned as-is, in this order, on every call.
    pub fn answer(&self, actions: Vec<RemediationAction>) {
        *self.answer.lock().unwrap() = actions;
    }

    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningAdvisor for ScriptedAdvisor {
    async fn suggest(&self, _: &Anomaly, _: &[HistoryPoint]) -> Vec<RemediationAction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.answer.lock().unwrap().clone()
    }
}

// ---------------------------------------------------------------------------
// Execution surface
// ---------------------------------------------------------------------------

/// Succeeds unless the kind was marked failing; records every call.
#[derive(Default)]
pub struct RecordingSurface {
    calls: Mutex<Vec<(String, ActionParams, ExecutionContext)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingSurface {
    pub fn fail_kind(&self, kind: &str) {
        self.failing.lock().unwrap().insert(kind.to_string());
    }

    pub fn calls(&self) -> Vec<(String, ActionParams, ExecutionContext)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionSurface for RecordingSurface {
    async fn invoke(
        &self,
        kind: &str,
        params: &ActionParams,
        ctx: &ExecutionContext,
    ) -> Result<Invocation> {
        self.calls
            .lock()
            .unwrap()
            .push((kind.to_string(), params.clone(), ctx.clone()));
        let success = !self.failing.lock().unwrap().contains(kind);
        Ok(Invocation {
            success,
            detail: if success { "ok".into() } else { "scripted failure".into() },
        })
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// In-memory `AuditSink` + `PartitionCatalog` with injectable append failures.
#[derive(Default)]
pub struct MemoryAudit {
    decisions: Mutex<Vec<DecisionRecord>>,
    events: Mutex<Vec<PartitionEvent>>,
    partitions: Mutex<BTreeMap<(String, DateTime<Utc>), PartitionDescriptor>>,
    failing_appends: AtomicU32,
    failing_event_appends: AtomicU32,
}

impl MemoryAudit {
    /// The next `n` decision appends fail.
    pub fn fail_next_appends(&self, n: u32) {
        self.failing_appends.store(n, Ordering::SeqCst);
    }

    /// The next `n` partition event appends fail.
    pub fn fail_next_event_appends(&self, n: u32) {
        self.failing_event_appends.store(n, Ordering::SeqCst);
    }

    pub fn decisions(&self) -> Vec<DecisionRecord> {
        self.decisions.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<PartitionEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AuditSink for MemoryAudit {
    fn append_decision(&self, record: &DecisionRecord) -> Result<AppendOutcome> {
        let pending = self.failing_appends.load(Ordering::SeqCst);
        if pending > 0 {
            self.failing_appends.store(pending - 1, Ordering::SeqCst);
            return Err(MedicError::AuditStore("scripted append failure".into()));
        }
        let mut decisions = self.decisions.lock().unwrap();
        if decisions.iter().any(|d| d.cycle_id == record.cycle_id) {
            return Ok(AppendOutcome::AlreadyPresent);
        }
        decisions.push(record.clone());
        Ok(AppendOutcome::Inserted)
    }

    fn append_partition_event(&self, event: &PartitionEvent) -> Result<AppendOutcome> {
        let pending = self.failing_event_appends.load(Ordering::SeqCst);
        if pending > 0 {
            self.failing_event_appends.store(pending - 1, Ordering::SeqCst);
            return Err(MedicError::AuditStore("scripted event append failure".into()));
        }
        let mut events = self.events.lock().unwrap();
        if events.iter().any(|e| e.id == event.id) {
            return Ok(AppendOutcome::AlreadyPresent);
        }
        events.push(event.clone());
        Ok(AppendOutcome::Inserted)
    }

    fn decisions_since(&self, since: DateTime<Utc>) -> Result<Vec<DecisionRecord>> {
        let mut out: Vec<_> = self
            .decisions
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.started_at >= since)
            .cloned()
            .collect();
        out.sort_by_key(|d| d.started_at);
        Ok(out)
    }
}

impl PartitionCatalog for MemoryAudit {
    fn partitions(&self, table: &str) -> Result<Vec<PartitionDescriptor>> {
        Ok(self
            .partitions
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.table == table)
            .cloned()
            .collect())
    }

    fn put_partition(&self, descriptor: &PartitionDescriptor) -> Result<()> {
        self.partitions.lock().unwrap().insert(
            (descriptor.table.clone(), descriptor.range_start),
            descriptor.clone(),
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingAlerts {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlerts {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlerts {
    async fn raise(&self, alert: Alert) {
        self.alerts.lock().unwrap().push(alert);
    }
}

// ---------------------------------------------------------------------------
// Partition backend
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ScriptedBackend {
    fail_create: AtomicBool,
    fail_archive: AtomicBool,
    fail_verify: AtomicBool,
    delay: Mutex<Duration>,
    created: Mutex<Vec<String>>,
    archived: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn fail_create(&self, on: bool) {
        self.fail_create.store(on, Ordering::SeqCst);
    }

    pub fn fail_archive(&self, on: bool) {
        self.fail_archive.store(on, Ordering::SeqCst);
    }

    pub fn fail_verify(&self, on: bool) {
        self.fail_verify.store(on, Ordering::SeqCst);
    }

    /// Applied to every `create`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn archived(&self) -> Vec<String> {
        self.archived.lock().unwrap().clone()
    }
}

#[async_trait]
impl PartitionBackend for ScriptedBackend {
    async fn create(&self, partition: &PartitionDescriptor) -> Result<()> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(MedicError::PartitionBackend("scripted create failure".into()));
        }
        self.created.lock().unwrap().push(partition.name.clone());
        Ok(())
    }

    async fn archive(&self, partition: &PartitionDescriptor) -> Result<()> {
        if self.fail_archive.load(Ordering::SeqCst) {
            return Err(MedicError::PartitionBackend("scripted archive failure".into()));
        }
        self.archived.lock().unwrap().push(partition.name.clone());
        Ok(())
    }

    async fn verify(&self, _: &PartitionDescriptor) -> Result<bool> {
        Ok(!self.fail_verify.load(Ordering::SeqCst))
    }
}
