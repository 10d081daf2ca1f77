//! PartitionManager: rotates time-sharded tables through
//! PLANNED → ACTIVE → RETIRING → ARCHIVED.
//!
//! Partition width equals the table's retention window and ranges are
//! aligned to multiples of it since the epoch. Each tick, per table:
//!
//! 1. ensure coverage: create PLANNED partitions until one contains
//!    `now + max(lookahead, width)`
//! 2. promote every PLANNED partition whose range has started
//! 3. archive the RETIRING partition (archive, then verify); on success
//!    demote the oldest ACTIVE partition whose range has ended, and repeat
//!
//! Promotion precedes demotion, so at a boundary the successor is ACTIVE
//! before the predecessor leaves. An ended ACTIVE partition waits while
//! another is RETIRING. Ticks for one table never overlap; tables tick in
//! parallel.
//!
//! Every transition appends its event before the new descriptor is stored,
//! each write with bounded retries. A transition whose event cannot be
//! written is not stored, so the next tick repeats it and emits the event
//! again.

mod backend;
mod plan;

pub use backend::{CommandPartitionBackend, PartitionBackend};

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::alert::{Alert, AlertSink};
use crate::audit::{AuditSink, PartitionCatalog};
use crate::backoff::Backoff;
use crate::clock::{span, Clock};
use crate::config::{PartitionsConfig, TableConfig};
use crate::error::{MedicError, Result};
use crate::shutdown::Shutdown;
use crate::types::FailureKind;

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionState {
    Planned,
    Active,
    Retiring,
    /// Terminal.
    Archived,
}

impl PartitionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionState::Planned => "planned",
            PartitionState::Active => "active",
            PartitionState::Retiring => "retiring",
            PartitionState::Archived => "archived",
        }
    }
}

impl fmt::Display for PartitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionDescriptor {
    pub table: String,
    pub name: String,
    /// Inclusive.
    pub range_start: DateTime<Utc>,
    /// Exclusive.
    pub range_end: DateTime<Utc>,
    pub state: PartitionState,
    #[serde(default)]
    pub archive_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl PartitionDescriptor {
    pub fn new(
        table: &str,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
        state: PartitionState,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            table: table.to_string(),
            name: format!("{table}_p{}", range_start.format("%Y%m%d%H%M%S")),
            range_start,
            range_end,
            state,
            archive_attempts: 0,
            last_error: None,
            updated_at: now,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.range_start <= at && at < self.range_end
    }
}

// ---------------------------------------------------------------------------
// Transition events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Created,
    Promoted,
    Demoted,
    Archived,
    /// Not a state change: the partition stays RETIRING.
    ArchiveFailed,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transition::Created => "created",
            Transition::Promoted => "promoted",
            Transition::Demoted => "demoted",
            Transition::Archived => "archived",
            Transition::ArchiveFailed => "archive_failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionEvent {
    pub id: Uuid,
    pub table: String,
    pub partition: String,
    pub transition: Transition,
    pub state: PartitionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// What one tick did to one table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableTick {
    pub table: String,
    pub events: Vec<PartitionEvent>,
    /// Another tick for this table was still in flight.
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// In-flight claims
// ---------------------------------------------------------------------------

struct Claim<'a> {
    set: &'a Mutex<HashSet<String>>,
    table: String,
}

impl<'a> Claim<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, table: &str) -> Option<Self> {
        let mut guard = set.lock().ok()?;
        if !guard.insert(table.to_string()) {
            return None;
        }
        Some(Self {
            set,
            table: table.to_string(),
        })
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.set.lock() {
            guard.remove(&self.table);
        }
    }
}

// ---------------------------------------------------------------------------
// PartitionManager
// ---------------------------------------------------------------------------

pub struct PartitionManager {
    tables: Vec<TableConfig>,
    backend: Arc<dyn PartitionBackend>,
    catalog: Arc<dyn PartitionCatalog>,
    sink: Arc<dyn AuditSink>,
    alerts: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    alert_after: u32,
    interval: Duration,
    backoff: Backoff,
    in_flight: Mutex<HashSet<String>>,
}

impl PartitionManager {
    pub fn new(
        cfg: &PartitionsConfig,
        backoff: Backoff,
        backend: Arc<dyn PartitionBackend>,
        catalog: Arc<dyn PartitionCatalog>,
        sink: Arc<dyn AuditSink>,
        alerts: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tables: cfg.tables.clone(),
            backend,
            catalog,
            sink,
            alerts,
            clock,
            alert_after: cfg.alert_after_failed_ticks.max(1),
            interval: Duration::from_secs(cfg.tick_interval_secs.max(1)),
            backoff,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Tick until shutdown. Missed ticks are delayed, never bunched.
    pub async fn run(&self, shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            tables = self.tables.len(),
            interval_secs = self.interval.as_secs(),
            "partition manager started"
        );
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        tracing::info!("partition manager stopped");
    }

    /// One pass over every table, in parallel.
    pub async fn tick(&self) -> Vec<TableTick> {
        join_all(self.tables.iter().map(|t| self.tick_table(t))).await
    }

    async fn tick_table(&self, table: &TableConfig) -> TableTick {
        let Some(_claim) = Claim::acquire(&self.in_flight, &table.name) else {
            tracing::debug!(table = %table.name, "tick already in flight; skipping");
            return TableTick {
                table: table.name.clone(),
                skipped: true,
                ..Default::default()
            };
        };

        let mut events = Vec::new();
        let error = match self.advance(table, &mut events).await {
            Ok(()) => None,
            Err(e) => {
                tracing::error!(table = %table.name, error = %e, "partition tick failed");
                Some(e.to_string())
            }
        };
        TableTick {
            table: table.name.clone(),
            events,
            skipped: false,
            error,
        }
    }

    async fn advance(&self, table: &TableConfig, events: &mut Vec<PartitionEvent>) -> Result<()> {
        let now = self.clock.now();
        let (Some(width), Some(lookahead)) = (span(table.retention_secs), span(table.lookahead_secs))
        else {
            return Err(MedicError::InvalidConfig(format!(
                "table '{}': retention_secs or lookahead_secs out of range",
                table.name
            )));
        };
        let mut parts = self.load(&table.name).await?;

        // 1. coverage
        for (start, end) in plan::missing_ranges(&parts, width, lookahead, now) {
            let desc = PartitionDescriptor::new(&table.name, start, end, PartitionState::Planned, now);
            self.backend.create(&desc).await?;
            events.push(self.commit(&desc, Transition::Created, None, now).await?);
            parts.push(desc);
        }

        // 2. promotion
        for p in parts.iter_mut() {
            if p.state == PartitionState::Planned && p.range_start <= now {
                p.state = PartitionState::Active;
                p.updated_at = now;
                events.push(self.commit(p, Transition::Promoted, None, now).await?);
            }
        }

        // 3. archive and demote, one RETIRING partition at a time
        loop {
            if let Some(idx) = parts.iter().position(|p| p.state == PartitionState::Retiring) {
                if !self.try_archive(&mut parts[idx], events, now).await? {
                    break;
                }
                continue;
            }

            let has_current = parts
                .iter()
                .any(|p| p.state == PartitionState::Active && p.contains(now));
            let expired = parts
                .iter()
                .enumerate()
                .filter(|(_, p)| p.state == PartitionState::Active && p.range_end <= now)
                .min_by_key(|(_, p)| p.range_start)
                .map(|(i, _)| i);
            let Some(idx) = expired else { break };
            if !has_current {
                tracing::warn!(
                    table = %table.name,
                    partition = %parts[idx].name,
                    "no successor is active; keeping expired partition active"
                );
                break;
            }
            let p = &mut parts[idx];
            p.state = PartitionState::Retiring;
            p.updated_at = now;
            events.push(self.commit(p, Transition::Demoted, None, now).await?);
        }

        Ok(())
    }

    /// Returns `true` when the partition reached ARCHIVED.
    async fn try_archive(
        &self,
        p: &mut PartitionDescriptor,
        events: &mut Vec<PartitionEvent>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let failure = match self.backend.archive(p).await {
            Err(e) => Some(e.to_string()),
            Ok(()) => match self.backend.verify(p).await {
                Ok(true) => None,
                Ok(false) => Some("archive verification failed".to_string()),
                Err(e) => Some(e.to_string()),
            },
        };

        p.updated_at = now;
        match failure {
            None => {
                p.state = PartitionState::Archived;
                p.last_error = None;
                events.push(self.commit(p, Transition::Archived, None, now).await?);
                tracing::info!(table = %p.table, partition = %p.name, "partition archived");
                Ok(true)
            }
            Some(reason) => {
                p.archive_attempts += 1;
                p.last_error = Some(reason.clone());
                events.push(
                    self.commit(p, Transition::ArchiveFailed, Some(reason.clone()), now)
                        .await?,
                );
                tracing::warn!(
                    failure = %FailureKind::PartitionArchiveFailure,
                    table = %p.table,
                    partition = %p.name,
                    attempt = p.archive_attempts,
                    error = %reason,
                    "archive failed; partition stays retiring"
                );
                if p.archive_attempts >= self.alert_after {
                    self.alerts
                        .raise(Alert::new(
                            FailureKind::PartitionArchiveFailure,
                            p.name.clone(),
                            format!(
                                "archive of {} failed {} consecutive ticks: {reason}",
                                p.name, p.archive_attempts
                            ),
                            now,
                        ))
                        .await;
                }
                Ok(false)
            }
        }
    }

    // ---------------------------------------------------------------------
    // Blocking store access
    // ---------------------------------------------------------------------

    async fn load(&self, table: &str) -> Result<Vec<PartitionDescriptor>> {
        let catalog = Arc::clone(&self.catalog);
        let table = table.to_string();
        let mut parts = blocking(move || catalog.partitions(&table)).await?;
        parts.sort_by_key(|p| p.range_start);
        Ok(parts)
    }

    /// Append the transition's event, then store the descriptor.
    async fn commit(
        &self,
        p: &PartitionDescriptor,
        transition: Transition,
        detail: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<PartitionEvent> {
        let event = PartitionEvent {
            id: Uuid::new_v4(),
            table: p.table.clone(),
            partition: p.name.clone(),
            transition,
            state: p.state,
            detail,
            at,
        };
        tracing::debug!(table = %p.table, partition = %p.name, %transition, "partition transition");

        let sink = Arc::clone(&self.sink);
        let stored = event.clone();
        self.with_retries(&p.name, "partition event", move || {
            sink.append_partition_event(&stored).map(|_| ())
        })
        .await?;

        let catalog = Arc::clone(&self.catalog);
        let desc = p.clone();
        self.with_retries(&p.name, "partition descriptor", move || {
            catalog.put_partition(&desc)
        })
        .await?;
        Ok(event)
    }

    /// Run a blocking write up to `backoff.attempts` times. Exhaustion
    /// raises a PersistenceFailure alert and returns the last error.
    async fn with_retries<F>(&self, partition: &str, what: &'static str, write: F) -> Result<()>
    where
        F: Fn() -> Result<()> + Clone + Send + 'static,
    {
        let mut attempt = 1;
        loop {
            let err = match blocking(write.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            tracing::warn!(
                failure = %FailureKind::PersistenceFailure,
                partition,
                what,
                attempt,
                error = %err,
                "partition write failed"
            );
            if attempt >= self.backoff.attempts {
                self.alerts
                    .raise(Alert::new(
                        FailureKind::PersistenceFailure,
                        partition.to_string(),
                        format!("{what} dropped after {attempt} attempts: {err}"),
                        self.clock.now(),
                    ))
                    .await;
                return Err(err);
            }
            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MedicError::AuditStore(format!("store task failed: {e}")))?
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
