//! Audit persistence: the shared append-only sink both control loops write
//! to, and the catalog PartitionManager keeps descriptors in.
//!
//! Both traits are synchronous; async callers go through
//! `tokio::task::spawn_blocking`.

mod db;

pub use db::AuditStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::partition::{PartitionDescriptor, PartitionEvent};
use crate::types::DecisionRecord;

/// Result of an insert-if-absent append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppendOutcome {
    Inserted,
    /// The record was already stored; the replay changed nothing.
    AlreadyPresent,
}

pub trait AuditSink: Send + Sync {
    /// Keyed by `cycle_id`.
    fn append_decision(&self, record: &DecisionRecord) -> Result<AppendOutcome>;
    /// Keyed by event id.
    fn append_partition_event(&self, event: &PartitionEvent) -> Result<AppendOutcome>;
    /// Decisions of cycles started at or after `since`, oldest first.
    fn decisions_since(&self, since: DateTime<Utc>) -> Result<Vec<DecisionRecord>>;
}

pub trait PartitionCatalog: Send + Sync {
    /// Descriptors for `table`, ordered by `range_start`.
    fn partitions(&self, table: &str) -> Result<Vec<PartitionDescriptor>>;
    /// Insert or replace the descriptor identified by table and range start.
    fn put_partition(&self, descriptor: &PartitionDescriptor) -> Result<()>;
}
