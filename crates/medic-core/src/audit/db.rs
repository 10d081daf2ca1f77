//! redb-backed audit store.
//!
//! # Table design
//!
//! ```text
//! decisions         [ started_at_ms BE (8) | cycle uuid (16) ] → DecisionRecord JSON
//! decision_index    cycle uuid (16)                           → decisions key
//! partitions        table bytes | 0x00 | range_start_ms BE    → PartitionDescriptor JSON
//! partition_events  [ at_ms BE (8) | event uuid (16) ]        → PartitionEvent JSON
//! ```
//!
//! Timestamps occupy the high bytes in big-endian order, so key order is
//! time order and "newest N" is a reverse range scan. `decision_index` makes
//! lookup by cycle id a point read and detects replays before inserting.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use uuid::Uuid;

use crate::error::{MedicError, Result};
use crate::partition::{PartitionDescriptor, PartitionEvent};
use crate::types::DecisionRecord;

use super::{AppendOutcome, AuditSink, PartitionCatalog};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const DECISIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("decisions");
const DECISION_INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("decision_index");
const PARTITIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("partitions");
const PARTITION_EVENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("partition_events");

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn millis(ts: DateTime<Utc>) -> u64 {
    ts.timestamp_millis().max(0) as u64
}

fn time_key(ts: DateTime<Utc>, id: Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..8].copy_from_slice(&millis(ts).to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

/// Lowest key at or after `ts`.
fn time_floor(ts: DateTime<Utc>) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..8].copy_from_slice(&millis(ts).to_be_bytes());
    key
}

fn partition_key(table: &str, range_start: DateTime<Utc>) -> Vec<u8> {
    let mut key = partition_prefix(table);
    key.extend_from_slice(&millis(range_start).to_be_bytes());
    key
}

fn partition_prefix(table: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(table.len() + 9);
    key.extend_from_slice(table.as_bytes());
    key.push(0);
    key
}

/// Exclusive upper bound of every key under `partition_prefix(table)`.
fn partition_prefix_end(table: &str) -> Vec<u8> {
    let mut key = partition_prefix(table);
    if let Some(last) = key.last_mut() {
        *last = 1;
    }
    key
}

fn db_err(e: impl std::fmt::Display) -> MedicError {
    MedicError::AuditStore(e.to_string())
}

// ---------------------------------------------------------------------------
// AuditStore
// ---------------------------------------------------------------------------

pub struct AuditStore {
    db: Database,
}

impl AuditStore {
    /// Open or create the database at `path`, creating parent directories
    /// and all tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(DECISIONS).map_err(db_err)?;
        wt.open_table(DECISION_INDEX).map_err(db_err)?;
        wt.open_table(PARTITIONS).map_err(db_err)?;
        wt.open_table(PARTITION_EVENTS).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    // -----------------------------------------------------------------------
    // Decisions
    // -----------------------------------------------------------------------

    pub fn decision(&self, cycle_id: Uuid) -> Result<DecisionRecord> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let index = rt.open_table(DECISION_INDEX).map_err(db_err)?;
        let key = index
            .get(cycle_id.as_bytes().as_slice())
            .map_err(db_err)?
            .map(|v| v.value().to_vec())
            .ok_or_else(|| MedicError::DecisionNotFound(cycle_id.to_string()))?;
        let table = rt.open_table(DECISIONS).map_err(db_err)?;
        let value = table
            .get(key.as_slice())
            .map_err(db_err)?
            .ok_or_else(|| MedicError::DecisionNotFound(cycle_id.to_string()))?;
        let record = serde_json::from_slice(value.value())?;
        Ok(record)
    }

    /// Newest first, at most `limit`, optionally only cycles started at or
    /// after `since`.
    pub fn decisions(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<DecisionRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(DECISIONS).map_err(db_err)?;
        let lower = since.map(time_floor).unwrap_or([0u8; 24]);

        let mut out = Vec::new();
        for entry in table.range(lower.as_slice()..).map_err(db_err)?.rev() {
            if out.len() >= limit {
                break;
            }
            let (_, v) = entry.map_err(db_err)?;
            out.push(serde_json::from_slice(v.value())?);
        }
        Ok(out)
    }

    pub fn latest_decision(&self) -> Result<Option<DecisionRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(DECISIONS).map_err(db_err)?;
        let latest = match table.last().map_err(db_err)? {
            Some((_, v)) => Some(serde_json::from_slice(v.value())?),
            None => None,
        };
        Ok(latest)
    }

    // -----------------------------------------------------------------------
    // Partitions
    // -----------------------------------------------------------------------

    /// Every descriptor, grouped by table, each table ordered by range.
    pub fn all_partitions(&self) -> Result<Vec<PartitionDescriptor>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(PARTITIONS).map_err(db_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            out.push(serde_json::from_slice(v.value())?);
        }
        Ok(out)
    }

    /// Newest first; `table` filters to one table.
    pub fn partition_events(
        &self,
        table: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PartitionEvent>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let events = rt.open_table(PARTITION_EVENTS).map_err(db_err)?;
        let mut out = Vec::new();
        for entry in events.iter().map_err(db_err)?.rev() {
            if out.len() >= limit {
                break;
            }
            let (_, v) = entry.map_err(db_err)?;
            let event: PartitionEvent = serde_json::from_slice(v.value())?;
            if table.map_or(true, |t| event.table == t) {
                out.push(event);
            }
        }
        Ok(out)
    }
}

impl AuditSink for AuditStore {
    fn decisions_since(&self, since: DateTime<Utc>) -> Result<Vec<DecisionRecord>> {
        let mut out = self.decisions(Some(since), usize::MAX)?;
        out.reverse();
        Ok(out)
    }

    fn append_decision(&self, record: &DecisionRecord) -> Result<AppendOutcome> {
        let key = time_key(record.started_at, record.cycle_id);
        let value = serde_json::to_vec(record)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        let present = {
            let index = wt.open_table(DECISION_INDEX).map_err(db_err)?;
            let found = index
                .get(record.cycle_id.as_bytes().as_slice())
                .map_err(db_err)?
                .is_some();
            found
        };
        if present {
            wt.abort().map_err(db_err)?;
            return Ok(AppendOutcome::AlreadyPresent);
        }
        {
            let mut index = wt.open_table(DECISION_INDEX).map_err(db_err)?;
            index
                .insert(record.cycle_id.as_bytes().as_slice(), key.as_slice())
                .map_err(db_err)?;
            let mut table = wt.open_table(DECISIONS).map_err(db_err)?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(AppendOutcome::Inserted)
    }

    fn append_partition_event(&self, event: &PartitionEvent) -> Result<AppendOutcome> {
        let key = time_key(event.at, event.id);
        let value = serde_json::to_vec(event)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        let present = {
            let table = wt.open_table(PARTITION_EVENTS).map_err(db_err)?;
            let found = table.get(key.as_slice()).map_err(db_err)?.is_some();
            found
        };
        if present {
            wt.abort().map_err(db_err)?;
            return Ok(AppendOutcome::AlreadyPresent);
        }
        {
            let mut table = wt.open_table(PARTITION_EVENTS).map_err(db_err)?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(AppendOutcome::Inserted)
    }
}

impl PartitionCatalog for AuditStore {
    fn partitions(&self, table: &str) -> Result<Vec<PartitionDescriptor>> {
        let lower = partition_prefix(table);
        let upper = partition_prefix_end(table);
        let rt = self.db.begin_read().map_err(db_err)?;
        let parts = rt.open_table(PARTITIONS).map_err(db_err)?;
        let mut out = Vec::new();
        for entry in parts
            .range(lower.as_slice()..upper.as_slice())
            .map_err(db_err)?
        {
            let (_, v) = entry.map_err(db_err)?;
            out.push(serde_json::from_slice(v.value())?);
        }
        Ok(out)
    }

    fn put_partition(&self, descriptor: &PartitionDescriptor) -> Result<()> {
        let key = partition_key(&descriptor.table, descriptor.range_start);
        let value = serde_json::to_vec(descriptor)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(PARTITIONS).map_err(db_err)?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{PartitionState, Transition};
    use crate::types::DecisionDraft;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, AuditStore) {
        let dir = TempDir::new().unwrap();
        let store = AuditStore::open(&dir.path().join("nested/audit.redb")).unwrap();
        (dir, store)
    }

    fn record_at(ts: DateTime<Utc>) -> DecisionRecord {
        DecisionDraft::open(ts).seal(ts + Duration::milliseconds(5))
    }

    fn event(table: &str, at: DateTime<Utc>) -> PartitionEvent {
        PartitionEvent {
            id: Uuid::new_v4(),
            table: table.into(),
            partition: format!("{table}_p0"),
            transition: Transition::Created,
            state: PartitionState::Planned,
            detail: None,
            at,
        }
    }

    #[test]
    fn append_is_insert_if_absent() {
        let (_dir, store) = open_tmp();
        let rec = record_at(Utc::now());
        assert_eq!(store.append_decision(&rec).unwrap(), AppendOutcome::Inserted);
        assert_eq!(
            store.append_decision(&rec).unwrap(),
            AppendOutcome::AlreadyPresent
        );
        assert_eq!(store.decisions(None, 10).unwrap().len(), 1);
        assert_eq!(store.decision(rec.cycle_id).unwrap(), rec);
    }

    #[test]
    fn unknown_cycle_is_not_found() {
        let (_dir, store) = open_tmp();
        let err = store.decision(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, MedicError::DecisionNotFound(_)));
        assert!(store.latest_decision().unwrap().is_none());
    }

    #[test]
    fn decisions_are_newest_first_with_since_and_limit() {
        let (_dir, store) = open_tmp();
        let base = Utc::now();
        // Inserted out of order on purpose.
        let recs: Vec<_> = [3, 1, 4, 2]
            .iter()
            .map(|m| record_at(base + Duration::minutes(*m)))
            .collect();
        for r in &recs {
            store.append_decision(r).unwrap();
        }

        let all = store.decisions(None, 10).unwrap();
        let starts: Vec<_> = all.iter().map(|r| r.started_at).collect();
        let mut sorted = starts.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(starts, sorted);

        let recent = store
            .decisions(Some(base + Duration::minutes(2)), 10)
            .unwrap();
        assert_eq!(recent.len(), 3);

        let limited = store.decisions(None, 2).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].cycle_id, recs[2].cycle_id);

        assert_eq!(store.latest_decision().unwrap().unwrap().cycle_id, recs[2].cycle_id);
    }

    #[test]
    fn latest_decision_follows_start_time_not_append_order() {
        let (_dir, store) = open_tmp();
        let base = Utc::now();
        let newer = record_at(base + Duration::seconds(30));
        let older = record_at(base);
        store.append_decision(&newer).unwrap();
        assert_eq!(store.latest_decision().unwrap().unwrap().cycle_id, newer.cycle_id);
        store.append_decision(&older).unwrap();
        assert_eq!(store.latest_decision().unwrap().unwrap().cycle_id, newer.cycle_id);
    }

    #[test]
    fn decisions_since_is_oldest_first_and_bounded_below() {
        let (_dir, store) = open_tmp();
        let base = Utc::now();
        let recs: Vec<_> = [5, 0, 3]
            .iter()
            .map(|m| record_at(base + Duration::minutes(*m)))
            .collect();
        for r in &recs {
            store.append_decision(r).unwrap();
        }
        let since = store.decisions_since(base + Duration::minutes(1)).unwrap();
        let ids: Vec<_> = since.iter().map(|r| r.cycle_id).collect();
        assert_eq!(ids, vec![recs[2].cycle_id, recs[0].cycle_id]);
    }

    #[test]
    fn partitions_are_scoped_by_table_and_ordered() {
        let (_dir, store) = open_tmp();
        let t0 = Utc.timestamp_opt(86_400 * 100, 0).unwrap();
        for (table, offset) in [("messages", 1), ("messages", 0), ("messages_archive", 0), ("calls", 0)] {
            let start = t0 + Duration::days(offset);
            store
                .put_partition(&PartitionDescriptor::new(
                    table,
                    start,
                    start + Duration::days(1),
                    PartitionState::Planned,
                    t0,
                ))
                .unwrap();
        }
        let messages = store.partitions("messages").unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].range_start < messages[1].range_start);
        assert_eq!(store.partitions("calls").unwrap().len(), 1);
        assert_eq!(store.all_partitions().unwrap().len(), 4);

        // put replaces by (table, range_start)
        let mut p = messages[0].clone();
        p.state = PartitionState::Active;
        store.put_partition(&p).unwrap();
        let messages = store.partitions("messages").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].state, PartitionState::Active);
    }

    #[test]
    fn partition_events_filter_and_dedupe() {
        let (_dir, store) = open_tmp();
        let now = Utc::now();
        let a = event("messages", now);
        let b = event("calls", now + Duration::seconds(1));
        assert_eq!(store.append_partition_event(&a).unwrap(), AppendOutcome::Inserted);
        assert_eq!(
            store.append_partition_event(&a).unwrap(),
            AppendOutcome::AlreadyPresent
        );
        store.append_partition_event(&b).unwrap();

        let all = store.partition_events(None, 10).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, b.id);
        let messages = store.partition_events(Some("messages"), 10).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, a.id);
    }

    #[test]
    fn store_reopens_with_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.redb");
        let rec = record_at(Utc::now());
        {
            let store = AuditStore::open(&path).unwrap();
            store.append_decision(&rec).unwrap();
        }
        let store = AuditStore::open(&path).unwrap();
        assert_eq!(store.decision(rec.cycle_id).unwrap().cycle_id, rec.cycle_id);
    }
}
