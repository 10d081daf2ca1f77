//! `medic-core`: an autonomous operations controller.
//!
//! Two independently scheduled loops share one append-only audit sink:
//!
//! - [`healing::HealingLoop`] reads health signals, classifies anomalies,
//!   proposes remediations (rule table first, reasoning advisor second),
//!   gates every candidate through the default-deny [`policy::PolicyGuard`],
//!   executes what is allowed and records one `DecisionRecord` per cycle.
//! - [`partition::PartitionManager`] rotates time-sharded tables through
//!   PLANNED → ACTIVE → RETIRING → ARCHIVED.

pub mod advisor;
pub mod alert;
pub mod audit;
pub mod backoff;
pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod healing;
pub mod partition;
pub mod policy;
pub mod shutdown;
pub mod telemetry;
pub mod types;

mod shell;

#[cfg(test)]
pub mod testing;

pub use error::{MedicError, Result};
