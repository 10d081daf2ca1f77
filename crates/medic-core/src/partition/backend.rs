use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::PartitionBackendConfig;
use crate::error::{MedicError, Result};
use crate::shell::run_shell;

use super::PartitionDescriptor;

/// The storage engine's side of partition rotation.
#[async_trait]
pub trait PartitionBackend: Send + Sync {
    async fn create(&self, partition: &PartitionDescriptor) -> Result<()>;
    /// Export the partition's data. Success alone does not archive it.
    async fn archive(&self, partition: &PartitionDescriptor) -> Result<()>;
    /// `Ok(true)` only when the export is confirmed complete.
    async fn verify(&self, partition: &PartitionDescriptor) -> Result<bool>;
}

/// Runs the configured shell commands with the partition in the environment:
/// `MEDIC_TABLE`, `MEDIC_PARTITION`, `MEDIC_RANGE_START`, `MEDIC_RANGE_END`.
pub struct CommandPartitionBackend {
    cfg: PartitionBackendConfig,
    cwd: PathBuf,
}

impl CommandPartitionBackend {
    pub fn new(cfg: PartitionBackendConfig, cwd: PathBuf) -> Self {
        Self { cfg, cwd }
    }

    async fn run(&self, step: &str, command: &str, p: &PartitionDescriptor) -> Result<bool> {
        let env = [
            ("MEDIC_TABLE", p.table.clone()),
            ("MEDIC_PARTITION", p.name.clone()),
            ("MEDIC_RANGE_START", p.range_start.to_rfc3339()),
            ("MEDIC_RANGE_END", p.range_end.to_rfc3339()),
        ];
        let limit = Duration::from_millis(self.cfg.timeout_ms);
        let out = tokio::time::timeout(limit, run_shell(command, &self.cwd, &env, None))
            .await
            .map_err(|_| {
                MedicError::PartitionBackend(format!(
                    "{step} of {} timed out after {}ms",
                    p.name, self.cfg.timeout_ms
                ))
            })??;
        if !out.success {
            tracing::debug!(partition = %p.name, step, detail = %out.failure_detail(), "backend step failed");
        }
        Ok(out.success)
    }

    async fn must(&self, step: &str, command: &str, p: &PartitionDescriptor) -> Result<()> {
        if self.run(step, command, p).await? {
            Ok(())
        } else {
            Err(MedicError::PartitionBackend(format!(
                "{step} of {} failed",
                p.name
            )))
        }
    }
}

#[async_trait]
impl PartitionBackend for CommandPartitionBackend {
    async fn create(&self, partition: &PartitionDescriptor) -> Result<()> {
        self.must("create", &self.cfg.create_command, partition).await
    }

    async fn archive(&self, partition: &PartitionDescriptor) -> Result<()> {
        self.must("archive", &self.cfg.archive_command, partition).await
    }

    async fn verify(&self, partition: &PartitionDescriptor) -> Result<bool> {
        self.run("verify", &self.cfg.verify_command, partition).await
    }
}
