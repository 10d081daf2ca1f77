use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use medic_core::advisor::advisor_from_config;
use medic_core::alert::{AlertSink, Alerter};
use medic_core::audit::AuditStore;
use medic_core::backoff::Backoff;
use medic_core::clock::{Clock, SystemClock};
use medic_core::config::{has_errors, Config, WarnLevel};
use medic_core::executor::ActionExecutor;
use medic_core::healing::{Collaborators, HealingLoop};
use medic_core::partition::{CommandPartitionBackend, PartitionManager};
use medic_core::telemetry::reader_from_config;

/// Load the config file without judging it. Used by read-only commands.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    Config::load(path).with_context(|| format!("failed to load {}", path.display()))
}

/// Load and validate. Warnings are logged; any error-level finding refuses
/// to start a controller.
pub fn load_checked(path: &Path) -> anyhow::Result<Config> {
    let cfg = load(path)?;
    let warnings = cfg.validate();
    for w in &warnings {
        match w.level {
            WarnLevel::Warning => tracing::warn!("config: {}", w.message),
            WarnLevel::Error => tracing::error!("config: {}", w.message),
        }
    }
    if has_errors(&warnings) {
        bail!(
            "{} has errors; run `medic config validate` for details",
            path.display()
        );
    }
    Ok(cfg)
}

pub fn open_store(cfg: &Config) -> anyhow::Result<AuditStore> {
    let path = cfg.audit_path();
    AuditStore::open(&path).with_context(|| {
        format!(
            "failed to open audit store {} (a running `medic run` holds it; use its HTTP surface instead)",
            path.display()
        )
    })
}

/// Every long-lived component, wired from one config.
pub struct Controller {
    pub store: Arc<AuditStore>,
    pub healing: HealingLoop,
    /// `None` when no partitioned tables are configured.
    pub partitions: Option<PartitionManager>,
}

impl Controller {
    pub fn assemble(cfg: &Config) -> anyhow::Result<Self> {
        let store = Arc::new(open_store(cfg)?);
        let alerts: Arc<dyn AlertSink> = Arc::new(Alerter::new(&cfg.alerts));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let healing = HealingLoop::new(
            cfg,
            Collaborators {
                reader: reader_from_config(cfg).context("failed to build telemetry reader")?,
                advisor: advisor_from_config(cfg),
                executor: ActionExecutor::from_config(cfg),
                sink: store.clone(),
                alerts: alerts.clone(),
                clock: clock.clone(),
            },
        )
        .context("failed to build healing loop")?;

        let partitions = match &cfg.partitions.backend {
            Some(backend) if !cfg.partitions.tables.is_empty() => Some(PartitionManager::new(
                &cfg.partitions,
                Backoff::from_audit(&cfg.audit),
                Arc::new(CommandPartitionBackend::new(
                    backend.clone(),
                    cfg.base_dir.clone(),
                )),
                store.clone(),
                store.clone(),
                alerts,
                clock,
            )),
            _ => None,
        };

        Ok(Self {
            store,
            healing,
            partitions,
        })
    }
}
