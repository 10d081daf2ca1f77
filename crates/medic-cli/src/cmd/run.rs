use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use medic_core::shutdown;
use medic_server::AppState;

use crate::controller::{load_checked, Controller};

/// Run the HealingLoop, the PartitionManager and (when `server.listen` is
/// set) the HTTP surface until Ctrl-C.
pub fn run(config_path: &Path) -> anyhow::Result<()> {
    let cfg = load_checked(config_path)?;
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async move {
        let controller = Controller::assemble(&cfg)?;
        let (trigger, shutdown) = shutdown::channel();
        let mut tasks = Vec::new();

        if let Some(listen) = &cfg.server.listen {
            let listener = tokio::net::TcpListener::bind(listen)
                .await
                .with_context(|| format!("failed to bind {listen}"))?;
            let state = AppState::new(
                controller.store.clone(),
                Duration::from_secs(cfg.controller.cycle_interval_secs),
            );
            let shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = medic_server::serve_on(listener, state, shutdown).await {
                    tracing::error!("http surface stopped: {e:#}");
                }
            }));
        }

        if let Some(manager) = controller.partitions {
            let shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move { manager.run(shutdown).await }));
        } else {
            tracing::info!("no partitioned tables configured");
        }

        let healing = Arc::new(controller.healing);
        {
            let shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move { healing.run(shutdown).await }));
        }

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for ctrl-c")?;
        tracing::info!("shutdown requested; letting in-flight work settle");
        trigger.fire();

        for task in tasks {
            task.await.context("controller task panicked")?;
        }
        Ok(())
    })
}
