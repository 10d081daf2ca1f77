//! Cooperative shutdown signal shared by the control loops.
//!
//! Every advisor call, action execution and telemetry read races its future
//! against [`Shutdown::wait`]. A cycle interrupted this way still seals and
//! persists its decision record.

use tokio::sync::watch;

/// Sending half. Dropping it without firing means "never shut down".
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn fire(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiving half; cheap to clone into every task.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl Shutdown {
    /// A handle that never fires, for one-shot commands and tests.
    pub fn never() -> Self {
        let (_trigger, shutdown) = channel();
        shutdown
    }

    pub fn is_fired(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Trigger dropped without firing.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_resolves_after_fire() {
        let (trigger, shutdown) = channel();
        assert!(!shutdown.is_fired());
        let waiter = shutdown.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });
        trigger.fire();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("wait should resolve")
            .unwrap();
        assert!(shutdown.is_fired());
    }

    #[tokio::test]
    async fn never_does_not_resolve() {
        let shutdown = Shutdown::never();
        let res = tokio::time::timeout(Duration::from_millis(50), shutdown.wait()).await;
        assert!(res.is_err());
        assert!(!shutdown.is_fired());
    }
}
