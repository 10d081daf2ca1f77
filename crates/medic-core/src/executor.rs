//! ActionExecutor: applies approved actions through an execution surface.
//!
//! Every call is bounded by a timeout and raced against shutdown. The
//! executor remembers, per action fingerprint (kind plus canonical params),
//! how many times it ran and how the last run ended, and hands that to the
//! surface so actions can be written to clamp rather than compound.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Result;
use crate::shell::{run_shell, truncate, DETAIL_LIMIT};
use crate::shutdown::Shutdown;
use crate::types::{ActionParams, ExecutionRecord, FailureKind, Outcome, RemediationAction};

// ─── Surface contract ─────────────────────────────────────────────────────

/// What the surface knows about earlier runs of the same action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// 1 on the first run of this fingerprint since process start.
    pub attempt: u32,
    pub previous_outcome: Option<Outcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub success: bool,
    pub detail: String,
}

/// Single dispatch path for every action kind.
#[async_trait]
pub trait ExecutionSurface: Send + Sync {
    async fn invoke(
        &self,
        kind: &str,
        params: &ActionParams,
        ctx: &ExecutionContext,
    ) -> Result<Invocation>;
}

// ─── CommandSurface ───────────────────────────────────────────────────────

/// Runs the shell command configured for each action kind.
///
/// Params arrive as a JSON object on stdin and as `MEDIC_PARAM_<NAME>`
/// environment variables. Exit 0 is success; stdout becomes the detail.
pub struct CommandSurface {
    routes: BTreeMap<String, String>,
    cwd: PathBuf,
}

impl CommandSurface {
    pub fn new(routes: BTreeMap<String, String>, cwd: PathBuf) -> Self {
        Self { routes, cwd }
    }
}

#[async_trait]
impl ExecutionSurface for CommandSurface {
    async fn invoke(
        &self,
        kind: &str,
        params: &ActionParams,
        ctx: &ExecutionContext,
    ) -> Result<Invocation> {
        let Some(command) = self.routes.get(kind) else {
            return Ok(Invocation {
                success: false,
                detail: format!("no execution route for '{kind}'"),
            });
        };

        let mut env: Vec<(String, String)> = vec![
            ("MEDIC_ACTION_KIND".into(), kind.to_string()),
            ("MEDIC_ATTEMPT".into(), ctx.attempt.to_string()),
            (
                "MEDIC_PREVIOUS_OUTCOME".into(),
                ctx.previous_outcome
                    .map(|o| o.as_str().to_string())
                    .unwrap_or_else(|| "none".into()),
            ),
        ];
        for (k, v) in params {
            env.push((format!("MEDIC_PARAM_{}", k.to_ascii_uppercase()), v.to_string()));
        }
        let env: Vec<(&str, String)> = env.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        let stdin = serde_json::to_vec(params)?;

        let out = run_shell(command, &self.cwd, &env, Some(&stdin)).await?;
        let detail = if out.success {
            truncate(out.stdout.trim(), DETAIL_LIMIT)
        } else {
            out.failure_detail()
        };
        Ok(Invocation {
            success: out.success,
            detail,
        })
    }
}

// ─── ActionExecutor ───────────────────────────────────────────────────────

pub struct ActionExecutor {
    surface: Arc<dyn ExecutionSurface>,
    timeout: Duration,
    /// fingerprint → (runs so far, last outcome)
    history: Mutex<HashMap<String, (u32, Option<Outcome>)>>,
}

impl ActionExecutor {
    pub fn new(surface: Arc<dyn ExecutionSurface>, timeout: Duration) -> Self {
        Self {
            surface,
            timeout,
            history: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        let surface = CommandSurface::new(cfg.executor.actions.clone(), cfg.base_dir.clone());
        Self::new(Arc::new(surface), Duration::from_millis(cfg.executor.timeout_ms))
    }

    /// Runs so far for this action's fingerprint.
    pub fn attempts(&self, action: &RemediationAction) -> u32 {
        self.history
            .lock()
            .ok()
            .and_then(|h| h.get(&action.fingerprint()).map(|(n, _)| *n))
            .unwrap_or(0)
    }

    /// Book the next attempt and return its context.
    fn begin(&self, fingerprint: &str) -> ExecutionContext {
        match self.history.lock() {
            Ok(mut history) => {
                let entry = history.entry(fingerprint.to_string()).or_insert((0, None));
                entry.0 += 1;
                ExecutionContext {
                    attempt: entry.0,
                    previous_outcome: entry.1,
                }
            }
            Err(_) => ExecutionContext {
                attempt: 1,
                previous_outcome: None,
            },
        }
    }

    fn finish(&self, fingerprint: &str, outcome: Outcome) {
        if let Ok(mut history) = self.history.lock() {
            if let Some(entry) = history.get_mut(fingerprint) {
                entry.1 = Some(outcome);
            }
        }
    }

    /// Apply one action. Never returns an error: every failure mode maps to
    /// a FAILURE record.
    pub async fn execute(
        &self,
        action: &RemediationAction,
        shutdown: &Shutdown,
    ) -> ExecutionRecord {
        let fingerprint = action.fingerprint();
        let ctx = self.begin(&fingerprint);

        let invoke = self.surface.invoke(&action.kind, &action.params, &ctx);
        let (outcome, detail) = tokio::select! {
            biased;
            _ = shutdown.wait() => (Outcome::Failure, "cancelled".to_string()),
            res = tokio::time::timeout(self.timeout, invoke) => match res {
                Err(_) => (Outcome::Failure, "timeout".to_string()),
                Ok(Err(e)) => (Outcome::Failure, e.to_string()),
                Ok(Ok(inv)) if inv.success => (Outcome::Success, inv.detail),
                Ok(Ok(inv)) => (Outcome::Failure, inv.detail),
            },
        };
        self.finish(&fingerprint, outcome);

        if outcome == Outcome::Success {
            tracing::info!(
                action_kind = %action.kind,
                attempt = ctx.attempt,
                "action executed"
            );
        } else {
            tracing::warn!(
                failure = %FailureKind::ActionFailure,
                action_kind = %action.kind,
                attempt = ctx.attempt,
                detail = %detail,
                "action failed"
            );
        }

        ExecutionRecord {
            action: action.clone(),
            outcome,
            detail,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use crate::types::ParamValue;

    /// A worker pool that honours a `floor` param and refuses to go below it.
    struct WorkerPool {
        workers: Mutex<i64>,
        seen: Mutex<Vec<ExecutionContext>>,
    }

    #[async_trait]
    impl ExecutionSurface for WorkerPool {
        async fn invoke(
            &self,
            kind: &str,
            params: &ActionParams,
            ctx: &ExecutionContext,
        ) -> Result<Invocation> {
            assert_eq!(kind, "scale_down_workers");
            self.seen.lock().unwrap().push(ctx.clone());
            let floor = match params.get("floor") {
                Some(ParamValue::Int(f)) => *f,
                _ => 1,
            };
            let mut workers = self.workers.lock().unwrap();
            let before = *workers;
            *workers = (before - 2).max(floor);
            Ok(Invocation {
                success: true,
                detail: format!("workers {before} -> {}", *workers),
            })
        }
    }

    fn scale_down(floor: i64) -> RemediationAction {
        let mut params = ActionParams::new();
        params.insert("floor".into(), ParamValue::Int(floor));
        RemediationAction::from_rule("scale_down_workers", params)
    }

    #[tokio::test]
    async fn repeated_scale_down_clamps_at_floor() {
        let pool = Arc::new(WorkerPool {
            workers: Mutex::new(5),
            seen: Mutex::new(Vec::new()),
        });
        let exec = ActionExecutor::new(pool.clone(), Duration::from_secs(1));
        let action = scale_down(2);
        for _ in 0..4 {
            let rec = exec.execute(&action, &Shutdown::never()).await;
            assert_eq!(rec.outcome, Outcome::Success);
        }
        assert_eq!(*pool.workers.lock().unwrap(), 2);
        assert_eq!(exec.attempts(&action), 4);

        let seen = pool.seen.lock().unwrap();
        assert_eq!(seen[0].attempt, 1);
        assert_eq!(seen[0].previous_outcome, None);
        assert_eq!(seen[3].attempt, 4);
        assert_eq!(seen[3].previous_outcome, Some(Outcome::Success));
    }

    #[tokio::test]
    async fn different_params_are_tracked_separately() {
        let pool = Arc::new(WorkerPool {
            workers: Mutex::new(10),
            seen: Mutex::new(Vec::new()),
        });
        let exec = ActionExecutor::new(pool, Duration::from_secs(1));
        exec.execute(&scale_down(2), &Shutdown::never()).await;
        exec.execute(&scale_down(2), &Shutdown::never()).await;
        exec.execute(&scale_down(3), &Shutdown::never()).await;
        assert_eq!(exec.attempts(&scale_down(2)), 2);
        assert_eq!(exec.attempts(&scale_down(3)), 1);
    }

    #[tokio::test]
    async fn string_and_integer_params_are_tracked_separately() {
        let pool = Arc::new(WorkerPool {
            workers: Mutex::new(10),
            seen: Mutex::new(Vec::new()),
        });
        let exec = ActionExecutor::new(pool, Duration::from_secs(1));
        let mut params = ActionParams::new();
        params.insert("floor".into(), ParamValue::Str("2".into()));
        let as_string = RemediationAction::from_rule("scale_down_workers", params);

        exec.execute(&scale_down(2), &Shutdown::never()).await;
        let rec = exec.execute(&as_string, &Shutdown::never()).await;
        assert_eq!(rec.outcome, Outcome::Success);
        assert_eq!(exec.attempts(&scale_down(2)), 1);
        assert_eq!(exec.attempts(&as_string), 1);
    }

    struct Stalled;

    #[async_trait]
    impl ExecutionSurface for Stalled {
        async fn invoke(
            &self,
            _: &str,
            _: &ActionParams,
            _: &ExecutionContext,
        ) -> Result<Invocation> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Invocation {
                success: true,
                detail: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn timeout_is_failure_with_detail_timeout() {
        let exec = ActionExecutor::new(Arc::new(Stalled), Duration::from_millis(50));
        let rec = exec.execute(&scale_down(1), &Shutdown::never()).await;
        assert_eq!(rec.outcome, Outcome::Failure);
        assert_eq!(rec.detail, "timeout");
    }

    #[tokio::test]
    async fn shutdown_cancels_in_flight_execution() {
        let exec = ActionExecutor::new(Arc::new(Stalled), Duration::from_secs(30));
        let (trigger, shutdown) = shutdown::channel();
        let fire = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.fire();
            trigger
        });
        let rec = exec.execute(&scale_down(1), &shutdown).await;
        assert_eq!(rec.outcome, Outcome::Failure);
        assert_eq!(rec.detail, "cancelled");
        drop(fire.await.unwrap());
    }

    #[tokio::test]
    async fn command_surface_passes_params_and_context() {
        let routes = BTreeMap::from([(
            "scale_down_workers".to_string(),
            "read body; echo \"$MEDIC_ACTION_KIND floor=$MEDIC_PARAM_FLOOR attempt=$MEDIC_ATTEMPT prev=$MEDIC_PREVIOUS_OUTCOME $body\""
                .to_string(),
        )]);
        let exec = ActionExecutor::new(
            Arc::new(CommandSurface::new(routes, PathBuf::new())),
            Duration::from_secs(5),
        );
        let first = exec.execute(&scale_down(2), &Shutdown::never()).await;
        assert_eq!(first.outcome, Outcome::Success, "{}", first.detail);
        assert_eq!(
            first.detail,
            r#"scale_down_workers floor=2 attempt=1 prev=none {"floor":2}"#
        );
        let second = exec.execute(&scale_down(2), &Shutdown::never()).await;
        assert!(second.detail.contains("attempt=2 prev=success"), "{}", second.detail);
    }

    #[tokio::test]
    async fn command_surface_failures() {
        let routes = BTreeMap::from([("restart_service".to_string(), "echo nope >&2; exit 1".to_string())]);
        let exec = ActionExecutor::new(
            Arc::new(CommandSurface::new(routes, PathBuf::new())),
            Duration::from_secs(5),
        );
        let restart = RemediationAction::from_rule("restart_service", ActionParams::new());
        let rec = exec.execute(&restart, &Shutdown::never()).await;
        assert_eq!(rec.outcome, Outcome::Failure);
        assert_eq!(rec.detail, "exit code 1: nope");

        let unrouted = RemediationAction::from_rule("throttle_intake", ActionParams::new());
        let rec = exec.execute(&unrouted, &Shutdown::never()).await;
        assert_eq!(rec.outcome, Outcome::Failure);
        assert!(rec.detail.contains("no execution route"));
    }
}
