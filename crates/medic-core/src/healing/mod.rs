//! HealingLoop: the closed-loop remediation cycle.
//!
//! ```text
//! TelemetryReader ─► detect ─► RuleTable ──┐
//!                               │          ├─► PolicyGuard ─► ActionExecutor
//!                               └► Advisor ┘                      │
//!                                                                 ▼
//!                                           DecisionRecord ─► AuditSink
//! ```
//!
//! Exactly one DecisionRecord is sealed and persisted per cycle, including
//! cycles with no anomalies and cycles interrupted by shutdown.

mod detect;
mod rules;

pub use rules::{RemediationRule, RuleAction, RuleTable};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;

use crate::advisor::ReasoningAdvisor;
use crate::alert::{Alert, AlertSink};
use crate::audit::{AppendOutcome, AuditSink};
use crate::backoff::Backoff;
use crate::clock::Clock;
use crate::config::{Config, SignalConfig};
use crate::error::{MedicError, Result};
use crate::executor::ActionExecutor;
use crate::policy::PolicyGuard;
use crate::shutdown::Shutdown;
use crate::telemetry::TelemetryReader;
use crate::types::{
    Decision, DecisionDraft, DecisionRecord, ExecutionRecord, FailureKind, Outcome, Signal,
    SystemState,
};

use detect::{detect, History};

/// The loop's external collaborators.
pub struct Collaborators {
    pub reader: Arc<dyn TelemetryReader>,
    pub advisor: Arc<dyn ReasoningAdvisor>,
    pub executor: ActionExecutor,
    pub sink: Arc<dyn AuditSink>,
    pub alerts: Arc<dyn AlertSink>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub record: DecisionRecord,
    /// False when every persistence attempt failed and an alert was raised.
    pub persisted: bool,
}

pub struct HealingLoop {
    signals: Vec<SignalConfig>,
    rules: RuleTable,
    guard: PolicyGuard,
    confidence_floor: f64,
    interval: Duration,
    backoff: Backoff,
    reader: Arc<dyn TelemetryReader>,
    advisor: Arc<dyn ReasoningAdvisor>,
    executor: ActionExecutor,
    sink: Arc<dyn AuditSink>,
    alerts: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    history: Mutex<History>,
}

impl HealingLoop {
    /// Builds the loop and replays recent `Allow` verdicts from the sink into
    /// the policy ledger. Fails if the audit history cannot be read.
    pub fn new(cfg: &Config, parts: Collaborators) -> Result<Self> {
        let guard = PolicyGuard::new(cfg.policies.clone())?;
        let interval = Duration::from_secs(cfg.controller.cycle_interval_secs.max(1));
        restore_ledger(&guard, parts.sink.as_ref(), parts.clock.now(), interval)?;
        Ok(Self {
            signals: cfg.signals.clone(),
            rules: RuleTable::new(cfg.remediations.clone()),
            guard,
            confidence_floor: cfg.advisor.confidence_floor,
            interval,
            backoff: Backoff::from_audit(&cfg.audit),
            reader: parts.reader,
            advisor: parts.advisor,
            executor: parts.executor,
            sink: parts.sink,
            alerts: parts.alerts,
            clock: parts.clock,
            history: Mutex::new(History::new(cfg.controller.history_len)),
        })
    }

    /// Run cycles until shutdown. Missed ticks are delayed, never bunched.
    pub async fn run(&self, shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            signals = self.signals.len(),
            "healing loop started"
        );
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    self.run_cycle(&shutdown).await;
                }
            }
        }
        tracing::info!("healing loop stopped");
    }

    pub async fn run_cycle(&self, shutdown: &Shutdown) -> CycleReport {
        let mut draft = DecisionDraft::open(self.clock.now());
        let cycle_id = draft.cycle_id;

        if !self.observe_and_act(&mut draft, shutdown).await {
            draft.cancelled = true;
            tracing::warn!(%cycle_id, "cycle cancelled; persisting partial record");
        }

        let record = draft.seal(self.clock.now());
        let persisted = self.persist(&record).await;
        tracing::info!(
            %cycle_id,
            anomalies = record.anomalies.len(),
            candidates = record.candidates.len(),
            executed = record
                .executed
                .iter()
                .filter(|e| e.outcome != Outcome::Skipped)
                .count(),
            missing = record.missing_signals.len(),
            persisted,
            "cycle complete"
        );
        CycleReport { record, persisted }
    }

    /// Fill the draft. Returns `false` if shutdown interrupted the cycle.
    async fn observe_and_act(&self, draft: &mut DecisionDraft, shutdown: &Shutdown) -> bool {
        // 1. read every signal concurrently
        let reads = join_all(self.signals.iter().map(|s| self.read_one(s)));
        let results = tokio::select! {
            biased;
            _ = shutdown.wait() => return false,
            r = reads => r,
        };

        let mut readings: Vec<Signal> = Vec::new();
        for (cfg, result) in self.signals.iter().zip(results) {
            match result {
                Ok(signal) => readings.push(signal),
                Err(reason) => {
                    tracing::warn!(
                        cycle_id = %draft.cycle_id,
                        failure = %FailureKind::MissingSignal,
                        signal = %cfg.name,
                        reason = %reason,
                        "signal missing this cycle"
                    );
                    draft.missing_signals.push(cfg.name.clone());
                }
            }
        }
        let mut state = SystemState::default();
        for r in &readings {
            state.record(r);
        }

        // 2. classify
        let mut anomalies = detect(&self.signals, &readings);
        let histories: HashMap<String, Vec<_>> = match self.history.lock() {
            Ok(mut history) => {
                let snapshot = anomalies
                    .iter()
                    .map(|a| (a.signal.name.clone(), history.of(&a.signal.name)))
                    .collect();
                for r in &readings {
                    history.record(r);
                }
                snapshot
            }
            Err(_) => HashMap::new(),
        };

        // 3. candidates: rule table first, advisor only for unmatched
        //    HIGH/CRITICAL anomalies
        let mut cancelled = false;
        for anomaly in anomalies.iter_mut() {
            if let Some(action) = self.rules.candidate_for(anomaly) {
                draft.candidates.push(action);
                continue;
            }
            if cancelled || !anomaly.severity.warrants_advice() {
                continue;
            }
            let history = histories
                .get(&anomaly.signal.name)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let suggestions = tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    cancelled = true;
                    continue;
                }
                s = self.advisor.suggest(anomaly, history) => s,
            };
            match suggestions
                .into_iter()
                .find(|s| s.confidence >= self.confidence_floor)
            {
                Some(action) => draft.candidates.push(action),
                None => tracing::debug!(
                    cycle_id = %draft.cycle_id,
                    signal = %anomaly.signal.name,
                    floor = self.confidence_floor,
                    "no advisory candidate at or above the confidence floor"
                ),
            }
        }
        draft.anomalies = anomalies;

        // 4. gate every candidate, then execute what was allowed. A cancelled
        //    cycle books nothing in the policy ledger.
        if cancelled || shutdown.is_fired() {
            for action in &draft.candidates {
                draft.executed.push(ExecutionRecord {
                    action: action.clone(),
                    outcome: Outcome::Skipped,
                    detail: "cancelled before policy evaluation".to_string(),
                });
            }
            return false;
        }
        for action in &draft.candidates {
            draft
                .verdicts
                .push(self.guard.evaluate(action, &state, self.clock.now()));
        }

        let allowed: Vec<_> = draft
            .verdicts
            .iter()
            .filter(|v| v.decision == Decision::Allow)
            .map(|v| &v.action)
            .collect();
        let outcomes =
            join_all(allowed.iter().map(|a| self.executor.execute(a, shutdown))).await;
        let mut outcomes = outcomes.into_iter();

        for verdict in &draft.verdicts {
            let record = match verdict.decision {
                Decision::Allow => match outcomes.next() {
                    Some(done) => done,
                    None => ExecutionRecord {
                        action: verdict.action.clone(),
                        outcome: Outcome::Skipped,
                        detail: "cancelled before execution".to_string(),
                    },
                },
                Decision::Deny | Decision::Defer => ExecutionRecord {
                    action: verdict.action.clone(),
                    outcome: Outcome::Skipped,
                    detail: format!("{}: {}", verdict.decision, verdict.reason),
                },
            };
            draft.executed.push(record);
        }

        !shutdown.is_fired()
    }

    async fn read_one(&self, cfg: &SignalConfig) -> std::result::Result<Signal, String> {
        let window = Duration::from_secs(cfg.window_secs);
        let limit = Duration::from_millis(cfg.read_timeout_ms);
        match tokio::time::timeout(limit, self.reader.read_signal(&cfg.name, window)).await {
            Err(_) => Err(format!("no reading within {}ms", cfg.read_timeout_ms)),
            Ok(Err(e)) => Err(e.to_string()),
            Ok(Ok(signal)) if !signal.value.is_finite() => {
                Err(format!("non-finite value {}", signal.value))
            }
            Ok(Ok(signal)) => Ok(signal),
        }
    }

    /// Append with bounded retries. Never fails the loop: exhaustion raises
    /// a PersistenceFailure alert and returns `false`.
    async fn persist(&self, record: &DecisionRecord) -> bool {
        let mut last_error = String::new();
        for attempt in 1..=self.backoff.attempts {
            let sink = Arc::clone(&self.sink);
            let owned = record.clone();
            let result = tokio::task::spawn_blocking(move || sink.append_decision(&owned))
                .await
                .map_err(|e| MedicError::AuditStore(format!("append task failed: {e}")))
                .and_then(|r| r);
            match result {
                Ok(AppendOutcome::Inserted) => return true,
                Ok(AppendOutcome::AlreadyPresent) => {
                    tracing::debug!(cycle_id = %record.cycle_id, "decision already recorded");
                    return true;
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(
                        cycle_id = %record.cycle_id,
                        failure = %FailureKind::PersistenceFailure,
                        attempt,
                        error = %e,
                        "failed to persist decision record"
                    );
                }
            }
            if attempt < self.backoff.attempts {
                tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
            }
        }

        self.alerts
            .raise(Alert::new(
                FailureKind::PersistenceFailure,
                record.cycle_id.to_string(),
                format!(
                    "decision record dropped after {} attempts: {last_error}",
                    self.backoff.attempts
                ),
                self.clock.now(),
            ))
            .await;
        false
    }
}

/// Seed `guard` with the runs it allowed before this process started.
fn restore_ledger(
    guard: &PolicyGuard,
    sink: &dyn AuditSink,
    now: DateTime<Utc>,
    interval: Duration,
) -> Result<()> {
    let horizon = guard.horizon();
    if horizon.is_zero() {
        return Ok(());
    }
    // Records are keyed by cycle start; verdicts land later in the cycle.
    let slack = chrono::Duration::from_std(interval.saturating_mul(2))
        .unwrap_or_else(|_| chrono::Duration::zero());
    let lookback = horizon.checked_add(&slack).unwrap_or(horizon);
    let since = now
        .checked_sub_signed(lookback)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let records = sink.decisions_since(since)?;
    let runs: Vec<_> = records
        .iter()
        .flat_map(|r| r.verdicts.iter())
        .filter(|v| v.decision == Decision::Allow)
        .map(|v| (v.action.kind.clone(), v.evaluated_at))
        .collect();
    tracing::info!(
        records = records.len(),
        runs = runs.len(),
        since = %since,
        "policy ledger restored from audit log"
    );
    guard.restore(runs);
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
