//! ReasoningAdvisor: advisory candidates for anomalies no rule covers.
//!
//! Output is never authoritative. Every suggestion becomes a
//! `RemediationAction` with `source: advisor` and goes through the same
//! PolicyGuard gate as rule-table actions. All failures collapse to an empty
//! sequence.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use medic_advisor::{AdviceRequest, AdvisorOptions, HistoryPoint, Suggestion};

use crate::config::Config;
use crate::types::{ActionParams, Anomaly, FailureKind, ParamValue, RemediationAction};

#[async_trait]
pub trait ReasoningAdvisor: Send + Sync {
    /// Candidates ordered by confidence, highest first. Empty on any failure.
    async fn suggest(&self, anomaly: &Anomaly, history: &[HistoryPoint])
        -> Vec<RemediationAction>;
}

pub fn advisor_from_config(cfg: &Config) -> Arc<dyn ReasoningAdvisor> {
    if !cfg.advisor.enabled {
        return Arc::new(NullAdvisor);
    }
    let mut opts = AdvisorOptions::new(cfg.advisor.command.clone());
    opts.args = cfg.advisor.args.clone();
    opts.timeout = Duration::from_millis(cfg.advisor.timeout_ms);
    if !cfg.base_dir.as_os_str().is_empty() {
        opts.cwd = Some(cfg.base_dir.clone());
    }
    let known_kinds = cfg.executor.actions.keys().cloned().collect();
    Arc::new(ProcessAdvisor::new(opts, known_kinds))
}

/// Used when no advisor is configured.
pub struct NullAdvisor;

#[async_trait]
impl ReasoningAdvisor for NullAdvisor {
    async fn suggest(&self, _: &Anomaly, _: &[HistoryPoint]) -> Vec<RemediationAction> {
        Vec::new()
    }
}

/// Consults an external reasoning process through `medic-advisor`.
pub struct ProcessAdvisor {
    opts: AdvisorOptions,
    known_kinds: Vec<String>,
}

impl ProcessAdvisor {
    pub fn new(opts: AdvisorOptions, known_kinds: Vec<String>) -> Self {
        Self { opts, known_kinds }
    }
}

#[async_trait]
impl ReasoningAdvisor for ProcessAdvisor {
    async fn suggest(
        &self,
        anomaly: &Anomaly,
        history: &[HistoryPoint],
    ) -> Vec<RemediationAction> {
        let request = AdviceRequest {
            signal: anomaly.signal.name.clone(),
            value: anomaly.signal.value,
            unit: anomaly.signal.unit.clone(),
            severity: anomaly.severity.as_str().to_string(),
            observed_at: anomaly.signal.observed_at,
            history: history.to_vec(),
            known_kinds: self.known_kinds.clone(),
        };
        match medic_advisor::consult(&self.opts, &request).await {
            Ok(suggestions) => suggestions.into_iter().filter_map(into_action).collect(),
            Err(e) => {
                tracing::warn!(
                    failure = %FailureKind::AdvisorUnavailable,
                    signal = %anomaly.signal.name,
                    error = %e,
                    "advisor unavailable; no advisory candidates"
                );
                Vec::new()
            }
        }
    }
}

/// Convert a ranked suggestion. Suggestions with an empty kind or a
/// non-primitive parameter are dropped.
fn into_action(s: Suggestion) -> Option<RemediationAction> {
    if s.kind.trim().is_empty() {
        return None;
    }
    let mut params = ActionParams::new();
    for (k, v) in &s.params {
        let Some(p) = ParamValue::from_json(v) else {
            tracing::debug!(kind = %s.kind, param = %k, "dropping suggestion with compound param");
            return None;
        };
        params.insert(k.clone(), p);
    }
    Some(RemediationAction::from_advisor(s.kind, params, s.confidence))
}
