use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Anomaly severity. Variant order is the ranking: `Low < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Threshold evaluation order: the first match wins.
    pub const PRIORITY: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Severities at which the reasoning advisor may be consulted.
    pub fn warrants_advice(&self) -> bool {
        *self >= Severity::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Signal / Anomaly / SystemState
// ---------------------------------------------------------------------------

/// One reading of a named health signal. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub signal: Signal,
    pub severity: Severity,
    /// Id of the static remediation rule that matched, if any.
    pub rule_id: Option<String>,
}

/// The signal values observed in the current cycle, as seen by policy
/// constraints. Signals read as MISSING are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    pub signals: BTreeMap<String, f64>,
}

impl SystemState {
    pub fn value(&self, signal: &str) -> Option<f64> {
        self.signals.get(signal).copied()
    }

    pub fn record(&mut self, signal: &Signal) {
        self.signals.insert(signal.name.clone(), signal.value);
    }
}

// ---------------------------------------------------------------------------
// RemediationAction
// ---------------------------------------------------------------------------

/// A primitive action parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    /// Convert a JSON value, rejecting null, arrays and objects.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float)),
            serde_json::Value::String(s) => Some(Self::Str(s.clone())),
            _ => None,
        }
    }

    /// Type-tagged rendering: `Str("1")`, `Int(1)` and `Float(1.0)` differ.
    fn canonical(&self) -> String {
        match self {
            ParamValue::Bool(b) => format!("b:{b}"),
            ParamValue::Int(i) => format!("i:{i}"),
            ParamValue::Float(x) => format!("f:{x:?}"),
            ParamValue::Str(s) => format!("s:{s:?}"),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(x) => write!(f, "{x}"),
            ParamValue::Str(s) => f.write_str(s),
        }
    }
}

/// Ordered so that serialization and fingerprints are deterministic.
pub type ActionParams = BTreeMap<String, ParamValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSource {
    Rule,
    Advisor,
}

/// A proposed remediation. Immutable once created: every field is set at
/// construction and nothing in the controller hands out `&mut` to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationAction {
    pub kind: String,
    #[serde(default)]
    pub params: ActionParams,
    pub source: ActionSource,
    /// In `[0, 1]`. Rule-table actions always carry `1.0`.
    pub confidence: f64,
}

impl RemediationAction {
    pub fn from_rule(kind: impl Into<String>, params: ActionParams) -> Self {
        Self {
            kind: kind.into(),
            params,
            source: ActionSource::Rule,
            confidence: 1.0,
        }
    }

    pub fn from_advisor(kind: impl Into<String>, params: ActionParams, confidence: f64) -> Self {
        Self {
            kind: kind.into(),
            params,
            source: ActionSource::Advisor,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Identity of "the same action": kind plus type-tagged parameters.
    pub fn fingerprint(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{k:?}={}", v.canonical()))
            .collect();
        format!("{}({})", self.kind, params.join(","))
    }

    /// Human-readable form, e.g. `scale_down_workers(floor=2)`. Strings are
    /// quoted.
    pub fn label(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| match v {
                ParamValue::Str(s) => format!("{k}={s:?}"),
                other => format!("{k}={other}"),
            })
            .collect();
        format!("{}({})", self.kind, params.join(","))
    }
}

// ---------------------------------------------------------------------------
// PolicyVerdict
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
    /// Try again later, not never.
    Defer,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Decision::Allow => "allow",
            Decision::Deny => "deny",
            Decision::Defer => "defer",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub action: RemediationAction,
    pub decision: Decision,
    pub reason: String,
    pub evaluated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Execution outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Skipped,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Skipped => "skipped",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub action: RemediationAction,
    pub outcome: Outcome,
    pub detail: String,
}

// ---------------------------------------------------------------------------
// DecisionRecord
// ---------------------------------------------------------------------------

/// The sealed audit unit for one healing cycle.
///
/// Built through [`DecisionDraft`] during the cycle; once sealed there is no
/// API that changes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub cycle_id: Uuid,
    pub anomalies: Vec<Anomaly>,
    pub candidates: Vec<RemediationAction>,
    pub verdicts: Vec<PolicyVerdict>,
    pub executed: Vec<ExecutionRecord>,
    /// Signals that could not be read this cycle.
    #[serde(default)]
    pub missing_signals: Vec<String>,
    /// Set when shutdown interrupted the cycle; the record holds whatever
    /// completed before that.
    #[serde(default)]
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// An open, in-progress decision record owned by the running cycle.
#[derive(Debug)]
pub struct DecisionDraft {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub anomalies: Vec<Anomaly>,
    pub candidates: Vec<RemediationAction>,
    pub verdicts: Vec<PolicyVerdict>,
    pub executed: Vec<ExecutionRecord>,
    pub missing_signals: Vec<String>,
    pub cancelled: bool,
}

impl DecisionDraft {
    pub fn open(started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            started_at,
            anomalies: Vec::new(),
            candidates: Vec::new(),
            verdicts: Vec::new(),
            executed: Vec::new(),
            missing_signals: Vec::new(),
            cancelled: false,
        }
    }

    pub fn seal(self, finished_at: DateTime<Utc>) -> DecisionRecord {
        DecisionRecord {
            cycle_id: self.cycle_id,
            anomalies: self.anomalies,
            candidates: self.candidates,
            verdicts: self.verdicts,
            executed: self.executed,
            missing_signals: self.missing_signals,
            cancelled: self.cancelled,
            started_at: self.started_at,
            finished_at,
        }
    }
}

// ---------------------------------------------------------------------------
// FailureKind
// ---------------------------------------------------------------------------

/// Operator-facing failure taxonomy. None of these stop a cycle or a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MissingSignal,
    AdvisorUnavailable,
    ActionFailure,
    PersistenceFailure,
    PolicyMisconfiguration,
    PartitionArchiveFailure,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::MissingSignal => "missing_signal",
            FailureKind::AdvisorUnavailable => "advisor_unavailable",
            FailureKind::ActionFailure => "action_failure",
            FailureKind::PersistenceFailure => "persistence_failure",
            FailureKind::PolicyMisconfiguration => "policy_misconfiguration",
            FailureKind::PartitionArchiveFailure => "partition_archive_failure",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_and_priority() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::PRIORITY[0], Severity::Critical);
        assert!(Severity::High.warrants_advice());
        assert!(!Severity::Medium.warrants_advice());
    }

    #[test]
    fn param_value_from_json_rejects_compound_values() {
        assert_eq!(
            ParamValue::from_json(&serde_json::json!(3)),
            Some(ParamValue::Int(3))
        );
        assert_eq!(
            ParamValue::from_json(&serde_json::json!(0.5)),
            Some(ParamValue::Float(0.5))
        );
        assert_eq!(ParamValue::from_json(&serde_json::json!(null)), None);
        assert_eq!(ParamValue::from_json(&serde_json::json!([1, 2])), None);
        assert_eq!(ParamValue::from_json(&serde_json::json!({"a": 1})), None);
    }

    #[test]
    fn params_deserialize_untagged_from_yaml() {
        let yaml = "floor: 2\nreason: load\nforce: true\nratio: 0.25\n";
        let params: ActionParams = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(params["floor"], ParamValue::Int(2));
        assert_eq!(params["reason"], ParamValue::Str("load".into()));
        assert_eq!(params["force"], ParamValue::Bool(true));
        assert_eq!(params["ratio"], ParamValue::Float(0.25));
    }

    #[test]
    fn fingerprint_is_order_independent() {
        let mut a = ActionParams::new();
        a.insert("b".into(), ParamValue::Int(1));
        a.insert("a".into(), ParamValue::Int(2));
        let mut b = ActionParams::new();
        b.insert("a".into(), ParamValue::Int(2));
        b.insert("b".into(), ParamValue::Int(1));
        let x = RemediationAction::from_rule("scale_down_workers", a);
        let y = RemediationAction::from_rule("scale_down_workers", b);
        assert_eq!(x.fingerprint(), y.fingerprint());
        assert_eq!(x.label(), "scale_down_workers(a=2,b=1)");
    }

    #[test]
    fn fingerprint_distinguishes_param_types() {
        let with = |v: ParamValue| {
            let mut p = ActionParams::new();
            p.insert("floor".into(), v);
            RemediationAction::from_rule("scale_down_workers", p).fingerprint()
        };
        let prints = [
            with(ParamValue::Str("1".into())),
            with(ParamValue::Int(1)),
            with(ParamValue::Float(1.0)),
            with(ParamValue::Str("true".into())),
            with(ParamValue::Bool(true)),
        ];
        for (i, a) in prints.iter().enumerate() {
            for b in &prints[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn fingerprint_is_not_fooled_by_separators_in_strings() {
        let mut one = ActionParams::new();
        one.insert("a".into(), ParamValue::Str("x,b=i:1".into()));
        let mut two = ActionParams::new();
        two.insert("a".into(), ParamValue::Str("x".into()));
        two.insert("b".into(), ParamValue::Int(1));
        let x = RemediationAction::from_rule("k", one);
        let y = RemediationAction::from_rule("k", two);
        assert_ne!(x.fingerprint(), y.fingerprint());
        assert_eq!(x.label(), "k(a=\"x,b=i:1\")");
    }

    #[test]
    fn advisor_confidence_is_clamped() {
        let a = RemediationAction::from_advisor("restart_service", ActionParams::new(), 1.4);
        assert_eq!(a.confidence, 1.0);
        assert_eq!(a.source, ActionSource::Advisor);
    }

    #[test]
    fn sealed_draft_keeps_cycle_identity() {
        let start = Utc::now();
        let mut draft = DecisionDraft::open(start);
        draft.missing_signals.push("cpu_util".into());
        let id = draft.cycle_id;
        let record = draft.seal(start + chrono::Duration::seconds(1));
        assert_eq!(record.cycle_id, id);
        assert_eq!(record.missing_signals, vec!["cpu_util".to_string()]);
        assert!(record.anomalies.is_empty());
        assert!(!record.cancelled);
    }

    #[test]
    fn decision_record_json_uses_snake_case_enums() {
        let start = Utc::now();
        let mut draft = DecisionDraft::open(start);
        let action = RemediationAction::from_rule("restart_service", ActionParams::new());
        draft.executed.push(ExecutionRecord {
            action,
            outcome: Outcome::Skipped,
            detail: "defer: cooldown".into(),
        });
        let json = serde_json::to_string(&draft.seal(start)).unwrap();
        assert!(json.contains("\"outcome\":\"skipped\""));
        assert!(json.contains("\"source\":\"rule\""));
    }
}
