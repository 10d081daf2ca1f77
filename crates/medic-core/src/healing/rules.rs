use serde::{Deserialize, Serialize};

use crate::types::{ActionParams, Anomaly, RemediationAction, Severity};

/// One row of the static remediation table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationRule {
    pub id: String,
    pub signal: String,
    /// Lowest severity this rule responds to.
    #[serde(default)]
    pub min_severity: Severity,
    pub action: RuleAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleAction {
    pub kind: String,
    #[serde(default)]
    pub params: ActionParams,
}

/// Deterministic, in-memory lookup. First rule in configuration order wins.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<RemediationRule>,
}

impl RuleTable {
    pub fn new(rules: Vec<RemediationRule>) -> Self {
        Self { rules }
    }

    pub fn lookup(&self, signal: &str, severity: Severity) -> Option<&RemediationRule> {
        self.rules
            .iter()
            .find(|r| r.signal == signal && severity >= r.min_severity)
    }

    /// Candidate for `anomaly`, tagging the anomaly with the rule id.
    pub fn candidate_for(&self, anomaly: &mut Anomaly) -> Option<RemediationAction> {
        let rule = self.lookup(&anomaly.signal.name, anomaly.severity)?;
        anomaly.rule_id = Some(rule.id.clone());
        Some(RemediationAction::from_rule(
            rule.action.kind.clone(),
            rule.action.params.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActionSource, Signal};
    use chrono::Utc;

    fn table() -> RuleTable {
        let yaml = r#"
- id: cpu-critical
  signal: cpu_util
  min_severity: critical
  action: { kind: scale_down_workers, params: { floor: 2 } }
- id: cpu-any
  signal: cpu_util
  action: { kind: throttle_intake }
"#;
        RuleTable::new(serde_yaml::from_str(yaml).unwrap())
    }

    #[test]
    fn first_rule_at_or_below_severity_wins() {
        let t = table();
        assert_eq!(t.lookup("cpu_util", Severity::Critical).unwrap().id, "cpu-critical");
        assert_eq!(t.lookup("cpu_util", Severity::High).unwrap().id, "cpu-any");
        assert!(t.lookup("p99_latency", Severity::Critical).is_none());
    }

    #[test]
    fn candidate_tags_anomaly() {
        let mut anomaly = Anomaly {
            signal: Signal {
                name: "cpu_util".into(),
                value: 95.0,
                unit: "percent".into(),
                observed_at: Utc::now(),
            },
            severity: Severity::Critical,
            rule_id: None,
        };
        let action = table().candidate_for(&mut anomaly).unwrap();
        assert_eq!(action.kind, "scale_down_workers");
        assert_eq!(action.source, ActionSource::Rule);
        assert_eq!(action.confidence, 1.0);
        assert_eq!(anomaly.rule_id.as_deref(), Some("cpu-critical"));
    }
}
