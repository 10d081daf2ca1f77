//! PolicyGuard: the deterministic gate every candidate action passes.
//!
//! Posture is default-deny. An action executes only when a rule matches its
//! kind, the rule's constraint holds against the current system state, the
//! kind is out of cooldown and the trailing window has headroom.
//!
//! Evaluation order:
//! 1. no matching rule → `Deny`
//! 2. constraint false → `Deny`
//! 3. cooldown not elapsed since the last allowed run of the kind → `Defer`
//! 4. `max_actions_per_window` already reached in the trailing window → `Deny`
//! 5. otherwise `Allow`, and the run is booked in the rate ledger
//!
//! Steps 3–5 happen under one lock on the ledger, so two concurrent
//! evaluations of the same kind cannot both see headroom.
//!
//! The ledger lives in memory. On startup the owner replays recent `Allow`
//! verdicts from the audit log through [`PolicyGuard::restore`], so a restart
//! does not reset cooldowns or windows.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::clock::span;
use crate::error::{MedicError, Result};
use crate::types::{Decision, PolicyVerdict, RemediationAction, SystemState};

// ---------------------------------------------------------------------------
// Constraint
// ---------------------------------------------------------------------------

/// Predicate over the current system state. A constraint that references a
/// signal missing from the state evaluates to `false`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    #[default]
    Always,
    Above {
        signal: String,
        value: f64,
    },
    Below {
        signal: String,
        value: f64,
    },
    Present {
        signal: String,
    },
    AllOf {
        of: Vec<Constraint>,
    },
    AnyOf {
        of: Vec<Constraint>,
    },
    Not {
        of: Box<Constraint>,
    },
}

impl Constraint {
    pub fn holds(&self, state: &SystemState) -> bool {
        match self {
            Constraint::Always => true,
            Constraint::Above { signal, value } => {
                state.value(signal).is_some_and(|v| v > *value)
            }
            Constraint::Below { signal, value } => {
                state.value(signal).is_some_and(|v| v < *value)
            }
            Constraint::Present { signal } => state.value(signal).is_some(),
            Constraint::AllOf { of } => of.iter().all(|c| c.holds(state)),
            Constraint::AnyOf { of } => of.iter().any(|c| c.holds(state)),
            Constraint::Not { of } => !of.holds(state),
        }
    }
}

// ---------------------------------------------------------------------------
// KindMatcher
// ---------------------------------------------------------------------------

/// Compiled form of `PolicyRule::applies_to`.
///
/// - `scale_down_workers` matches exactly
/// - `scale_*` is a glob (`*` spans any characters)
/// - `re:^(restart|reload)_service$` is a regular expression
#[derive(Debug, Clone)]
pub enum KindMatcher {
    Exact(String),
    Pattern(Regex),
}

impl KindMatcher {
    pub fn compile(applies_to: &str) -> Result<Self> {
        if let Some(expr) = applies_to.strip_prefix("re:") {
            let re = Regex::new(&format!("^(?:{expr})$")).map_err(|e| {
                MedicError::InvalidConfig(format!("bad applies_to regex '{expr}': {e}"))
            })?;
            return Ok(Self::Pattern(re));
        }
        if applies_to.contains('*') {
            let body = applies_to
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*");
            let re = Regex::new(&format!("^{body}$")).map_err(|e| {
                MedicError::InvalidConfig(format!("bad applies_to glob '{applies_to}': {e}"))
            })?;
            return Ok(Self::Pattern(re));
        }
        Ok(Self::Exact(applies_to.to_string()))
    }

    pub fn matches(&self, kind: &str) -> bool {
        match self {
            KindMatcher::Exact(k) => k == kind,
            KindMatcher::Pattern(re) => re.is_match(kind),
        }
    }
}

// ---------------------------------------------------------------------------
// PolicyRule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyRule {
    pub id: String,
    pub applies_to: String,
    #[serde(default)]
    pub constraint: Constraint,
    pub max_actions_per_window: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default)]
    pub cooldown_seconds: u64,
}

fn default_window_secs() -> u64 {
    3600
}

struct CompiledRule {
    rule: PolicyRule,
    matcher: KindMatcher,
}

// ---------------------------------------------------------------------------
// Rate ledger
// ---------------------------------------------------------------------------

/// Allowed runs of one action kind, oldest first.
#[derive(Debug, Default)]
struct KindLedger {
    runs: VecDeque<DateTime<Utc>>,
}

impl KindLedger {
    fn prune(&mut self, now: DateTime<Utc>, keep: Duration) {
        while let Some(front) = self.runs.front() {
            if now - *front >= keep {
                self.runs.pop_front();
            } else {
                break;
            }
        }
    }

    fn last(&self) -> Option<DateTime<Utc>> {
        self.runs.back().copied()
    }

    fn count_within(&self, now: DateTime<Utc>, window: Duration) -> usize {
        self.runs.iter().filter(|t| now - **t < window).count()
    }
}

// ---------------------------------------------------------------------------
// PolicyGuard
// ---------------------------------------------------------------------------

pub struct PolicyGuard {
    rules: Vec<CompiledRule>,
    ledger: Mutex<HashMap<String, KindLedger>>,
}

impl PolicyGuard {
    /// Compile the rule table. Fails only on an unparsable `applies_to`.
    pub fn new(rules: Vec<PolicyRule>) -> Result<Self> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let matcher = KindMatcher::compile(&rule.applies_to)?;
                Ok(CompiledRule { rule, matcher })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            rules,
            ledger: Mutex::new(HashMap::new()),
        })
    }

    /// How far back allowed runs can still affect a verdict: the longest
    /// window or cooldown of any rule. Out-of-range rules are ignored.
    pub fn horizon(&self) -> Duration {
        self.rules
            .iter()
            .flat_map(|c| [c.rule.window_secs, c.rule.cooldown_seconds])
            .filter_map(span)
            .max()
            .unwrap_or_else(Duration::zero)
    }

    /// Book previously allowed runs, e.g. replayed from the audit log.
    /// Runs may arrive in any order.
    pub fn restore(&self, runs: impl IntoIterator<Item = (String, DateTime<Utc>)>) {
        let Ok(mut ledger) = self.ledger.lock() else {
            return;
        };
        let mut restored = 0usize;
        for (kind, at) in runs {
            let entry = ledger.entry(kind).or_default();
            let pos = entry.runs.partition_point(|t| *t <= at);
            entry.runs.insert(pos, at);
            restored += 1;
        }
        tracing::debug!(restored, kinds = ledger.len(), "policy ledger restored");
    }

    /// First rule (in configuration order) whose matcher accepts `kind`.
    pub fn rule_for(&self, kind: &str) -> Option<&PolicyRule> {
        self.rules
            .iter()
            .find(|c| c.matcher.matches(kind))
            .map(|c| &c.rule)
    }

    pub fn evaluate(
        &self,
        action: &RemediationAction,
        state: &SystemState,
        now: DateTime<Utc>,
    ) -> PolicyVerdict {
        let (decision, reason) = self.decide(action, state, now);
        tracing::debug!(
            action_kind = %action.kind,
            decision = %decision,
            reason = %reason,
            "policy evaluated"
        );
        PolicyVerdict {
            action: action.clone(),
            decision,
            reason,
            evaluated_at: now,
        }
    }

    fn decide(
        &self,
        action: &RemediationAction,
        state: &SystemState,
        now: DateTime<Utc>,
    ) -> (Decision, String) {
        let Some(rule) = self.rule_for(&action.kind) else {
            return (
                Decision::Deny,
                format!("no policy rule matches action kind '{}'", action.kind),
            );
        };

        if !rule.constraint.holds(state) {
            return (
                Decision::Deny,
                format!("constraint of rule '{}' not satisfied", rule.id),
            );
        }

        let (Some(window), Some(cooldown)) = (span(rule.window_secs), span(rule.cooldown_seconds))
        else {
            return (
                Decision::Deny,
                format!("window or cooldown of rule '{}' is out of range", rule.id),
            );
        };

        let Ok(mut ledger) = self.ledger.lock() else {
            return (Decision::Deny, "rate ledger unavailable".to_string());
        };
        let entry = ledger.entry(action.kind.clone()).or_default();
        entry.prune(now, window.max(cooldown));

        if let Some(last) = entry.last() {
            let since = now - last;
            if since < cooldown {
                let remaining = (cooldown - since).num_seconds().max(1);
                return (
                    Decision::Defer,
                    format!(
                        "cooldown of rule '{}' active: {remaining}s remaining",
                        rule.id
                    ),
                );
            }
        }

        let used = entry.count_within(now, window);
        if used >= rule.max_actions_per_window as usize {
            return (
                Decision::Deny,
                format!(
                    "rule '{}' allows {} action(s) per {}s; {used} already taken",
                    rule.id, rule.max_actions_per_window, rule.window_secs
                ),
            );
        }

        entry.runs.push_back(now);
        (Decision::Allow, format!("allowed by rule '{}'", rule.id))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
