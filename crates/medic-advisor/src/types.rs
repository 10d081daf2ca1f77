use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── AdvisorOptions ───────────────────────────────────────────────────────

/// How to launch the reasoning process.
#[derive(Debug, Clone)]
pub struct AdvisorOptions {
    /// Executable to spawn (resolved through `PATH`).
    pub command: String,
    pub args: Vec<String>,
    /// Extra environment passed to the child.
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    /// Hard upper bound on a single consultation, spawn to exit.
    pub timeout: Duration,
}

impl AdvisorOptions {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            timeout: Duration::from_secs(10),
        }
    }
}

// ─── AdviceRequest ────────────────────────────────────────────────────────

/// One observation of the anomalous signal, oldest first in a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}

/// The single JSON line written to the advisor's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdviceRequest {
    pub signal: String,
    pub value: f64,
    pub unit: String,
    /// Lowercase severity name (`low`, `medium`, `high`, `critical`).
    pub severity: String,
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub history: Vec<HistoryPoint>,
    /// Action kinds the controller knows how to execute. Suggestions outside
    /// this set are still returned; the policy gate decides what happens.
    #[serde(default)]
    pub known_kinds: Vec<String>,
}

// ─── Suggestion ───────────────────────────────────────────────────────────

/// A candidate remediation proposed by the advisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub kind: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}
