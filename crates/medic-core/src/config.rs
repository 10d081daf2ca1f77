use crate::clock::MAX_SPAN_SECS;
use crate::error::{MedicError, Result};
use crate::healing::RemediationRule;
use crate::policy::{KindMatcher, PolicyRule};
use crate::types::Severity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "medic.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ControllerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,
    /// Readings per signal kept in memory as advisor history.
    #[serde(default = "default_history_len")]
    pub history_len: usize,
}

fn default_cycle_interval() -> u64 {
    60
}

fn default_history_len() -> usize {
    20
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval(),
            history_len: default_history_len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Signals and thresholds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    #[serde(alias = ">=")]
    Gte,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = "<=")]
    Lte,
    #[serde(alias = "<")]
    Lt,
}

impl Comparison {
    fn rising(&self) -> bool {
        matches!(self, Comparison::Gte | Comparison::Gt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub op: Comparison,
    pub value: f64,
}

impl Threshold {
    pub fn matches(&self, observed: f64) -> bool {
        match self.op {
            Comparison::Gte => observed >= self.value,
            Comparison::Gt => observed > self.value,
            Comparison::Lte => observed <= self.value,
            Comparison::Lt => observed < self.value,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical: Option<Threshold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<Threshold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<Threshold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<Threshold>,
}

impl Thresholds {
    pub fn get(&self, severity: Severity) -> Option<&Threshold> {
        match severity {
            Severity::Critical => self.critical.as_ref(),
            Severity::High => self.high.as_ref(),
            Severity::Medium => self.medium.as_ref(),
            Severity::Low => self.low.as_ref(),
        }
    }

    /// Severity of the first threshold crossed, walking CRITICAL down to LOW.
    /// NaN never crosses anything.
    pub fn classify(&self, observed: f64) -> Option<Severity> {
        if observed.is_nan() {
            return None;
        }
        Severity::PRIORITY
            .into_iter()
            .find(|sev| self.get(*sev).is_some_and(|t| t.matches(observed)))
    }

    /// True when configured thresholds tighten monotonically from LOW to
    /// CRITICAL in the direction of their comparison.
    fn is_monotone(&self) -> bool {
        let set: Vec<&Threshold> = Severity::PRIORITY
            .iter()
            .filter_map(|sev| self.get(*sev))
            .collect();
        set.windows(2).all(|pair| {
            let (hi, lo) = (pair[0], pair[1]);
            if hi.op.rising() != lo.op.rising() {
                return false;
            }
            if hi.op.rising() {
                hi.value >= lo.value
            } else {
                hi.value <= lo.value
            }
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default = "default_signal_window")]
    pub window_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    #[serde(default)]
    pub thresholds: Thresholds,
}

fn default_signal_window() -> u64 {
    60
}

fn default_read_timeout() -> u64 {
    5000
}

// ---------------------------------------------------------------------------
// AdvisorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_advisor_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
}

fn default_advisor_timeout() -> u64 {
    10_000
}

fn default_confidence_floor() -> f64 {
    0.6
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: String::new(),
            args: Vec::new(),
            timeout_ms: default_advisor_timeout(),
            confidence_floor: default_confidence_floor(),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_executor_timeout")]
    pub timeout_ms: u64,
    /// Action kind → shell command run through `sh -c`.
    #[serde(default)]
    pub actions: BTreeMap<String, String>,
}

fn default_executor_timeout() -> u64 {
    30_000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_executor_timeout(),
            actions: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// TelemetryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryConfig {
    /// One shell probe per signal; stdout's first token is the value.
    Command {
        #[serde(default)]
        probes: BTreeMap<String, String>,
    },
    /// Instant queries against a Prometheus-compatible HTTP API. `{window}`
    /// in a query expands to the signal's window, e.g. `60s`.
    Prometheus {
        base_url: String,
        #[serde(default)]
        queries: BTreeMap<String, String>,
    },
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig::Command {
            probes: BTreeMap::new(),
        }
    }
}

impl TelemetryConfig {
    fn covers(&self, signal: &str) -> bool {
        match self {
            TelemetryConfig::Command { probes } => probes.contains_key(signal),
            TelemetryConfig::Prometheus { queries, .. } => queries.contains_key(signal),
        }
    }
}

// ---------------------------------------------------------------------------
// AuditConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Relative paths resolve against the config file's directory.
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,
    #[serde(default = "default_persist_attempts")]
    pub persist_attempts: u32,
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
}

fn default_audit_path() -> PathBuf {
    PathBuf::from(".medic/audit.redb")
}

fn default_persist_attempts() -> u32 {
    5
}

fn default_backoff_initial() -> u64 {
    200
}

fn default_backoff_max() -> u64 {
    5000
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
            persist_attempts: default_persist_attempts(),
            backoff_initial_ms: default_backoff_initial(),
            backoff_max_ms: default_backoff_max(),
        }
    }
}

// ---------------------------------------------------------------------------
// PartitionsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionsConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_alert_after")]
    pub alert_after_failed_ticks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<PartitionBackendConfig>,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

fn default_tick_interval() -> u64 {
    300
}

fn default_alert_after() -> u32 {
    3
}

impl Default for PartitionsConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            alert_after_failed_ticks: default_alert_after(),
            backend: None,
            tables: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionBackendConfig {
    pub create_command: String,
    pub archive_command: String,
    pub verify_command: String,
    #[serde(default = "default_backend_timeout")]
    pub timeout_ms: u64,
}

fn default_backend_timeout() -> u64 {
    120_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    /// Also the width of each partition.
    pub retention_secs: u64,
    #[serde(default)]
    pub lookahead_secs: u64,
}

// ---------------------------------------------------------------------------
// AlertsConfig / ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// `host:port`; the HTTP surface is off when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub signals: Vec<SignalConfig>,
    #[serde(default)]
    pub remediations: Vec<RemediationRule>,
    #[serde(default)]
    pub policies: Vec<PolicyRule>,
    #[serde(default)]
    pub advisor: AdvisorConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub partitions: PartitionsConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Directory the config was loaded from.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Config {
    pub fn parse(yaml: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(yaml)?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MedicError::ConfigNotFound(path.to_path_buf()));
        }
        let data = std::fs::read_to_string(path)?;
        let mut cfg = Self::parse(&data)?;
        cfg.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(cfg)
    }

    pub fn audit_path(&self) -> PathBuf {
        if self.audit.path.is_absolute() {
            self.audit.path.clone()
        } else {
            self.base_dir.join(&self.audit.path)
        }
    }

    pub fn signal(&self, name: &str) -> Option<&SignalConfig> {
        self.signals.iter().find(|s| s.name == name)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.controller.cycle_interval_secs == 0 {
            warnings.push(ConfigWarning::error(
                "controller.cycle_interval_secs must be at least 1",
            ));
        }

        // Signals
        let mut seen = HashSet::new();
        for signal in &self.signals {
            if !seen.insert(signal.name.as_str()) {
                warnings.push(ConfigWarning::error(format!(
                    "duplicate signal '{}'",
                    signal.name
                )));
            }
            if !signal.thresholds.is_monotone() {
                warnings.push(ConfigWarning::warning(format!(
                    "thresholds of signal '{}' are not monotone in severity order",
                    signal.name
                )));
            }
            if !self.telemetry.covers(&signal.name) {
                warnings.push(ConfigWarning::warning(format!(
                    "signal '{}' has no telemetry source and will always read as missing",
                    signal.name
                )));
            }
        }

        // Policies
        let mut matchers = Vec::new();
        let mut seen = HashSet::new();
        for rule in &self.policies {
            if !seen.insert(rule.id.as_str()) {
                warnings.push(ConfigWarning::error(format!(
                    "duplicate policy id '{}'",
                    rule.id
                )));
            }
            match KindMatcher::compile(&rule.applies_to) {
                Ok(m) => matchers.push(m),
                Err(e) => warnings.push(ConfigWarning::error(format!(
                    "policy '{}': {e}",
                    rule.id
                ))),
            }
            for (field, secs) in [
                ("window_secs", rule.window_secs),
                ("cooldown_seconds", rule.cooldown_seconds),
            ] {
                if secs > MAX_SPAN_SECS {
                    warnings.push(ConfigWarning::error(format!(
                        "policy '{}': {field}={secs} exceeds the maximum of {MAX_SPAN_SECS}",
                        rule.id
                    )));
                }
            }
            if rule.max_actions_per_window == 0 {
                warnings.push(ConfigWarning::warning(format!(
                    "policy '{}' has max_actions_per_window=0; matching kinds can never run",
                    rule.id
                )));
            }
        }
        let governed = |kind: &str| matchers.iter().any(|m| m.matches(kind));

        // Remediation rule table
        let mut seen = HashSet::new();
        for rem in &self.remediations {
            if !seen.insert(rem.id.as_str()) {
                warnings.push(ConfigWarning::error(format!(
                    "duplicate remediation id '{}'",
                    rem.id
                )));
            }
            if self.signal(&rem.signal).is_none() {
                warnings.push(ConfigWarning::warning(format!(
                    "remediation '{}' watches unknown signal '{}'",
                    rem.id, rem.signal
                )));
            }
            if !governed(&rem.action.kind) {
                warnings.push(ConfigWarning::warning(format!(
                    "remediation '{}' proposes '{}' which no policy matches; it will always be denied",
                    rem.id, rem.action.kind
                )));
            }
            if !self.executor.actions.contains_key(&rem.action.kind) {
                warnings.push(ConfigWarning::warning(format!(
                    "remediation '{}' proposes '{}' which has no executor route",
                    rem.id, rem.action.kind
                )));
            }
        }

        for kind in self.executor.actions.keys() {
            if !governed(kind) {
                warnings.push(ConfigWarning::warning(format!(
                    "executor action '{kind}' is not covered by any policy"
                )));
            }
        }

        // Advisor
        if !(0.0..=1.0).contains(&self.advisor.confidence_floor) {
            warnings.push(ConfigWarning::error(format!(
                "advisor.confidence_floor {} is outside [0, 1]",
                self.advisor.confidence_floor
            )));
        }
        if self.advisor.enabled && self.advisor.command.trim().is_empty() {
            warnings.push(ConfigWarning::error(
                "advisor is enabled but advisor.command is empty",
            ));
        }

        // Audit
        if self.audit.persist_attempts == 0 {
            warnings.push(ConfigWarning::error(
                "audit.persist_attempts must be at least 1",
            ));
        }

        // Partitions
        let mut seen = HashSet::new();
        for table in &self.partitions.tables {
            if !seen.insert(table.name.as_str()) {
                warnings.push(ConfigWarning::error(format!(
                    "duplicate partitioned table '{}'",
                    table.name
                )));
            }
            for (field, secs) in [
                ("retention_secs", table.retention_secs),
                ("lookahead_secs", table.lookahead_secs),
            ] {
                if secs > MAX_SPAN_SECS {
                    warnings.push(ConfigWarning::error(format!(
                        "table '{}': {field}={secs} exceeds the maximum of {MAX_SPAN_SECS}",
                        table.name
                    )));
                }
            }
            if table.retention_secs == 0 {
                warnings.push(ConfigWarning::error(format!(
                    "table '{}' has retention_secs=0",
                    table.name
                )));
            }
        }
        if !self.partitions.tables.is_empty() {
            if self.partitions.backend.is_none() {
                warnings.push(ConfigWarning::error(
                    "partitions.tables is set but partitions.backend is missing",
                ));
            }
            if self.partitions.tick_interval_secs == 0 {
                warnings.push(ConfigWarning::error(
                    "partitions.tick_interval_secs must be at least 1",
                ));
            }
        }

        warnings
    }
}

pub fn has_errors(warnings: &[ConfigWarning]) -> bool {
    warnings.iter().any(|w| w.level == WarnLevel::Error)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
