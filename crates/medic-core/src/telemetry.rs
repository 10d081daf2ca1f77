//! Telemetry input: point-in-time readings of named health signals.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::config::{Config, TelemetryConfig};
use crate::error::{MedicError, Result};
use crate::shell::{run_shell, truncate, DETAIL_LIMIT};
use crate::types::Signal;

/// Query surface over the metrics backend. No mutation.
///
/// An `Err` means the signal is MISSING for this cycle.
#[async_trait]
pub trait TelemetryReader: Send + Sync {
    async fn read_signal(&self, name: &str, window: Duration) -> Result<Signal>;
}

/// Build the reader selected by `telemetry.type`.
pub fn reader_from_config(cfg: &Config) -> Result<Arc<dyn TelemetryReader>> {
    let units: BTreeMap<String, String> = cfg
        .signals
        .iter()
        .map(|s| (s.name.clone(), s.unit.clone()))
        .collect();
    Ok(match &cfg.telemetry {
        TelemetryConfig::Command { probes } => Arc::new(CommandTelemetry {
            probes: probes.clone(),
            units,
            cwd: cfg.base_dir.clone(),
        }),
        TelemetryConfig::Prometheus { base_url, queries } => Arc::new(PrometheusTelemetry::new(
            base_url.clone(),
            queries.clone(),
            units,
        )?),
    })
}

fn unavailable(signal: &str, reason: impl Into<String>) -> MedicError {
    MedicError::SignalUnavailable {
        signal: signal.to_string(),
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// CommandTelemetry
// ---------------------------------------------------------------------------

/// Runs one shell probe per signal. The first whitespace-separated token of
/// stdout is the value.
pub struct CommandTelemetry {
    probes: BTreeMap<String, String>,
    units: BTreeMap<String, String>,
    cwd: PathBuf,
}

impl CommandTelemetry {
    pub fn new(
        probes: BTreeMap<String, String>,
        units: BTreeMap<String, String>,
        cwd: PathBuf,
    ) -> Self {
        Self { probes, units, cwd }
    }
}

#[async_trait]
impl TelemetryReader for CommandTelemetry {
    async fn read_signal(&self, name: &str, window: Duration) -> Result<Signal> {
        let probe = self
            .probes
            .get(name)
            .ok_or_else(|| unavailable(name, "no probe configured"))?;
        let env = [
            ("MEDIC_SIGNAL", name.to_string()),
            ("MEDIC_WINDOW_SECS", window.as_secs().to_string()),
        ];
        let out = run_shell(probe, &self.cwd, &env, None).await?;
        if !out.success {
            return Err(unavailable(name, out.failure_detail()));
        }
        let token = out.stdout.split_whitespace().next().unwrap_or_default();
        let value = parse_value(token).ok_or_else(|| {
            unavailable(
                name,
                format!("unparsable probe output '{}'", truncate(token, DETAIL_LIMIT)),
            )
        })?;
        Ok(Signal {
            name: name.to_string(),
            value,
            unit: self.units.get(name).cloned().unwrap_or_default(),
            observed_at: Utc::now(),
        })
    }
}

fn parse_value(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

// ---------------------------------------------------------------------------
// PrometheusTelemetry
// ---------------------------------------------------------------------------

/// Instant queries against `GET {base_url}/api/v1/query`.
pub struct PrometheusTelemetry {
    client: reqwest::Client,
    base_url: String,
    queries: BTreeMap<String, String>,
    units: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

/// Range vectors and strings fail to deserialize and read as MISSING.
#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "snake_case")]
enum QueryData {
    Vector(Vec<VectorSample>),
    Scalar((f64, String)),
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    value: (f64, String),
}

impl PrometheusTelemetry {
    pub fn new(
        base_url: String,
        queries: BTreeMap<String, String>,
        units: BTreeMap<String, String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| MedicError::InvalidConfig(format!("telemetry http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            queries,
            units,
        })
    }

    async fn query(&self, name: &str, promql: &str) -> std::result::Result<f64, String> {
        let resp = self
            .client
            .get(format!("{}/api/v1/query", self.base_url))
            .query(&[("query", promql)])
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = resp.status();
        let body: QueryResponse = resp
            .json()
            .await
            .map_err(|e| format!("HTTP {status}: {e}"))?;
        if body.status != "success" {
            return Err(body.error.unwrap_or_else(|| format!("query status '{}'", body.status)));
        }
        let raw = match body.data {
            Some(QueryData::Vector(samples)) => samples
                .into_iter()
                .next()
                .map(|s| s.value.1)
                .ok_or_else(|| "empty result".to_string())?,
            Some(QueryData::Scalar((_, v))) => v,
            None => return Err("response carried no data".to_string()),
        };
        parse_value(&raw).ok_or_else(|| format!("non-numeric sample '{raw}' for {name}"))
    }
}

#[async_trait]
impl TelemetryReader for PrometheusTelemetry {
    async fn read_signal(&self, name: &str, window: Duration) -> Result<Signal> {
        let template = self
            .queries
            .get(name)
            .ok_or_else(|| unavailable(name, "no query configured"))?;
        let promql = template.replace("{window}", &format!("{}s", window.as_secs()));
        let value = self
            .query(name, &promql)
            .await
            .map_err(|reason| unavailable(name, reason))?;
        Ok(Signal {
            name: name.to_string(),
            value,
            unit: self.units.get(name).cloned().unwrap_or_default(),
            observed_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
