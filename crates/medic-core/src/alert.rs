//! Operator alerts: the only failure surface besides the audit log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::AlertsConfig;
use crate::types::FailureKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: FailureKind,
    /// What the alert is about: a cycle id, a table/partition name.
    pub subject: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        kind: FailureKind,
        subject: impl Into<String>,
        message: impl Into<String>,
        raised_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            subject: subject.into(),
            message: message.into(),
            raised_at,
        }
    }
}

/// Delivery of alerts. Implementations must never fail the caller.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn raise(&self, alert: Alert);
}

/// Logs every alert at ERROR and optionally POSTs it as JSON to a webhook.
pub struct Alerter {
    webhook: Option<(reqwest::Client, String)>,
}

impl Alerter {
    pub fn new(cfg: &AlertsConfig) -> Self {
        let webhook = cfg.webhook_url.as_ref().and_then(|url| {
            match reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
            {
                Ok(client) => Some((client, url.clone())),
                Err(e) => {
                    tracing::warn!(error = %e, "alert webhook disabled: http client unavailable");
                    None
                }
            }
        });
        Self { webhook }
    }

    pub fn log_only() -> Self {
        Self { webhook: None }
    }
}

#[async_trait]
impl AlertSink for Alerter {
    async fn raise(&self, alert: Alert) {
        tracing::error!(
            kind = %alert.kind,
            subject = %alert.subject,
            "ALERT: {}",
            alert.message
        );
        let Some((client, url)) = &self.webhook else {
            return;
        };
        match client.post(url).json(&alert).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "alert webhook rejected alert");
            }
            Err(e) => {
                tracing::warn!(error = %e, "alert webhook delivery failed");
            }
        }
    }
}
