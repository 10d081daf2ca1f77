//! `medic-advisor`: driver for an external reasoning process.
//!
//! The advisor is any executable that reads one [`AdviceRequest`] as a JSON
//! line on stdin and answers with [`Suggestion`] JSON lines on stdout. This
//! crate owns spawning, the wire format, timeouts and ranking. It knows
//! nothing about policy: callers treat its output as untrusted candidates.
//!
//! ```text
//! AdvisorOptions + AdviceRequest
//!     │
//!     ▼
//! AdvisorProcess  ← spawns the command, writes the request, closes stdin
//!     │              reads JSONL from stdout, captures stderr
//!     ▼
//! rank()          ← drops non-finite confidences, clamps to [0, 1],
//!                    stable sort by confidence descending
//! ```
//!
//! ```rust,ignore
//! use medic_advisor::{consult, AdviceRequest, AdvisorOptions};
//!
//! let opts = AdvisorOptions::new("remediation-advisor");
//! let ranked = consult(&opts, &request).await?;
//! ```

pub mod error;
pub mod types;

pub(crate) mod process;

#[cfg(test)]
mod tests;

pub use error::AdvisorError;
pub use types::{AdviceRequest, AdvisorOptions, HistoryPoint, Suggestion};

use process::AdvisorProcess;

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, AdvisorError>;

/// Run one consultation to completion and return ranked suggestions.
///
/// The whole exchange (spawn, request, read, exit) is bounded by
/// `opts.timeout`. When the deadline passes the child is killed and
/// [`AdvisorError::Timeout`] is returned. A non-zero exit is an error even if
/// suggestions were printed before it.
pub async fn consult(opts: &AdvisorOptions, request: &AdviceRequest) -> Result<Vec<Suggestion>> {
    let timeout_ms = opts.timeout.as_millis() as u64;
    match tokio::time::timeout(opts.timeout, exchange(opts, request)).await {
        Ok(result) => result.map(rank),
        Err(_) => Err(AdvisorError::Timeout(timeout_ms)),
    }
}

async fn exchange(opts: &AdvisorOptions, request: &AdviceRequest) -> Result<Vec<Suggestion>> {
    let mut process = AdvisorProcess::spawn(opts, request).await?;
    let suggestions = process.collect_suggestions().await?;
    if let Some(err) = process.wait_exit_error().await {
        return Err(err);
    }
    tracing::debug!(
        signal = %request.signal,
        count = suggestions.len(),
        "advisor answered"
    );
    Ok(suggestions)
}

/// Order suggestions by confidence, highest first.
///
/// Entries with a NaN or infinite confidence are discarded; the rest are
/// clamped into `[0, 1]`. Ties keep the advisor's own order.
pub fn rank(suggestions: Vec<Suggestion>) -> Vec<Suggestion> {
    let mut ranked: Vec<Suggestion> = suggestions
        .into_iter()
        .filter(|s| s.confidence.is_finite())
        .map(|mut s| {
            s.confidence = s.confidence.clamp(0.0, 1.0);
            s
        })
        .collect();
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    ranked
}
