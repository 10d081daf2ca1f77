use std::time::Duration;

use rand::Rng;

use crate::config::AuditConfig;

/// Bounded exponential backoff with full jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub attempts: u32,
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn from_audit(cfg: &AuditConfig) -> Self {
        Self {
            attempts: cfg.persist_attempts.max(1),
            initial: Duration::from_millis(cfg.backoff_initial_ms),
            max: Duration::from_millis(cfg.backoff_max_ms),
        }
    }

    /// Upper bound of the pause after failed attempt `attempt` (1-based):
    /// `initial * 2^(attempt-1)`, capped at `max`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Jittered pause in `[ceiling/2, ceiling]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        let half = ceiling / 2;
        if half.is_zero() {
            return ceiling;
        }
        let jitter = rand::thread_rng().gen_range(0..=half.as_millis() as u64);
        half + Duration::from_millis(jitter)
    }
}
