use std::collections::{HashMap, VecDeque};

use medic_advisor::HistoryPoint;

use crate::config::SignalConfig;
use crate::types::{Anomaly, Signal};

/// Anomalies for this cycle's readings, in signal configuration order.
pub(crate) fn detect(signals: &[SignalConfig], readings: &[Signal]) -> Vec<Anomaly> {
    signals
        .iter()
        .filter_map(|cfg| {
            let reading = readings.iter().find(|r| r.name == cfg.name)?;
            let severity = cfg.thresholds.classify(reading.value)?;
            Some(Anomaly {
                signal: reading.clone(),
                severity,
                rule_id: None,
            })
        })
        .collect()
}

/// Bounded per-signal history handed to the advisor.
#[derive(Debug, Default)]
pub(crate) struct History {
    cap: usize,
    points: HashMap<String, VecDeque<HistoryPoint>>,
}

impl History {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            points: HashMap::new(),
        }
    }

    pub fn record(&mut self, signal: &Signal) {
        if self.cap == 0 {
            return;
        }
        let q = self.points.entry(signal.name.clone()).or_default();
        if q.len() == self.cap {
            q.pop_front();
        }
        q.push_back(HistoryPoint {
            value: signal.value,
            observed_at: signal.observed_at,
        });
    }

    /// Oldest first.
    pub fn of(&self, signal: &str) -> Vec<HistoryPoint> {
        self.points
            .get(signal)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Comparison, Threshold, Thresholds};
    use crate::types::Severity;
    use chrono::Utc;

    fn signal(name: &str, value: f64) -> Signal {
        Signal {
            name: name.into(),
            value,
            unit: String::new(),
            observed_at: Utc::now(),
        }
    }

    fn cfg(name: &str, critical: f64, high: f64) -> SignalConfig {
        SignalConfig {
            name: name.into(),
            unit: String::new(),
            window_secs: 60,
            read_timeout_ms: 1000,
            thresholds: Thresholds {
                critical: Some(Threshold { op: Comparison::Gte, value: critical }),
                high: Some(Threshold { op: Comparison::Gte, value: high }),
                ..Default::default()
            },
        }
    }

    #[test]
    fn missing_and_normal_signals_yield_no_anomaly() {
        let configs = vec![cfg("cpu_util", 90.0, 75.0), cfg("error_rate", 5.0, 2.0)];
        let readings = vec![signal("cpu_util", 10.0)];
        assert!(detect(&configs, &readings).is_empty());
    }

    #[test]
    fn anomalies_follow_config_order() {
        let configs = vec![cfg("cpu_util", 90.0, 75.0), cfg("error_rate", 5.0, 2.0)];
        let readings = vec![signal("error_rate", 3.0), signal("cpu_util", 95.0)];
        let found = detect(&configs, &readings);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].signal.name, "cpu_util");
        assert_eq!(found[0].severity, Severity::Critical);
        assert_eq!(found[1].severity, Severity::High);
    }

    #[test]
    fn history_is_bounded() {
        let mut h = History::new(2);
        for v in [1.0, 2.0, 3.0] {
            h.record(&signal("cpu_util", v));
        }
        let points: Vec<f64> = h.of("cpu_util").iter().map(|p| p.value).collect();
        assert_eq!(points, vec![2.0, 3.0]);
        assert!(h.of("other").is_empty());
    }
}
