//! Per-target health tracking.
//!
//! Probing is passive: publish outcomes feed the monitor, and a rolling
//! window of recent probes plus a staleness bound classifies each target.
//! The health map is owned exclusively by this monitor; everything else
//! reads through `get_health`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use ah_common::HealthStatus;

#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Number of recent probes kept per target.
    pub window: usize,
    /// Consecutive trailing failures that mark a target unhealthy.
    pub unhealthy_threshold: usize,
    /// Probes older than this make the classification `Unknown`.
    pub staleness: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            window: 10,
            unhealthy_threshold: 3,
            staleness: Duration::from_secs(300),
        }
    }
}

struct TargetHealth {
    probes: VecDeque<bool>,
    last_probe: Instant,
}

pub struct HealthMonitor {
    targets: DashMap<String, TargetHealth>,
    config: HealthMonitorConfig,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HealthMonitorConfig::default())
    }
}

impl HealthMonitor {
    pub fn new(config: HealthMonitorConfig) -> Self {
        Self {
            targets: DashMap::new(),
            config,
        }
    }

    pub fn record_success(&self, target_name: &str) {
        self.record(target_name, true);
    }

    pub fn record_failure(&self, target_name: &str) {
        self.record(target_name, false);
    }

    fn record(&self, target_name: &str, success: bool) {
        let mut entry = self
            .targets
            .entry(target_name.to_string())
            .or_insert_with(|| TargetHealth {
                probes: VecDeque::with_capacity(self.config.window),
                last_probe: Instant::now(),
            });
        if entry.probes.len() == self.config.window {
            entry.probes.pop_front();
        }
        entry.probes.push_back(success);
        entry.last_probe = Instant::now();
        drop(entry);

        let status = self.get_health(target_name);
        metrics::gauge!("publishing_circuit_state", "target" => target_name.to_string())
            .set(gauge_value(status));
    }

    pub fn get_health(&self, target_name: &str) -> HealthStatus {
        let Some(entry) = self.targets.get(target_name) else {
            return HealthStatus::Unknown;
        };
        if entry.last_probe.elapsed() > self.config.staleness || entry.probes.is_empty() {
            return HealthStatus::Unknown;
        }

        let trailing_failures = entry
            .probes
            .iter()
            .rev()
            .take_while(|success| !**success)
            .count();
        if trailing_failures >= self.config.unhealthy_threshold
            || trailing_failures == entry.probes.len()
        {
            return HealthStatus::Unhealthy;
        }
        if entry.probes.iter().any(|success| !*success) {
            return HealthStatus::Degraded;
        }
        HealthStatus::Healthy
    }

    /// Current classification of every tracked target.
    pub fn snapshot(&self) -> Vec<(String, HealthStatus)> {
        self.targets
            .iter()
            .map(|entry| (entry.key().clone(), self.get_health(entry.key())))
            .collect()
    }

    /// Drop a target's history (e.g. after it disappears from discovery).
    pub fn forget(&self, target_name: &str) {
        self.targets.remove(target_name);
    }
}

fn gauge_value(status: HealthStatus) -> f64 {
    match status {
        HealthStatus::Healthy => 0.0,
        HealthStatus::Degraded => 1.0,
        HealthStatus::Unhealthy => 2.0,
        HealthStatus::Unknown => 3.0,
    }
}
