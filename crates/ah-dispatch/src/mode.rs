//! Operating-mode management.
//!
//! The pipeline runs in `metrics-only` mode exactly when discovery knows of
//! no enabled target. The read path is a single atomic load so every worker
//! can consult it per job; transitions are serialized by a mutex and
//! subscriber callbacks run on their own tasks, off the lock.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use ah_common::Mode;

/// Callback invoked on each mode transition.
pub type ModeSubscriber = Arc<dyn Fn(Mode, Mode, &str) + Send + Sync>;

/// Point-in-time mode metrics.
#[derive(Debug, Clone)]
pub struct ModeMetrics {
    pub current_mode: Mode,
    pub transition_count: u64,
    pub last_transition_at: Option<DateTime<Utc>>,
    pub last_transition_reason: String,
    pub current_mode_duration: Duration,
}

/// Serializable shape of the mode observability contract.
#[derive(Debug, Clone, Serialize)]
pub struct ModeStatus {
    pub mode: Mode,
    pub targets_available: usize,
    pub enabled_targets: usize,
    pub metrics_only_active: bool,
    pub transition_count: u64,
    pub current_mode_duration_seconds: u64,
    pub last_transition_reason: String,
}

struct ModeState {
    transition_count: u64,
    last_transition_at: Option<DateTime<Utc>>,
    last_transition_reason: String,
    mode_since: Instant,
    subscribers: Vec<ModeSubscriber>,
}

pub struct ModeManager {
    mode: AtomicU8,
    state: Mutex<ModeState>,
}

impl Default for ModeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeManager {
    /// A fresh manager starts in metrics-only mode: nothing has been
    /// discovered yet.
    pub fn new() -> Self {
        Self {
            mode: AtomicU8::new(Mode::MetricsOnly as u8),
            state: Mutex::new(ModeState {
                transition_count: 0,
                last_transition_at: None,
                last_transition_reason: "startup".to_string(),
                mode_since: Instant::now(),
                subscribers: Vec::new(),
            }),
        }
    }

    /// Wait-free read of the current mode.
    pub fn current_mode(&self) -> Mode {
        Mode::from_u8(self.mode.load(Ordering::Relaxed))
    }

    /// Wait-free check used on the per-job hot path.
    pub fn is_metrics_only(&self) -> bool {
        self.current_mode() == Mode::MetricsOnly
    }

    /// Derive the mode from the enabled-target count, transitioning if it
    /// changed. Returns the (possibly new) mode and whether a transition
    /// happened.
    pub fn check_mode_transition(&self, enabled_targets: usize) -> (Mode, bool) {
        let desired = if enabled_targets == 0 {
            Mode::MetricsOnly
        } else {
            Mode::Normal
        };

        let mut state = self.state.lock();
        let current = Mode::from_u8(self.mode.load(Ordering::Relaxed));
        if desired == current {
            return (current, false);
        }

        self.mode.store(desired as u8, Ordering::SeqCst);
        state.transition_count += 1;
        let reason = if enabled_targets == 0 {
            "no enabled targets".to_string()
        } else {
            format!("{} enabled targets", enabled_targets)
        };
        state.last_transition_at = Some(Utc::now());
        state.last_transition_reason = reason.clone();
        state.mode_since = Instant::now();
        let subscribers = state.subscribers.clone();
        drop(state);

        info!(
            from = current.as_str(),
            to = desired.as_str(),
            reason = %reason,
            "Publishing mode transition"
        );
        metrics::counter!("publishing_mode_transitions_total").increment(1);

        // Callbacks run off the lock, each on its own task.
        for subscriber in subscribers {
            let reason = reason.clone();
            tokio::spawn(async move {
                subscriber(current, desired, &reason);
            });
        }

        (desired, true)
    }

    /// Register a transition callback.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(Mode, Mode, &str) + Send + Sync + 'static,
    {
        self.state.lock().subscribers.push(Arc::new(callback));
    }

    pub fn metrics(&self) -> ModeMetrics {
        let state = self.state.lock();
        ModeMetrics {
            current_mode: self.current_mode(),
            transition_count: state.transition_count,
            last_transition_at: state.last_transition_at,
            last_transition_reason: state.last_transition_reason.clone(),
            current_mode_duration: state.mode_since.elapsed(),
        }
    }

    /// The observability payload for the current mode.
    pub fn status(&self, targets_available: usize, enabled_targets: usize) -> ModeStatus {
        let metrics = self.metrics();
        ModeStatus {
            mode: metrics.current_mode,
            targets_available,
            enabled_targets,
            metrics_only_active: metrics.current_mode == Mode::MetricsOnly,
            transition_count: metrics.transition_count,
            current_mode_duration_seconds: metrics.current_mode_duration.as_secs(),
            last_transition_reason: metrics.last_transition_reason,
        }
    }
}
