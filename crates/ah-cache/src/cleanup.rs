//! Background cleanup task shared by the TTL caches.

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::debug;

/// Handle to a periodic cleanup task.
///
/// `stop()` is idempotent and never blocks; the task observes the signal on
/// its next tick at the latest and exits.
pub struct CleanupHandle {
    shutdown_tx: broadcast::Sender<()>,
}

impl CleanupHandle {
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for CleanupHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Spawn a cleanup task invoking `sweep` every `interval` until stopped.
///
/// `sweep` returns the number of entries it removed; removals are logged and
/// counted under `publishing_cache_cleanup_total{cache}`.
pub fn spawn_cleanup<F>(cache: &'static str, interval: Duration, sweep: F) -> CleanupHandle
where
    F: Fn() -> usize + Send + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick of `interval` completes immediately; consume it so
        // the first sweep happens one full interval after startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = sweep();
                    if removed > 0 {
                        debug!(cache = cache, removed = removed, "Cache cleanup removed expired entries");
                        metrics::counter!("publishing_cache_cleanup_total", "cache" => cache)
                            .increment(removed as u64);
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!(cache = cache, "Cache cleanup task shutting down");
                    break;
                }
            }
        }
    });

    CleanupHandle { shutdown_tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn sweep_runs_on_each_tick_and_stops() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let handle = spawn_cleanup("test", Duration::from_secs(60), move || {
            counted.fetch_add(1, Ordering::SeqCst);
            0
        });

        tokio::time::sleep(Duration::from_secs(185)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        handle.stop();
        handle.stop(); // idempotent
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
