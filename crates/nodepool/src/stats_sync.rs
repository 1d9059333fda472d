//! The background stats synchroniser, grounded in
//! `examples/original_source/eznode_sync_stats.go`: a ticker that invokes a
//! caller-supplied callback with a full snapshot at a fixed interval,
//! start/stop guarded by one lock so both are idempotent (spec.md §4.5,
//! §9's "Stats sync double-start race").

use nodepool_core::ChainStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

pub type SyncCallback = Arc<dyn Fn(Vec<ChainStats>) + Send + Sync>;

struct Running {
    handle: JoinHandle<()>,
    stop: tokio::sync::oneshot::Sender<()>,
}

/// Owns the running/idle state of the periodic snapshot loop. One instance
/// per [`crate::Dispatcher`].
pub(crate) struct StatsSync {
    interval: Duration,
    running: AsyncMutex<Option<Running>>,
}

impl StatsSync {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            running: AsyncMutex::new(None),
        }
    }

    /// Starts the ticker if it is not already running. Idempotent.
    pub(crate) async fn start<F>(&self, snapshot: F, callback: SyncCallback)
    where
        F: Fn() -> Vec<ChainStats> + Send + Sync + 'static,
    {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }

        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                tokio::select! {
                    _ = &mut stop_rx => return,
                    _ = ticker.tick() => {
                        callback(snapshot());
                    }
                }
            }
        });

        *running = Some(Running {
            handle,
            stop: stop_tx,
        });
    }

    /// Stops the ticker if running. Idempotent.
    pub(crate) async fn stop(&self) {
        let mut running = self.running.lock().await;
        if let Some(r) = running.take() {
            let _ = r.stop.send(());
            let _ = r.handle.await;
        }
    }

    pub(crate) async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}
