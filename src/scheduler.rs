//! Snapshot Scheduler: on a periodic timer, reads the Registry Manager's
//! three registries and the Connection Tracker's current connection list,
//! derives the snapshot-only fields (percentages), and hands an owned
//! `Snapshot` to a caller-supplied sink.
//!
//! Uses the same named-thread-plus-debounce-flag shape as `ConnectionTracker`:
//! a tick that finds the previous sink call still running is skipped rather
//! than queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::SNAPSHOT_INTERVAL_MS;
use crate::connection::ConnectionTracker;
use crate::registry::{RegistryManager, Snapshot};

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Periodically materializes a `Snapshot` from the Registry Manager and the
/// Connection Tracker and hands it to a sink. Holds no registry state of its
/// own.
pub struct SnapshotScheduler {
    registry: Arc<RegistryManager>,
    connection_tracker: Arc<ConnectionTracker>,
    in_flight: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl SnapshotScheduler {
    pub fn new(registry: Arc<RegistryManager>, connection_tracker: Arc<ConnectionTracker>) -> Self {
        Self {
            registry,
            connection_tracker,
            in_flight: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Build one `Snapshot` right now, independent of the timer. Exposed so
    /// tests and `start()` share one code path.
    pub fn build_snapshot(&self) -> Snapshot {
        Snapshot {
            global: self.registry.get_global(),
            applications: self.registry.get_applications(),
            processes: self.registry.get_processes(),
            connections: self.connection_tracker.get_connections(),
            emitted_at_ms: now_ms(),
        }
    }

    /// Start the periodic timer, calling `sink` with each materialized
    /// snapshot. Idempotent. A tick is skipped (not queued) if the previous
    /// sink call has not returned yet.
    pub fn start<F>(&mut self, sink: F)
    where
        F: Fn(Snapshot) + Send + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let registry = Arc::clone(&self.registry);
        let connection_tracker = Arc::clone(&self.connection_tracker);
        let in_flight = Arc::clone(&self.in_flight);
        let running = Arc::clone(&self.running);

        let handle = std::thread::Builder::new()
            .name("snapshot-scheduler".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(SNAPSHOT_INTERVAL_MS));
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    if in_flight.swap(true, Ordering::SeqCst) {
                        tracing::debug!("snapshot tick skipped: previous emission still in flight");
                        continue;
                    }
                    let snapshot = Snapshot {
                        global: registry.get_global(),
                        applications: registry.get_applications(),
                        processes: registry.get_processes(),
                        connections: connection_tracker.get_connections(),
                        emitted_at_ms: now_ms(),
                    };
                    sink(snapshot);
                    in_flight.store(false, Ordering::SeqCst);
                }
            })
            .expect("failed to spawn snapshot-scheduler thread");

        self.thread = Some(handle);
    }

    /// Cancel the timer. Does not force a final snapshot: callers wanting a
    /// last-gasp read should call `build_snapshot()` themselves.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SnapshotScheduler {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
