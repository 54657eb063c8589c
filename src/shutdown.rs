//! Stop signaling and background-task tracking for the fleet engines.
//!
//! Every engine owns a [`StopSignal`] and a [`TaskTracker`]. Periodic ticks
//! and deferred one-shot timers (reconnects, recoveries, partition restores,
//! paced migrations) select against the signal and register their join
//! handles with the tracker, so `stop()` can cancel all of them and guarantee
//! that nothing mutates engine state after it returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Cooperative stop signal shared by an engine and its background tasks.
///
/// `stop()` is idempotent; clones observe the same signal.
#[derive(Clone)]
pub struct StopSignal {
    /// Broadcast channel for tasks that want a `recv()`-style wakeup.
    tx: broadcast::Sender<()>,
    /// Watch channel for `cancelled()` futures.
    watch_rx: watch::Receiver<bool>,
    watch_tx: Arc<watch::Sender<bool>>,
    stopped: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        let (watch_tx, watch_rx) = watch::channel(false);
        Self {
            tx,
            watch_rx,
            watch_tx: Arc::new(watch_tx),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe for a one-shot stop notification.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Fire the signal. Safe to call more than once.
    pub fn stop(&self) {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let _ = self.watch_tx.send(true);
            let _ = self.tx.send(());
        }
    }

    /// Whether the signal has fired.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Resolve once the signal fires (immediately if it already has).
    pub async fn cancelled(&self) {
        let mut rx = self.watch_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of spawned background tasks belonging to one engine run.
///
/// Handles are pruned opportunistically as new tasks are tracked, so the
/// registry stays proportional to the number of live tasks.
#[derive(Clone, Default)]
pub struct TaskTracker {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task for cancellation at stop time.
    pub fn track(&self, handle: JoinHandle<()>) {
        let mut handles = self.handles.lock().expect("task tracker poisoned");
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Abort every tracked task and clear the registry.
    pub fn abort_all(&self) {
        let mut handles = self.handles.lock().expect("task tracker poisoned");
        let n = handles.len();
        for handle in handles.drain(..) {
            handle.abort();
        }
        if n > 0 {
            debug!(tasks = n, "Aborted tracked background tasks");
        }
    }

    /// Number of tracked (possibly finished) tasks.
    pub fn len(&self) -> usize {
        self.handles.lock().expect("task tracker poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
