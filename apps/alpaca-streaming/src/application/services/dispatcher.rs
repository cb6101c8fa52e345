//! Listener Dispatcher
//!
//! Fans decoded events out to caller callbacks, grouped by
//! [`EventCategory`]. Callbacks for one category run in registration order.
//!
//! Callbacks never run on the connection's read loop. The loop hands events
//! to a [`DispatchQueue`], whose worker thread invokes the callbacks. When a
//! slow callback keeps the queue full for longer than the grace period, the
//! event is dropped and counted so the read loop keeps going.
//!
//! The worker is a plain OS thread, outside the runtime's blocking pool, so
//! a callback that never returns cannot hold up runtime shutdown.
//! [`DispatchWorker::join`] waits a bounded time and leaves a stuck worker
//! detached.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot};

use crate::domain::streaming::{EventCategory, StreamEvent, StreamFlavor};
use crate::infrastructure::metrics;

/// A registered callback.
pub type Listener = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

// =============================================================================
// Dispatcher
// =============================================================================

/// Category to ordered callback list.
pub struct ListenerDispatcher {
    flavor: StreamFlavor,
    listeners: RwLock<HashMap<EventCategory, Vec<Listener>>>,
}

impl std::fmt::Debug for ListenerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read();
        let counts: HashMap<_, _> = listeners.iter().map(|(c, l)| (*c, l.len())).collect();
        f.debug_struct("ListenerDispatcher")
            .field("flavor", &self.flavor)
            .field("listeners", &counts)
            .finish()
    }
}

impl ListenerDispatcher {
    /// Create an empty dispatcher for a session of `flavor`.
    #[must_use]
    pub fn new(flavor: StreamFlavor) -> Self {
        Self {
            flavor,
            listeners: RwLock::new(HashMap::new()),
        }
    }

    /// Append a callback for `category`.
    pub fn register<F>(&self, category: EventCategory, callback: F)
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .entry(category)
            .or_default()
            .push(Arc::new(callback));
    }

    /// Number of callbacks registered for `category`.
    #[must_use]
    pub fn listener_count(&self, category: EventCategory) -> usize {
        self.listeners.read().get(&category).map_or(0, Vec::len)
    }

    /// Invoke every callback registered for the event's category.
    ///
    /// The callback list is copied out of the lock first, so callbacks may
    /// register further listeners. A panicking callback is logged and
    /// skipped. Returns the number of callbacks that completed.
    pub fn dispatch(&self, event: &StreamEvent) -> usize {
        let category = event.category();
        let listeners: Vec<Listener> = match self.listeners.read().get(&category) {
            Some(list) if !list.is_empty() => list.clone(),
            _ => return 0,
        };

        let mut completed = 0;
        for (index, listener) in listeners.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => completed += 1,
                Err(panic) => {
                    tracing::error!(
                        flavor = %self.flavor,
                        category = category.as_str(),
                        listener = index,
                        panic = panic_message(panic.as_ref()),
                        "Listener panicked"
                    );
                    metrics::record_listener_panic(self.flavor, category);
                }
            }
        }
        completed
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

// =============================================================================
// Dispatch Queue
// =============================================================================

/// Bounded queue between a read loop and a blocking dispatch worker.
///
/// Event order is preserved. The worker exits once every queue handle has
/// been dropped and the backlog is drained.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    flavor: StreamFlavor,
    tx: mpsc::Sender<StreamEvent>,
    grace: Duration,
}

impl DispatchQueue {
    /// Spawn a worker thread that dispatches queued events through
    /// `dispatcher`.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to start the thread.
    pub fn spawn(
        dispatcher: Arc<ListenerDispatcher>,
        capacity: usize,
        grace: Duration,
    ) -> std::io::Result<(Self, DispatchWorker)> {
        let flavor = dispatcher.flavor;
        let (tx, mut rx) = mpsc::channel::<StreamEvent>(capacity.max(1));
        let (done_tx, done) = oneshot::channel();

        std::thread::Builder::new()
            .name(format!("alpaca-dispatch-{flavor}"))
            .spawn(move || {
                while let Some(event) = rx.blocking_recv() {
                    dispatcher.dispatch(&event);
                }
                tracing::debug!(flavor = %flavor, "Dispatch worker stopped");
                let _ = done_tx.send(());
            })?;

        Ok((Self { flavor, tx, grace }, DispatchWorker { flavor, done }))
    }

    /// Queue an event, waiting at most the grace period for space.
    ///
    /// Returns `false` if the event was dropped.
    pub async fn deliver(&self, event: StreamEvent) -> bool {
        let category = event.category();
        match self.tx.send_timeout(event, self.grace).await {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(_)) => {
                tracing::warn!(
                    flavor = %self.flavor,
                    category = category.as_str(),
                    grace_ms = self.grace.as_millis(),
                    "Listeners are not keeping up, dropping event"
                );
                metrics::record_event_dropped(self.flavor, category);
                false
            }
            Err(SendTimeoutError::Closed(_)) => {
                tracing::debug!(flavor = %self.flavor, "Dispatch worker gone, dropping event");
                false
            }
        }
    }
}

/// Completion handle of a dispatch worker thread.
#[derive(Debug)]
pub struct DispatchWorker {
    flavor: StreamFlavor,
    done: oneshot::Receiver<()>,
}

impl DispatchWorker {
    /// Wait up to `limit` for the worker to drain its queue and exit.
    ///
    /// The queue must already be closed. Returns `false` when a callback is
    /// still running after `limit`; the thread is then left detached.
    pub async fn join(self, limit: Duration) -> bool {
        if tokio::time::timeout(limit, self.done).await.is_ok() {
            return true;
        }
        tracing::warn!(
            flavor = %self.flavor,
            limit_ms = limit.as_millis(),
            "Listener still running, detaching dispatch worker"
        );
        metrics::record_dispatch_worker_detached(self.flavor);
        false
    }
}

// =============================================================================
// Tests
// =============================================================================
