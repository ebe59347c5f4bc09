//! Per-key trailing-edge throttle.
//!
//! For each `(scope, event)` key the delivery target fires at most once per
//! `min_delay`. A call inside the window replaces whatever was pending for
//! that key, so only the most recent payload is delivered when the window
//! closes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Receives payloads once their window allows it. Deferred deliveries run
/// under the limiter's table lock, so implementations must not call back
/// into the limiter.
pub trait Delivery<P>: Send + Sync {
    fn deliver(&self, key: &ThrottleKey, payload: P);
}

impl<P, F> Delivery<P> for F
where
    F: Fn(&ThrottleKey, P) + Send + Sync,
{
    fn deliver(&self, key: &ThrottleKey, payload: P) {
        (self)(key, payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThrottleKey {
    pub scope: String,
    pub event: String,
}

impl ThrottleKey {
    pub fn new(scope: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            event: event.into(),
        }
    }

    /// Bus topic this key publishes to.
    pub fn topic(&self) -> String {
        format!("{}:{}", self.scope, self.event)
    }
}

impl fmt::Display for ThrottleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.event)
    }
}

#[derive(Default)]
struct ThrottleEntry {
    last_published_at: Option<Instant>,
    pending: Option<PendingDelivery>,
}

struct PendingDelivery {
    generation: u64,
    handle: JoinHandle<()>,
}

impl ThrottleEntry {
    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.handle.abort();
        }
    }
}

#[derive(Default)]
struct Table {
    entries: HashMap<ThrottleKey, ThrottleEntry>,
    next_generation: u64,
    closed: bool,
}

pub struct RateLimiter<P> {
    table: Arc<Mutex<Table>>,
    delivery: Arc<dyn Delivery<P>>,
}

impl<P: Send + 'static> RateLimiter<P> {
    pub fn new<D>(delivery: D) -> Self
    where
        D: Delivery<P> + 'static,
    {
        Self {
            table: Arc::new(Mutex::new(Table::default())),
            delivery: Arc::new(delivery),
        }
    }

    /// Deliver `payload` now if the key has been quiet for `min_delay`,
    /// otherwise schedule it for the end of the current window.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn publish(&self, key: ThrottleKey, payload: P, min_delay: Duration) {
        let now = Instant::now();
        let mut guard = self.table.lock();
        let table = &mut *guard;
        if table.closed {
            trace!(target = "viewport.throttle", key = %key, "publish after shutdown ignored");
            return;
        }

        let entry = table.entries.entry(key.clone()).or_default();
        let elapsed = entry
            .last_published_at
            .map(|last| now.saturating_duration_since(last));

        match elapsed {
            Some(elapsed) if elapsed < min_delay => {
                let remaining = min_delay - elapsed;
                entry.cancel_pending();
                table.next_generation += 1;
                let generation = table.next_generation;
                let handle = tokio::spawn(deliver_later(
                    Arc::clone(&self.table),
                    Arc::clone(&self.delivery),
                    key.clone(),
                    payload,
                    generation,
                    remaining,
                ));
                entry.pending = Some(PendingDelivery { generation, handle });
                trace!(
                    target = "viewport.throttle",
                    key = %key,
                    remaining = ?remaining,
                    "deferred publish"
                );
            }
            _ => {
                entry.last_published_at = Some(now);
                entry.cancel_pending();
                drop(guard);
                self.delivery.deliver(&key, payload);
            }
        }
    }

    /// Drop the delivery pending for `key`, if any. The key's window stays
    /// open and later publishes are throttled as usual.
    pub fn cancel(&self, key: &ThrottleKey) -> bool {
        let mut table = self.table.lock();
        let Some(entry) = table.entries.get_mut(key) else {
            return false;
        };
        if entry.pending.is_none() {
            return false;
        }
        entry.cancel_pending();
        trace!(target = "viewport.throttle", key = %key, "pending publish cancelled");
        true
    }

    /// Cancel every pending delivery. Later publishes are dropped.
    pub fn shutdown(&self) {
        let mut table = self.table.lock();
        if table.closed {
            return;
        }
        table.closed = true;
        let pending = table
            .entries
            .values()
            .filter(|entry| entry.pending.is_some())
            .count();
        for entry in table.entries.values_mut() {
            entry.cancel_pending();
        }
        table.entries.clear();
        debug!(target = "viewport.throttle", pending, "rate limiter shut down");
    }

    pub fn is_pending(&self, key: &ThrottleKey) -> bool {
        self.table
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| entry.pending.is_some())
    }

    pub fn last_published(&self, key: &ThrottleKey) -> Option<Instant> {
        self.table
            .lock()
            .entries
            .get(key)
            .and_then(|entry| entry.last_published_at)
    }
}

impl<P> Drop for RateLimiter<P> {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        table.closed = true;
        for entry in table.entries.values_mut() {
            entry.cancel_pending();
        }
    }
}

async fn deliver_later<P>(
    table: Arc<Mutex<Table>>,
    delivery: Arc<dyn Delivery<P>>,
    key: ThrottleKey,
    payload: P,
    generation: u64,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;
    // Checked and delivered under one lock: once `shutdown` or `cancel`
    // returns, no delivery for the key is in flight.
    let mut guard = table.lock();
    if guard.closed {
        return;
    }
    let Some(entry) = guard.entries.get_mut(&key) else {
        return;
    };
    // A replaced or cancelled timer may still be woken once.
    match &entry.pending {
        Some(pending) if pending.generation == generation => {}
        _ => return,
    }
    entry.pending = None;
    entry.last_published_at = Some(Instant::now());
    trace!(target = "viewport.throttle", key = %key, "delivering deferred publish");
    delivery.deliver(&key, payload);
}
