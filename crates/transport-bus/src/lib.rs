//! Ordered in-process message bus shared by every replica of a session.
//!
//! Every message published on a [`LocalBus`] receives a sequence number and is
//! delivered to all subscribers in that order, across topics. Subscribers pick
//! the topics they care about; filtering never reorders the log.

use std::collections::HashSet;

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub seq: u64,
    pub topic: String,
    pub payload: Bytes,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus channel closed")]
    Closed,
    #[error("subscriber lagged behind the log by {0} messages")]
    Lagged(u64),
}

pub type BusResult<T> = Result<T, BusError>;

pub trait Bus: Send + Sync {
    /// Subscribe to the listed topics. An empty list receives every message.
    fn subscribe(&self, topics: &[&str]) -> Subscription;
    /// Append a message to the log, returning its sequence number.
    fn publish(&self, topic: &str, payload: Bytes) -> BusResult<u64>;
}

/// Receiving half of a bus subscription, filtered by topic.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<BusMessage>,
    topics: HashSet<String>,
}

impl Subscription {
    pub fn new(rx: broadcast::Receiver<BusMessage>, topics: &[&str]) -> Self {
        Self {
            rx,
            topics: topics.iter().map(|topic| topic.to_string()).collect(),
        }
    }

    pub fn accepts(&self, topic: &str) -> bool {
        self.topics.is_empty() || self.topics.contains(topic)
    }

    pub async fn recv(&mut self) -> BusResult<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) if self.accepts(&msg.topic) => return Ok(msg),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => return Err(BusError::Lagged(skipped)),
                Err(RecvError::Closed) => return Err(BusError::Closed),
            }
        }
    }

    /// Non-blocking receive; `Ok(None)` when nothing matching is queued.
    pub fn try_recv(&mut self) -> BusResult<Option<BusMessage>> {
        loop {
            match self.rx.try_recv() {
                Ok(msg) if self.accepts(&msg.topic) => return Ok(Some(msg)),
                Ok(_) => continue,
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Lagged(skipped)) => return Err(BusError::Lagged(skipped)),
                Err(TryRecvError::Closed) => return Err(BusError::Closed),
            }
        }
    }
}

/// Simple in-memory bus for tests and single-process sessions.
#[derive(Debug)]
pub struct LocalBus {
    log: Mutex<LogState>,
}

#[derive(Debug)]
struct LogState {
    sender: Option<broadcast::Sender<BusMessage>>,
    next_seq: u64,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            log: Mutex::new(LogState {
                sender: Some(sender),
                next_seq: 1,
            }),
        }
    }

    /// Stops accepting messages. Subscribers drain what is queued, then see
    /// [`BusError::Closed`].
    pub fn close(&self) {
        self.log.lock().sender = None;
    }

    pub fn is_closed(&self) -> bool {
        self.log.lock().sender.is_none()
    }

    /// Sequence number the next published message will receive.
    pub fn next_seq(&self) -> u64 {
        self.log.lock().next_seq
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for LocalBus {
    fn subscribe(&self, topics: &[&str]) -> Subscription {
        let guard = self.log.lock();
        let rx = match &guard.sender {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        };
        Subscription::new(rx, topics)
    }

    fn publish(&self, topic: &str, payload: Bytes) -> BusResult<u64> {
        // Sequence assignment and send happen under one lock so that log
        // order and delivery order never disagree.
        let mut guard = self.log.lock();
        let seq = guard.next_seq;
        let sender = guard.sender.as_ref().ok_or(BusError::Closed)?;
        // A send with no live receivers is not a failure for the log.
        let _ = sender.send(BusMessage {
            seq,
            topic: topic.to_string(),
            payload,
        });
        guard.next_seq += 1;
        Ok(seq)
    }
}
