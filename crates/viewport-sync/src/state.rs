//! The authoritative replicated record and the task that applies commands to it.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use transport_bus::{Bus, BusError, BusMessage};

use crate::error::SyncResult;
use crate::protocol::{
    Command, HrefPayload, Notification, ReplicaId, ScrollPayload, ScrollPosition, COMMAND_TOPICS,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplicatedState {
    pub scroll: ScrollPosition,
    pub href: Option<String>,
    /// Number of commands applied so far.
    pub version: u64,
    /// Log sequence of the last applied command.
    pub last_seq: Option<u64>,
}

impl ReplicatedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_scroll(&mut self, x: f64, y: f64, originator: ReplicaId) -> Notification {
        self.scroll = ScrollPosition::new(x, y);
        self.version += 1;
        Notification::ScrollUpdated(ScrollPayload::new(self.scroll, originator))
    }

    /// Navigating resets the viewport to the origin.
    pub fn set_href(&mut self, href: String, originator: ReplicaId) -> Notification {
        self.href = Some(href.clone());
        self.scroll = ScrollPosition::ORIGIN;
        self.version += 1;
        Notification::HrefUpdated(HrefPayload {
            href,
            originator_id: originator,
        })
    }

    pub fn apply(&mut self, command: Command) -> Notification {
        match command {
            Command::SetScroll(ScrollPayload {
                x,
                y,
                originator_id,
            }) => self.set_scroll(x, y, originator_id),
            Command::SetHref(HrefPayload {
                href,
                originator_id,
            }) => self.set_href(href, originator_id),
        }
    }
}

/// Read handle on the session's replicated state.
#[derive(Debug, Clone, Default)]
pub struct StateHandle {
    inner: Arc<RwLock<ReplicatedState>>,
}

impl StateHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ReplicatedState {
        self.inner.read().clone()
    }

    pub fn scroll(&self) -> ScrollPosition {
        self.inner.read().scroll
    }

    fn apply(&self, command: Command, seq: u64) -> Notification {
        let mut state = self.inner.write();
        let notification = state.apply(command);
        state.last_seq = Some(seq);
        notification
    }
}

/// Applies `set` commands from the log, once each and in log order, and
/// publishes the matching `update` notification.
pub struct StateAuthority {
    bus: Arc<dyn Bus>,
    state: StateHandle,
}

impl StateAuthority {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self::with_state(bus, StateHandle::new())
    }

    pub fn with_state(bus: Arc<dyn Bus>, state: StateHandle) -> Self {
        Self { bus, state }
    }

    pub fn state(&self) -> StateHandle {
        self.state.clone()
    }

    /// Subscribes before returning, so commands published afterwards are
    /// never missed.
    pub fn spawn(self) -> JoinHandle<()> {
        let mut commands = self.bus.subscribe(COMMAND_TOPICS);
        tokio::spawn(async move {
            loop {
                match commands.recv().await {
                    Ok(msg) => {
                        if let Err(err) = self.handle_message(&msg) {
                            warn!(
                                target = "viewport.authority",
                                topic = %msg.topic,
                                seq = msg.seq,
                                error = %err,
                                "dropping command"
                            );
                        }
                    }
                    Err(BusError::Lagged(skipped)) => {
                        warn!(
                            target = "viewport.authority",
                            skipped, "authority lagged behind the command log"
                        );
                    }
                    Err(err) => {
                        debug!(target = "viewport.authority", error = %err, "command log closed");
                        break;
                    }
                }
            }
        })
    }

    pub fn handle_message(&self, msg: &BusMessage) -> SyncResult<Notification> {
        let command = Command::decode(&msg.topic, &msg.payload)?;
        let notification = self.state.apply(command, msg.seq);
        trace!(
            target = "viewport.authority",
            seq = msg.seq,
            topic = notification.topic(),
            originator = %notification.originator(),
            "applied command"
        );
        self.bus
            .publish(notification.topic(), notification.encode()?)?;
        Ok(notification)
    }
}
