//! Wire format for the two command/notification channels.
//!
//! Commands travel on `<scope>:set`, the resulting notifications on
//! `<scope>:update`. Every payload is wrapped in a `{"type", "payload"}`
//! envelope and carries the id of the replica that caused it.

use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

pub const SCOPE_SCROLL: &str = "scroll";
pub const EVENT_SET: &str = "set";
pub const EVENT_UPDATE: &str = "update";

pub const TOPIC_SCROLL_SET: &str = "scroll:set";
pub const TOPIC_SCROLL_UPDATE: &str = "scroll:update";
pub const TOPIC_HREF_SET: &str = "href:set";
pub const TOPIC_HREF_UPDATE: &str = "href:update";

pub const COMMAND_TOPICS: &[&str] = &[TOPIC_SCROLL_SET, TOPIC_HREF_SET];
pub const NOTIFICATION_TOPICS: &[&str] = &[TOPIC_SCROLL_UPDATE, TOPIC_HREF_UPDATE];

/// Stable identifier of one replica within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(String);

impl ReplicaId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrollPosition {
    pub left: f64,
    pub top: f64,
}

impl ScrollPosition {
    pub const ORIGIN: ScrollPosition = ScrollPosition { left: 0.0, top: 0.0 };

    pub fn new(left: f64, top: f64) -> Self {
        Self { left, top }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollPayload {
    pub x: f64,
    pub y: f64,
    pub originator_id: ReplicaId,
}

impl ScrollPayload {
    pub fn new(position: ScrollPosition, originator_id: ReplicaId) -> Self {
        Self {
            x: position.left,
            y: position.top,
            originator_id,
        }
    }

    pub fn position(&self) -> ScrollPosition {
        ScrollPosition::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HrefPayload {
    pub href: String,
    pub originator_id: ReplicaId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetScroll(ScrollPayload),
    SetHref(HrefPayload),
}

impl Command {
    pub fn topic(&self) -> &'static str {
        match self {
            Command::SetScroll(_) => TOPIC_SCROLL_SET,
            Command::SetHref(_) => TOPIC_HREF_SET,
        }
    }

    pub fn originator(&self) -> &ReplicaId {
        match self {
            Command::SetScroll(payload) => &payload.originator_id,
            Command::SetHref(payload) => &payload.originator_id,
        }
    }

    pub fn encode(&self) -> SyncResult<Bytes> {
        match self {
            Command::SetScroll(payload) => encode(EVENT_SET, payload),
            Command::SetHref(payload) => encode(EVENT_SET, payload),
        }
    }

    pub fn decode(topic: &str, bytes: &[u8]) -> SyncResult<Self> {
        match topic {
            TOPIC_SCROLL_SET => decode(topic, EVENT_SET, bytes).map(Command::SetScroll),
            TOPIC_HREF_SET => decode(topic, EVENT_SET, bytes).map(Command::SetHref),
            other => Err(SyncError::UnknownTopic(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    ScrollUpdated(ScrollPayload),
    HrefUpdated(HrefPayload),
}

impl Notification {
    pub fn topic(&self) -> &'static str {
        match self {
            Notification::ScrollUpdated(_) => TOPIC_SCROLL_UPDATE,
            Notification::HrefUpdated(_) => TOPIC_HREF_UPDATE,
        }
    }

    pub fn originator(&self) -> &ReplicaId {
        match self {
            Notification::ScrollUpdated(payload) => &payload.originator_id,
            Notification::HrefUpdated(payload) => &payload.originator_id,
        }
    }

    pub fn encode(&self) -> SyncResult<Bytes> {
        match self {
            Notification::ScrollUpdated(payload) => encode(EVENT_UPDATE, payload),
            Notification::HrefUpdated(payload) => encode(EVENT_UPDATE, payload),
        }
    }

    pub fn decode(topic: &str, bytes: &[u8]) -> SyncResult<Self> {
        match topic {
            TOPIC_SCROLL_UPDATE => {
                decode(topic, EVENT_UPDATE, bytes).map(Notification::ScrollUpdated)
            }
            TOPIC_HREF_UPDATE => decode(topic, EVENT_UPDATE, bytes).map(Notification::HrefUpdated),
            other => Err(SyncError::UnknownTopic(other.to_string())),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "type")]
    kind: String,
    payload: T,
}

fn encode<T: Serialize>(kind: &str, payload: &T) -> SyncResult<Bytes> {
    let bytes = serde_json::to_vec(&Envelope {
        kind: kind.to_string(),
        payload,
    })?;
    Ok(Bytes::from(bytes))
}

fn decode<T: DeserializeOwned>(topic: &str, kind: &str, bytes: &[u8]) -> SyncResult<T> {
    let env: Envelope<T> =
        serde_json::from_slice(bytes).map_err(|err| SyncError::malformed(topic, err))?;
    if env.kind != kind {
        return Err(SyncError::malformed(
            topic,
            format!("expected envelope type {kind}, got {}", env.kind),
        ));
    }
    Ok(env.payload)
}
