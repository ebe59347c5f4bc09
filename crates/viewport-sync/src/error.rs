use thiserror::Error;
use transport_bus::BusError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("malformed message on {topic}: {reason}")]
    MalformedNotification { topic: String, reason: String },
    #[error("no handler for topic {0}")]
    UnknownTopic(String),
    #[error("failed to encode message: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("replication substrate unavailable: {0}")]
    SubstrateUnavailable(#[from] BusError),
}

impl SyncError {
    pub(crate) fn malformed(topic: &str, reason: impl ToString) -> Self {
        SyncError::MalformedNotification {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
