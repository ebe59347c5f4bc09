use std::time::Duration;

/// Minimum spacing between two `scroll:set` commands from one replica.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub min_delay: Duration,
    /// Apply the session's current state when a replica joins.
    pub initial_sync: bool,
}

impl SyncConfig {
    pub fn with_min_delay(min_delay: Duration) -> Self {
        Self {
            min_delay,
            ..Self::default()
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_delay: DEFAULT_MIN_DELAY,
            initial_sync: true,
        }
    }
}
