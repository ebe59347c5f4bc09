//! Keeps one viewport (scroll position and current page) in step across any
//! number of replicas sharing an ordered event log.
//!
//! Responsibilities:
//! - applying `set` commands to the replicated state and announcing each
//!   change with the id of the replica that caused it
//! - throttling bursts of local scroll events before they reach the log
//! - applying remote changes locally without publishing their echo

pub mod config;
pub mod error;
pub mod listeners;
pub mod platform;
pub mod protocol;
pub mod rate_limiter;
pub mod reconciler;
pub mod replica;
pub mod session;
pub mod state;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use protocol::{Command, Notification, ReplicaId, ScrollPosition};
pub use rate_limiter::{Delivery, RateLimiter, ThrottleKey};
pub use reconciler::{ChannelState, Reconciler};
pub use replica::ReplicaHandle;
pub use session::Session;
pub use state::{ReplicatedState, StateAuthority, StateHandle};
