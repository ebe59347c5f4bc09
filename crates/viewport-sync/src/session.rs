use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;
use transport_bus::Bus;

use crate::config::SyncConfig;
use crate::platform::{EventTarget, Viewport};
use crate::protocol::ReplicaId;
use crate::replica::{spawn_replica, ReplicaHandle};
use crate::state::{StateAuthority, StateHandle};

pub const SESSION_PREFIX: &str = "viewport-sync";

pub fn session_name(prefix: &str, name: &str) -> String {
    format!("{prefix}-{name}")
}

/// One shared viewport: the authority applying commands plus the bus every
/// replica joins through.
pub struct Session {
    name: String,
    bus: Arc<dyn Bus>,
    state: StateHandle,
    config: SyncConfig,
    authority: JoinHandle<()>,
}

impl Session {
    pub fn start(name: impl Into<String>, bus: Arc<dyn Bus>, config: SyncConfig) -> Self {
        let name = name.into();
        let authority = StateAuthority::new(Arc::clone(&bus));
        let state = authority.state();
        let authority = authority.spawn();
        info!(
            target = "viewport.sync",
            session = %name,
            min_delay = ?config.min_delay,
            "session started"
        );
        Self {
            name,
            bus,
            state,
            config,
            authority,
        }
    }

    pub fn state(&self) -> StateHandle {
        self.state.clone()
    }

    pub fn join<P>(&self, platform: Arc<P>) -> ReplicaHandle
    where
        P: Viewport + EventTarget + 'static,
    {
        self.join_as(ReplicaId::generate(), platform)
    }

    pub fn join_as<P>(&self, id: ReplicaId, platform: Arc<P>) -> ReplicaHandle
    where
        P: Viewport + EventTarget + 'static,
    {
        let viewport: Arc<dyn Viewport> = platform.clone();
        let target: Arc<dyn EventTarget> = platform;
        spawn_replica(
            id,
            viewport,
            target,
            Arc::clone(&self.bus),
            self.state.clone(),
            &self.config,
        )
    }

    pub async fn shutdown(self) {
        self.authority.abort();
        let _ = self.authority.await;
        info!(target = "viewport.sync", session = %self.name, "session stopped");
    }
}
