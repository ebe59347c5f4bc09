use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use transport_bus::{Bus, BusError};

use crate::config::SyncConfig;
use crate::listeners::ListenerSet;
use crate::platform::{EventKind, EventTarget, ListenerOptions, PlatformEvent, Viewport};
use crate::protocol::{ReplicaId, NOTIFICATION_TOPICS};
use crate::reconciler::Reconciler;
use crate::state::StateHandle;

/// Owner's handle on a running replica. Dropping it also stops the replica.
pub struct ReplicaHandle {
    id: ReplicaId,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReplicaHandle {
    pub fn id(&self) -> &ReplicaId {
        &self.id
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the replica, releasing its listeners and pending deliveries.
    pub async fn detach(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(err) = (&mut self.task).await {
            warn!(target = "viewport.sync", replica = %self.id, error = %err, "replica task failed");
        }
    }
}

pub(crate) fn spawn_replica(
    id: ReplicaId,
    viewport: Arc<dyn Viewport>,
    target: Arc<dyn EventTarget>,
    bus: Arc<dyn Bus>,
    state: StateHandle,
    config: &SyncConfig,
) -> ReplicaHandle {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<PlatformEvent>();
    let mut listeners = ListenerSet::new();
    for kind in [EventKind::Scroll, EventKind::LinkActivated] {
        let tx = events_tx.clone();
        listeners.register(
            Arc::clone(&target),
            kind,
            Arc::new(move |event: PlatformEvent| {
                let _ = tx.send(event);
            }),
            ListenerOptions::passive(),
        );
    }
    drop(events_tx);

    // Subscribe before reading the snapshot so no update falls in between.
    let mut notifications = bus.subscribe(NOTIFICATION_TOPICS);
    let mut reconciler = Reconciler::new(id.clone(), viewport, bus, config.min_delay);
    if config.initial_sync {
        reconciler.sync_from(&state.snapshot());
    }

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let replica = id.clone();
    let task = tokio::spawn(async move {
        info!(target = "viewport.sync", replica = %replica, "replica attached");
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown_rx => break,
                // Platform events first: an apply's echo must be consumed
                // before the next notification can arm the latch again.
                Some(event) = events_rx.recv() => reconciler.on_platform_event(event),
                msg = notifications.recv() => match msg {
                    Ok(msg) => reconciler.on_notification(&msg),
                    Err(BusError::Lagged(skipped)) => {
                        warn!(target = "viewport.sync", replica = %replica, skipped, "replica lagged behind notifications");
                    }
                    Err(err) => {
                        warn!(target = "viewport.sync", replica = %replica, error = %err, "replication substrate unavailable");
                        break;
                    }
                },
            }
        }
        listeners.teardown_all();
        reconciler.shutdown();
        debug!(target = "viewport.sync", replica = %replica, "replica detached");
    });

    ReplicaHandle {
        id,
        shutdown: Some(shutdown_tx),
        task,
    }
}
