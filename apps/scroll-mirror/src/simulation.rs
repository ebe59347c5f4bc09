//! Drives a session of simulated replicas with scripted user gestures and
//! checks that every viewport ends up where the replicated state says.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};
use transport_bus::LocalBus;
use viewport_sync::platform::{SimulatedViewport, Viewport};
use viewport_sync::{ReplicaId, ReplicatedState, ScrollPosition, Session, SyncConfig};

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub session: String,
    pub replicas: usize,
    pub gestures: usize,
    pub steps_per_gesture: usize,
    pub step_interval: Duration,
    pub link_every: Option<usize>,
    /// Activate links without waiting for the previous gesture to settle.
    pub link_interrupts: bool,
    pub location: String,
    pub seed: u64,
    pub bus_capacity: usize,
    pub sync: SyncConfig,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub session: String,
    pub seed: u64,
    pub replicas: usize,
    pub user_events: usize,
    /// Commands the authority applied.
    pub commands: u64,
    /// Every message on the log, commands and updates alike.
    pub log_messages: u64,
    pub final_state: ReplicatedState,
    pub converged: bool,
    pub diverged: Vec<String>,
}

struct SimulatedReplica {
    id: ReplicaId,
    page: Arc<SimulatedViewport>,
}

pub async fn run(config: SimulationConfig) -> anyhow::Result<SimulationReport> {
    anyhow::ensure!(config.replicas > 0, "a session needs at least one replica");

    let bus = Arc::new(LocalBus::with_capacity(config.bus_capacity));
    let session = Session::start(config.session.clone(), bus.clone(), config.sync.clone());
    let mut rng = StdRng::seed_from_u64(config.seed);

    let replicas: Vec<SimulatedReplica> = (0..config.replicas)
        .map(|index| SimulatedReplica {
            id: ReplicaId::new(format!("replica-{index}")),
            page: Arc::new(SimulatedViewport::new(config.location.clone())),
        })
        .collect();
    let handles: Vec<_> = replicas
        .iter()
        .map(|replica| session.join_as(replica.id.clone(), replica.page.clone()))
        .collect();

    // Long enough for a trailing delivery plus its round trip.
    let settle = config.sync.min_delay * 4 + Duration::from_millis(50);
    let mut user_events = 0;

    for gesture in 0..config.gestures {
        let driver = &replicas[rng.gen_range(0..replicas.len())];

        if is_link_gesture(config.link_every, gesture) {
            let href = format!("{}#section-{gesture}", config.location);
            debug!(replica = %driver.id, href = %href, "simulated navigation");
            driver.page.click_link(href);
            user_events += 1;
        } else {
            let mut position = driver.page.scroll_offset();
            for _ in 0..config.steps_per_gesture {
                position = ScrollPosition::new(
                    (position.left + rng.gen_range(-20.0..40.0)).max(0.0),
                    (position.top + rng.gen_range(-120.0..240.0)).max(0.0),
                );
                driver.page.user_scroll(position);
                user_events += 1;
                tokio::time::sleep(config.step_interval).await;
            }
            debug!(
                replica = %driver.id,
                left = position.left,
                top = position.top,
                "gesture finished"
            );
        }
        let link_next = is_link_gesture(config.link_every, gesture + 1);
        if !(config.link_interrupts && link_next) {
            tokio::time::sleep(settle).await;
        }
    }
    tokio::time::sleep(settle).await;

    let final_state = session.state().snapshot();
    let diverged: Vec<String> = replicas
        .iter()
        .filter(|replica| !matches_state(replica.page.as_ref(), &final_state))
        .map(|replica| replica.id.to_string())
        .collect();
    let converged = diverged.is_empty();

    for handle in handles {
        handle.detach().await;
    }
    session.shutdown().await;

    let report = SimulationReport {
        session: config.session,
        seed: config.seed,
        replicas: config.replicas,
        user_events,
        commands: final_state.version,
        log_messages: bus.next_seq() - 1,
        final_state,
        converged,
        diverged,
    };
    if report.converged {
        info!(
            session = %report.session,
            commands = report.commands,
            user_events = report.user_events,
            "replicas converged"
        );
    } else {
        warn!(session = %report.session, diverged = ?report.diverged, "replicas diverged");
    }
    Ok(report)
}

fn is_link_gesture(link_every: Option<usize>, gesture: usize) -> bool {
    link_every.is_some_and(|every| gesture % every == every - 1)
}

fn matches_state(page: &SimulatedViewport, state: &ReplicatedState) -> bool {
    let on_page = state
        .href
        .as_deref()
        .is_none_or(|href| page.location() == href);
    on_page && page.scroll_offset() == state.scroll
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(link_every: Option<usize>) -> SimulationConfig {
        SimulationConfig {
            session: "viewport-sync-test".into(),
            replicas: 3,
            gestures: 6,
            steps_per_gesture: 10,
            step_interval: Duration::from_millis(8),
            link_every,
            link_interrupts: false,
            location: "https://example.org/".into(),
            seed: 42,
            bus_capacity: 256,
            sync: SyncConfig::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_gestures_converge() {
        let report = run(config(None)).await.expect("simulation runs");

        assert!(report.converged, "diverged: {:?}", report.diverged);
        assert_eq!(report.user_events, 60);
        assert!(report.commands > 0);
        // Throttling keeps the log well below one command per event.
        assert!(report.commands < report.user_events as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_gestures_converge_on_the_shared_page() {
        let report = run(config(Some(3))).await.expect("simulation runs");

        assert!(report.converged, "diverged: {:?}", report.diverged);
        assert_eq!(
            report.final_state.href.as_deref(),
            Some("https://example.org/#section-5")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn links_interrupting_a_throttled_gesture_still_converge() {
        let mut config = config(Some(3));
        config.link_interrupts = true;
        let report = run(config).await.expect("simulation runs");

        assert!(report.converged, "diverged: {:?}", report.diverged);
        assert_eq!(report.final_state.scroll, ScrollPosition::ORIGIN);
        assert_eq!(
            report.final_state.href.as_deref(),
            Some("https://example.org/#section-5")
        );
    }

    #[test]
    fn every_nth_gesture_is_a_link() {
        let links: Vec<usize> = (0..7).filter(|g| is_link_gesture(Some(3), *g)).collect();
        assert_eq!(links, vec![2, 5]);
        assert!(!is_link_gesture(None, 2));
    }

    #[tokio::test]
    async fn empty_sessions_are_rejected() {
        let mut config = config(None);
        config.replicas = 0;
        assert!(run(config).await.is_err());
    }
}
