//! Per-replica reconciliation between the local platform and the shared log.
//!
//! Local scrolls become throttled `scroll:set` commands. Remote updates are
//! applied to the platform with a single-shot latch armed first, so the scroll
//! notification the platform raises for that apply is swallowed instead of
//! being published back to the log.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};
use transport_bus::{Bus, BusMessage};

use crate::error::SyncResult;
use crate::platform::{PlatformEvent, Viewport};
use crate::protocol::{
    Command, HrefPayload, Notification, ReplicaId, ScrollPayload, ScrollPosition, EVENT_SET,
    SCOPE_SCROLL,
};
use crate::rate_limiter::{RateLimiter, ThrottleKey};
use crate::state::ReplicatedState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    /// The next platform scroll notification is our own apply echoing back.
    AwaitingEcho,
}

pub struct Reconciler {
    id: ReplicaId,
    viewport: Arc<dyn Viewport>,
    bus: Arc<dyn Bus>,
    limiter: RateLimiter<ScrollPayload>,
    scroll_key: ThrottleKey,
    min_delay: Duration,
    scroll: ChannelState,
}

impl Reconciler {
    pub fn new(
        id: ReplicaId,
        viewport: Arc<dyn Viewport>,
        bus: Arc<dyn Bus>,
        min_delay: Duration,
    ) -> Self {
        let limiter = {
            let bus = Arc::clone(&bus);
            let replica = id.clone();
            RateLimiter::new(move |key: &ThrottleKey, payload: ScrollPayload| {
                if let Err(err) = submit(bus.as_ref(), &key.topic(), Command::SetScroll(payload)) {
                    warn!(
                        target = "viewport.sync",
                        replica = %replica,
                        key = %key,
                        error = %err,
                        "failed to submit scroll command"
                    );
                }
            })
        };
        Self {
            id,
            viewport,
            bus,
            limiter,
            scroll_key: ThrottleKey::new(SCOPE_SCROLL, EVENT_SET),
            min_delay,
            scroll: ChannelState::Idle,
        }
    }

    pub fn id(&self) -> &ReplicaId {
        &self.id
    }

    pub fn scroll_state(&self) -> ChannelState {
        self.scroll
    }

    pub fn has_pending_scroll(&self) -> bool {
        self.limiter.is_pending(&self.scroll_key)
    }

    pub fn on_platform_event(&mut self, event: PlatformEvent) {
        match event {
            PlatformEvent::Scrolled => self.on_local_scroll(),
            PlatformEvent::LinkActivated { href } => {
                if let Err(err) = self.on_link_activated(href) {
                    warn!(
                        target = "viewport.sync",
                        replica = %self.id,
                        error = %err,
                        "failed to submit navigation"
                    );
                }
            }
        }
    }

    fn on_local_scroll(&mut self) {
        if self.scroll == ChannelState::AwaitingEcho {
            self.scroll = ChannelState::Idle;
            trace!(target = "viewport.sync", replica = %self.id, "suppressed scroll echo");
            return;
        }
        let position = self.viewport.scroll_offset();
        self.limiter.publish(
            self.scroll_key.clone(),
            ScrollPayload::new(position, self.id.clone()),
            self.min_delay,
        );
    }

    /// Navigation commands are rare and bypass the throttle.
    fn on_link_activated(&mut self, href: String) -> SyncResult<()> {
        self.drop_pending_scroll();
        let command = Command::SetHref(HrefPayload {
            href: href.clone(),
            originator_id: self.id.clone(),
        });
        submit(self.bus.as_ref(), command.topic(), command)?;
        debug!(target = "viewport.sync", replica = %self.id, href = %href, "navigating");
        self.viewport.navigate(&href);
        Ok(())
    }

    /// Malformed notifications are logged and otherwise ignored.
    pub fn on_notification(&mut self, msg: &BusMessage) {
        match Notification::decode(&msg.topic, &msg.payload) {
            Ok(notification) => self.apply_notification(notification),
            Err(err) => warn!(
                target = "viewport.sync",
                replica = %self.id,
                topic = %msg.topic,
                seq = msg.seq,
                error = %err,
                "ignoring notification"
            ),
        }
    }

    pub fn apply_notification(&mut self, notification: Notification) {
        if notification.originator() == &self.id {
            return;
        }
        match notification {
            Notification::ScrollUpdated(payload) => self.apply_remote_scroll(payload.position()),
            Notification::HrefUpdated(payload) => self.apply_remote_href(&payload.href),
        }
    }

    /// Bring a freshly joined replica to the session's current state.
    pub fn sync_from(&mut self, state: &ReplicatedState) {
        if state.version == 0 {
            return;
        }
        if let Some(href) = &state.href {
            self.follow_href(href);
        }
        self.apply_remote_scroll(state.scroll);
    }

    fn apply_remote_scroll(&mut self, position: ScrollPosition) {
        // Scrolling to where we already are raises no notification, so arming
        // the latch would swallow the user's next real scroll.
        if self.viewport.scroll_offset() == position {
            return;
        }
        self.scroll = ChannelState::AwaitingEcho;
        self.viewport.scroll_to(position);
        trace!(
            target = "viewport.sync",
            replica = %self.id,
            left = position.left,
            top = position.top,
            "applied remote scroll"
        );
    }

    /// The authority resets the scroll with every navigation, so a page that
    /// does not change still goes back to the origin.
    fn apply_remote_href(&mut self, href: &str) {
        self.drop_pending_scroll();
        if !self.follow_href(href) {
            self.apply_remote_scroll(ScrollPosition::ORIGIN);
        }
    }

    fn follow_href(&mut self, href: &str) -> bool {
        if href.is_empty() || self.viewport.location() == href {
            return false;
        }
        debug!(target = "viewport.sync", replica = %self.id, href = %href, "following remote navigation");
        self.viewport.navigate(href);
        true
    }

    /// A scroll still waiting in the throttle belongs to the page being left.
    fn drop_pending_scroll(&self) {
        if self.limiter.cancel(&self.scroll_key) {
            debug!(target = "viewport.sync", replica = %self.id, "dropped pending scroll on navigation");
        }
    }

    pub fn shutdown(&mut self) {
        self.limiter.shutdown();
        self.scroll = ChannelState::Idle;
    }
}

fn submit(bus: &dyn Bus, topic: &str, command: Command) -> SyncResult<u64> {
    let payload = command.encode()?;
    Ok(bus.publish(topic, payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{EventKind, EventTarget, ListenerOptions, SimulatedViewport};
    use crate::protocol::{TOPIC_HREF_SET, TOPIC_SCROLL_SET, TOPIC_SCROLL_UPDATE};
    use bytes::Bytes;
    use tokio::sync::mpsc;
    use transport_bus::{LocalBus, Subscription};

    const MIN_DELAY: Duration = Duration::from_millis(50);

    struct Harness {
        bus: Arc<LocalBus>,
        viewport: Arc<SimulatedViewport>,
        events: mpsc::UnboundedReceiver<PlatformEvent>,
        commands: Subscription,
        reconciler: Reconciler,
    }

    impl Harness {
        fn new(id: &str) -> Self {
            let bus = Arc::new(LocalBus::new());
            let viewport = Arc::new(SimulatedViewport::new("https://example.org/"));
            let (tx, events) = mpsc::unbounded_channel();
            for kind in [EventKind::Scroll, EventKind::LinkActivated] {
                let tx = tx.clone();
                viewport.add_listener(
                    kind,
                    Arc::new(move |event: PlatformEvent| {
                        let _ = tx.send(event);
                    }),
                    ListenerOptions::passive(),
                );
            }
            let commands = bus.subscribe(&[TOPIC_SCROLL_SET, TOPIC_HREF_SET]);
            let reconciler =
                Reconciler::new(ReplicaId::new(id), viewport.clone(), bus.clone(), MIN_DELAY);
            Self {
                bus,
                viewport,
                events,
                commands,
                reconciler,
            }
        }

        fn pump(&mut self) {
            while let Ok(event) = self.events.try_recv() {
                self.reconciler.on_platform_event(event);
            }
        }

        fn drain_commands(&mut self) -> Vec<Command> {
            let mut out = Vec::new();
            while let Some(msg) = self.commands.try_recv().expect("bus open") {
                out.push(Command::decode(&msg.topic, &msg.payload).expect("valid command"));
            }
            out
        }
    }

    fn scroll_update(x: f64, y: f64, from: &str) -> Notification {
        Notification::ScrollUpdated(ScrollPayload {
            x,
            y,
            originator_id: ReplicaId::new(from),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn local_scroll_submits_a_tagged_command() {
        let mut h = Harness::new("a");
        h.viewport.user_scroll(ScrollPosition::new(0.0, 240.0));
        h.pump();

        assert_eq!(
            h.drain_commands(),
            vec![Command::SetScroll(ScrollPayload {
                x: 0.0,
                y: 240.0,
                originator_id: ReplicaId::new("a"),
            })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn drag_is_coalesced_into_the_final_position() {
        let mut h = Harness::new("a");
        for top in [10.0, 20.0, 30.0, 40.0] {
            h.viewport.user_scroll(ScrollPosition::new(0.0, top));
            h.pump();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(h.reconciler.has_pending_scroll());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let tops: Vec<f64> = h
            .drain_commands()
            .into_iter()
            .map(|cmd| match cmd {
                Command::SetScroll(payload) => payload.y,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(tops, vec![10.0, 40.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_update_is_applied_and_its_echo_suppressed() {
        let mut h = Harness::new("b");

        h.reconciler.apply_notification(scroll_update(110.0, 55.0, "a"));
        assert_eq!(h.reconciler.scroll_state(), ChannelState::AwaitingEcho);
        assert_eq!(h.viewport.scroll_offset(), ScrollPosition::new(110.0, 55.0));

        h.pump();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(h.reconciler.scroll_state(), ChannelState::Idle);
        assert!(h.drain_commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_callback_is_suppressed_per_apply() {
        let mut h = Harness::new("b");

        h.reconciler.apply_notification(scroll_update(110.0, 55.0, "a"));
        h.pump();
        h.viewport.user_scroll(ScrollPosition::new(110.0, 300.0));
        h.pump();

        assert_eq!(
            h.drain_commands(),
            vec![Command::SetScroll(ScrollPayload {
                x: 110.0,
                y: 300.0,
                originator_id: ReplicaId::new("b"),
            })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn own_update_is_a_no_op() {
        let mut h = Harness::new("a");

        h.reconciler.apply_notification(scroll_update(110.0, 55.0, "a"));

        assert_eq!(h.reconciler.scroll_state(), ChannelState::Idle);
        assert_eq!(h.viewport.programmatic_scrolls(), 0);
        assert_eq!(h.viewport.scroll_offset(), ScrollPosition::ORIGIN);
    }

    #[tokio::test(start_paused = true)]
    async fn update_matching_current_offset_arms_nothing() {
        let mut h = Harness::new("b");
        h.viewport.user_scroll(ScrollPosition::new(0.0, 80.0));
        h.pump();
        h.drain_commands();

        h.reconciler.apply_notification(scroll_update(0.0, 80.0, "a"));

        assert_eq!(h.reconciler.scroll_state(), ChannelState::Idle);
        assert_eq!(h.viewport.programmatic_scrolls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_notification_is_ignored() {
        let mut h = Harness::new("b");
        let msg = BusMessage {
            seq: 7,
            topic: TOPIC_SCROLL_UPDATE.into(),
            payload: Bytes::from_static(br#"{"type":"update","payload":{"y":4}}"#),
        };

        h.reconciler.on_notification(&msg);

        assert_eq!(h.reconciler.scroll_state(), ChannelState::Idle);
        assert_eq!(h.viewport.scroll_offset(), ScrollPosition::ORIGIN);
        assert!(h.drain_commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn link_activation_submits_href_and_navigates() {
        let mut h = Harness::new("a");
        h.viewport.click_link("https://example.org/chapter-2");
        h.pump();

        assert_eq!(
            h.drain_commands(),
            vec![Command::SetHref(HrefPayload {
                href: "https://example.org/chapter-2".into(),
                originator_id: ReplicaId::new("a"),
            })]
        );
        assert_eq!(h.viewport.location(), "https://example.org/chapter-2");
    }

    #[tokio::test(start_paused = true)]
    async fn remote_href_navigates_only_when_location_differs() {
        let mut h = Harness::new("b");
        let update = |href: &str| {
            Notification::HrefUpdated(HrefPayload {
                href: href.into(),
                originator_id: ReplicaId::new("a"),
            })
        };

        h.reconciler.apply_notification(update("https://example.org/"));
        h.reconciler.apply_notification(update(""));
        h.reconciler.apply_notification(update("https://example.org/next"));

        assert_eq!(h.viewport.navigations(), vec!["https://example.org/next"]);
    }

    #[tokio::test(start_paused = true)]
    async fn link_activation_drops_the_throttled_scroll() {
        let mut h = Harness::new("a");
        h.viewport.user_scroll(ScrollPosition::new(0.0, 10.0));
        h.pump();
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.viewport.user_scroll(ScrollPosition::new(0.0, 20.0));
        h.pump();
        assert!(h.reconciler.has_pending_scroll());

        h.viewport.click_link("https://example.org/chapter-2");
        h.pump();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!h.reconciler.has_pending_scroll());
        assert_eq!(
            h.drain_commands(),
            vec![
                Command::SetScroll(ScrollPayload {
                    x: 0.0,
                    y: 10.0,
                    originator_id: ReplicaId::new("a"),
                }),
                Command::SetHref(HrefPayload {
                    href: "https://example.org/chapter-2".into(),
                    originator_id: ReplicaId::new("a"),
                }),
            ]
        );
        assert_eq!(h.viewport.scroll_offset(), ScrollPosition::ORIGIN);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_navigation_drops_the_throttled_scroll() {
        let mut h = Harness::new("b");
        h.viewport.user_scroll(ScrollPosition::new(0.0, 10.0));
        h.pump();
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.viewport.user_scroll(ScrollPosition::new(0.0, 20.0));
        h.pump();

        h.reconciler
            .apply_notification(Notification::HrefUpdated(HrefPayload {
                href: "https://example.org/next".into(),
                originator_id: ReplicaId::new("a"),
            }));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(h.drain_commands().len(), 1);
        assert_eq!(h.viewport.location(), "https://example.org/next");
        assert_eq!(h.viewport.scroll_offset(), ScrollPosition::ORIGIN);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_navigation_to_the_current_page_resets_scroll() {
        let mut h = Harness::new("b");
        h.viewport.user_scroll(ScrollPosition::new(0.0, 300.0));
        h.pump();
        h.drain_commands();

        h.reconciler
            .apply_notification(Notification::HrefUpdated(HrefPayload {
                href: "https://example.org/".into(),
                originator_id: ReplicaId::new("a"),
            }));
        assert_eq!(h.reconciler.scroll_state(), ChannelState::AwaitingEcho);
        h.pump();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(h.viewport.navigations().is_empty());
        assert_eq!(h.viewport.scroll_offset(), ScrollPosition::ORIGIN);
        assert_eq!(h.reconciler.scroll_state(), ChannelState::Idle);
        assert!(h.drain_commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn late_joiner_adopts_current_state() {
        let mut h = Harness::new("c");
        let mut state = ReplicatedState::new();
        h.reconciler.sync_from(&state);
        assert_eq!(h.viewport.programmatic_scrolls(), 0);

        state.set_href("https://example.org/next".into(), ReplicaId::new("a"));
        state.set_scroll(0.0, 640.0, ReplicaId::new("a"));
        h.reconciler.sync_from(&state);
        h.pump();

        assert_eq!(h.viewport.location(), "https://example.org/next");
        assert_eq!(h.viewport.scroll_offset(), ScrollPosition::new(0.0, 640.0));
        assert!(h.drain_commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drops_pending_scroll() {
        let mut h = Harness::new("a");
        h.viewport.user_scroll(ScrollPosition::new(0.0, 10.0));
        h.pump();
        h.viewport.user_scroll(ScrollPosition::new(0.0, 20.0));
        h.pump();
        h.reconciler.shutdown();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(h.drain_commands().len(), 1);
        assert_eq!(h.bus.next_seq(), 2);
    }
}
