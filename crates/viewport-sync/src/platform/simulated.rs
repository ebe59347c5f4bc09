use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{
    EventKind, EventTarget, Listener, ListenerOptions, ListenerToken, PlatformEvent, Viewport,
};
use crate::protocol::ScrollPosition;

/// In-memory platform: a scrollable page plus its listener table.
///
/// Listeners are called synchronously, outside the internal lock, which is
/// how a platform behaves when it reports programmatic scrolls immediately.
pub struct SimulatedViewport {
    page: Mutex<Page>,
    next_token: AtomicU64,
}

struct Page {
    offset: ScrollPosition,
    location: String,
    listeners: Vec<(EventKind, ListenerToken, Listener)>,
    programmatic_scrolls: u64,
    navigations: Vec<String>,
}

impl SimulatedViewport {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            page: Mutex::new(Page {
                offset: ScrollPosition::ORIGIN,
                location: location.into(),
                listeners: Vec::new(),
                programmatic_scrolls: 0,
                navigations: Vec::new(),
            }),
            next_token: AtomicU64::new(1),
        }
    }

    /// A user gesture moving the viewport.
    pub fn user_scroll(&self, position: ScrollPosition) {
        if self.move_to(position) {
            self.dispatch(PlatformEvent::Scrolled);
        }
    }

    /// A user activating a synchronised navigation link.
    pub fn click_link(&self, href: impl Into<String>) {
        self.dispatch(PlatformEvent::LinkActivated { href: href.into() });
    }

    pub fn listener_count(&self) -> usize {
        self.page.lock().listeners.len()
    }

    pub fn programmatic_scrolls(&self) -> u64 {
        self.page.lock().programmatic_scrolls
    }

    pub fn navigations(&self) -> Vec<String> {
        self.page.lock().navigations.clone()
    }

    fn move_to(&self, position: ScrollPosition) -> bool {
        let mut page = self.page.lock();
        if page.offset == position {
            return false;
        }
        page.offset = position;
        true
    }

    fn dispatch(&self, event: PlatformEvent) {
        let kind = event.kind();
        let listeners: Vec<Listener> = self
            .page
            .lock()
            .listeners
            .iter()
            .filter(|(listener_kind, _, _)| *listener_kind == kind)
            .map(|(_, _, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(event.clone());
        }
    }
}

impl Viewport for SimulatedViewport {
    fn scroll_offset(&self) -> ScrollPosition {
        self.page.lock().offset
    }

    fn scroll_to(&self, position: ScrollPosition) {
        self.page.lock().programmatic_scrolls += 1;
        if self.move_to(position) {
            self.dispatch(PlatformEvent::Scrolled);
        }
    }

    fn location(&self) -> String {
        self.page.lock().location.clone()
    }

    fn navigate(&self, href: &str) {
        let mut page = self.page.lock();
        page.location = href.to_string();
        // A freshly loaded page starts at the top without a scroll event.
        page.offset = ScrollPosition::ORIGIN;
        page.navigations.push(href.to_string());
    }
}

impl EventTarget for SimulatedViewport {
    fn add_listener(
        &self,
        kind: EventKind,
        listener: Listener,
        _options: ListenerOptions,
    ) -> ListenerToken {
        let token = ListenerToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.page.lock().listeners.push((kind, token, listener));
        token
    }

    fn remove_listener(&self, kind: EventKind, token: ListenerToken) {
        self.page
            .lock()
            .listeners
            .retain(|(listener_kind, listener_token, _)| {
                !(*listener_kind == kind && *listener_token == token)
            });
    }
}
