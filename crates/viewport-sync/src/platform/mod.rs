//! Narrow view of the rendering platform a replica runs on.

use std::sync::Arc;

use crate::protocol::ScrollPosition;

mod simulated;

pub use simulated::SimulatedViewport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Scroll,
    LinkActivated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    /// The viewport moved; read the new offset from [`Viewport::scroll_offset`].
    Scrolled,
    /// A synchronised navigation link was activated.
    LinkActivated { href: String },
}

impl PlatformEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PlatformEvent::Scrolled => EventKind::Scroll,
            PlatformEvent::LinkActivated { .. } => EventKind::LinkActivated,
        }
    }
}

pub type Listener = Arc<dyn Fn(PlatformEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(pub u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerOptions {
    pub passive: bool,
    pub capture: bool,
}

impl ListenerOptions {
    pub fn passive() -> Self {
        Self {
            passive: true,
            capture: false,
        }
    }
}

pub trait Viewport: Send + Sync {
    fn scroll_offset(&self) -> ScrollPosition;
    /// Programmatic scroll. Platforms report the resulting movement through
    /// the same `Scroll` listeners as a user gesture.
    fn scroll_to(&self, position: ScrollPosition);
    fn location(&self) -> String;
    fn navigate(&self, href: &str);
}

pub trait EventTarget: Send + Sync {
    fn add_listener(
        &self,
        kind: EventKind,
        listener: Listener,
        options: ListenerOptions,
    ) -> ListenerToken;
    fn remove_listener(&self, kind: EventKind, token: ListenerToken);
}
