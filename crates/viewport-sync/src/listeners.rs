use std::sync::Arc;

use crate::platform::{EventKind, EventTarget, Listener, ListenerOptions, ListenerToken};

struct ListenerRecord {
    target: Arc<dyn EventTarget>,
    kind: EventKind,
    token: ListenerToken,
}

/// Platform listeners owned by one replica, released together.
#[derive(Default)]
pub struct ListenerSet {
    records: Vec<ListenerRecord>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        target: Arc<dyn EventTarget>,
        kind: EventKind,
        listener: Listener,
        options: ListenerOptions,
    ) -> ListenerToken {
        let token = target.add_listener(kind, listener, options);
        self.records.push(ListenerRecord {
            target,
            kind,
            token,
        });
        token
    }

    pub fn teardown_all(&mut self) {
        for record in self.records.drain(..) {
            record.target.remove_listener(record.kind, record.token);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Drop for ListenerSet {
    fn drop(&mut self) {
        self.teardown_all();
    }
}
