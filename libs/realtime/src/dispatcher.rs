//! Fan-out of domain events to registered handlers.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::events::{DomainEvent, EventKind};

type Handler = dyn Fn(&DomainEvent) + Send + Sync;

struct Registration {
    id: u64,
    handler: Arc<Handler>,
}

/// Synchronous publish/subscribe registry. Wire events enter through the
/// connection manager, locally synthesized events through `emit_local`;
/// handlers for one kind run in subscription order.
#[derive(Default)]
pub struct EventDispatcher {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<EventKind, Vec<Registration>>>,
}

impl EventDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a handler for one event kind. The registration lives until
    /// the returned [`Subscription`] is released or dropped; registering the
    /// same closure twice yields two independent registrations.
    pub fn subscribe(
        self: &Arc<Self>,
        kind: EventKind,
        handler: impl Fn(&DomainEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push(Registration {
                id,
                handler: Arc::new(handler),
            });
        Subscription {
            id,
            kind,
            dispatcher: self.clone(),
            released: AtomicBool::new(false),
        }
    }

    /// Deliver one event to every handler registered for its kind. A
    /// panicking handler is caught and logged; the rest still run. Handlers
    /// may subscribe or dispatch reentrantly.
    pub fn dispatch(&self, event: &DomainEvent) {
        let handlers: Vec<Arc<Handler>> = {
            let map = self.handlers.read();
            match map.get(&event.kind()) {
                Some(registrations) => registrations.iter().map(|r| r.handler.clone()).collect(),
                None => return,
            }
        };
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(kind = ?event.kind(), "event handler panicked; continuing with the rest");
            }
        }
    }

    /// Publish a locally synthesized event through the same fan-out path as
    /// wire traffic, so consumers cannot tell the two apart.
    pub fn emit_local(&self, event: DomainEvent) {
        self.dispatch(&event);
    }

    fn remove(&self, kind: EventKind, id: u64) {
        let mut map = self.handlers.write();
        if let Some(registrations) = map.get_mut(&kind) {
            registrations.retain(|r| r.id != id);
            if registrations.is_empty() {
                map.remove(&kind);
            }
        }
    }
}

/// Handle for one registration. Releasing (or dropping) removes exactly this
/// registration and no other.
pub struct Subscription {
    id: u64,
    kind: EventKind,
    dispatcher: Arc<EventDispatcher>,
    released: AtomicBool,
}

impl Subscription {
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.dispatcher.remove(self.kind, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
