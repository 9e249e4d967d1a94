use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use serde_json::Value;

/// Kinds of events a resource emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceEventKind {
    LocalChange,
    LoadingChange,
    Saved,
}

/// Payload delivered to resource listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent {
    /// A property was staged locally. `value` is `None` for removals.
    LocalChange {
        property: String,
        value: Option<Value>,
    },
    LoadingChange(bool),
    /// Pending changes were acknowledged by the server.
    Saved,
}

impl ResourceEvent {
    pub fn kind(&self) -> ResourceEventKind {
        match self {
            ResourceEvent::LocalChange { .. } => ResourceEventKind::LocalChange,
            ResourceEvent::LoadingChange(_) => ResourceEventKind::LoadingChange,
            ResourceEvent::Saved => ResourceEventKind::Saved,
        }
    }
}

type Listener = Arc<dyn Fn(&ResourceEvent) + Send + Sync>;
type ListenerTable = HashMap<ResourceEventKind, Vec<(u64, Listener)>>;

/// Synchronous listener registry. Listeners run on the emitting call, in
/// registration order.
pub(crate) struct EventEmitter {
    listeners: Arc<RwLock<ListenerTable>>,
    next_id: AtomicU64,
}

impl EventEmitter {
    pub fn new() -> Self {
        EventEmitter {
            listeners: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn on<F>(&self, kind: ResourceEventKind, listener: F) -> ListenerHandle
    where
        F: Fn(&ResourceEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));

        ListenerHandle {
            kind,
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn emit(&self, event: &ResourceEvent) {
        // Snapshot first so listeners may register or unsubscribe while running.
        let snapshot: Vec<Listener> = {
            let listeners = self
                .listeners
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match listeners.get(&event.kind()) {
                Some(registered) => registered.iter().map(|(_, l)| Arc::clone(l)).collect(),
                None => return,
            }
        };
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn listener_count(&self, kind: ResourceEventKind) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Returned by `Resource::on`. Call [`ListenerHandle::unsubscribe`] to stop
/// receiving events; dropping the handle keeps the listener registered.
#[must_use = "keep the handle to be able to unsubscribe"]
pub struct ListenerHandle {
    kind: ResourceEventKind,
    id: u64,
    listeners: Weak<RwLock<ListenerTable>>,
}

impl ListenerHandle {
    pub fn unsubscribe(self) {
        let Some(listeners) = self.listeners.upgrade() else {
            return;
        };
        let mut listeners = listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(registered) = listeners.get_mut(&self.kind) {
            registered.retain(|(id, _)| *id != self.id);
        }
    }
}
