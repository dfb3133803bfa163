//! Event hub
//!
//! Synchronous publish/subscribe used by entities and collections. Listeners
//! subscribe to an exact event name or to `all`, which receives every event.
//! Dispatch works on a snapshot of the listener list: listeners removed
//! during a dispatch never fire afterwards, and listeners added during a
//! dispatch wait for the next one.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::trace;

use crate::{Collection, Entity, Target, ValidationErrors, Value};

/// Name of the catch-all event subscription
pub const ALL: &str = "all";

/// Event callback
pub type Callback = Rc<dyn Fn(&Event)>;

/// Handle returned by a subscription, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Payload of an event
#[derive(Debug, Clone)]
pub enum EventData {
    /// `change` and `change:<attr>`. `value` is absent for the aggregate event
    Change { entity: Entity, value: Option<Value> },
    /// An entity joined a collection
    Add {
        entity: Entity,
        collection: Collection,
        index: usize,
    },
    /// An entity left a collection
    Remove {
        entity: Entity,
        collection: Collection,
        index: usize,
    },
    /// A collection replaced its members
    Reset { collection: Collection },
    /// An entity was destroyed
    Destroy {
        entity: Entity,
        collection: Option<Collection>,
    },
    /// A destroy request was sent and the entity waits for the server
    Waiting { entity: Entity },
    /// A network operation completed
    Sync(Target),
    /// Validation rejected a change
    Invalid {
        entity: Entity,
        errors: ValidationErrors,
    },
    /// Application defined payload
    Custom(Value),
}

/// A named event with its payload
#[derive(Debug, Clone)]
pub struct Event {
    pub name: String,
    pub data: EventData,
}

impl Event {
    /// Create an event
    pub fn new(name: impl Into<String>, data: EventData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Entity the event is about, if any
    pub fn entity(&self) -> Option<&Entity> {
        match &self.data {
            EventData::Change { entity, .. }
            | EventData::Add { entity, .. }
            | EventData::Remove { entity, .. }
            | EventData::Destroy { entity, .. }
            | EventData::Waiting { entity }
            | EventData::Invalid { entity, .. } => Some(entity),
            EventData::Sync(Target::Entity(entity)) => Some(entity),
            _ => None,
        }
    }

    /// Collection the event is about, if any
    pub fn collection(&self) -> Option<&Collection> {
        match &self.data {
            EventData::Add { collection, .. }
            | EventData::Remove { collection, .. }
            | EventData::Reset { collection } => Some(collection),
            EventData::Destroy { collection, .. } => collection.as_ref(),
            EventData::Sync(Target::Collection(collection)) => Some(collection),
            _ => None,
        }
    }

    /// New value carried by a change event
    pub fn value(&self) -> Option<&Value> {
        match &self.data {
            EventData::Change { value, .. } => value.as_ref(),
            EventData::Custom(value) => Some(value),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event Hub
// ─────────────────────────────────────────────────────────────────────────────

struct Listener {
    id: ListenerId,
    name: String,
    tag: Option<u64>,
    callback: Callback,
    active: Rc<Cell<bool>>,
}

/// Per-object listener table
#[derive(Default)]
pub struct EventHub {
    next_id: Cell<u64>,
    listeners: RefCell<Vec<Listener>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a listener id without subscribing
    pub fn allocate_id(&self) -> ListenerId {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        ListenerId(id)
    }

    /// Subscribe to an event name
    pub fn on(&self, name: &str, callback: Callback) -> ListenerId {
        self.subscribe(name, None, callback)
    }

    /// Subscribe with an owner tag, so the owner can drop all its listeners
    pub fn on_tagged(&self, name: &str, tag: u64, callback: Callback) -> ListenerId {
        self.subscribe(name, Some(tag), callback)
    }

    fn subscribe(&self, name: &str, tag: Option<u64>, callback: Callback) -> ListenerId {
        let id = self.allocate_id();
        self.listeners.borrow_mut().push(Listener {
            id,
            name: name.to_string(),
            tag,
            callback,
            active: Rc::new(Cell::new(true)),
        });
        id
    }

    /// Unsubscribe one listener. Returns false if it was not subscribed
    pub fn off(&self, id: ListenerId) -> bool {
        self.remove_where(|l| l.id == id) > 0
    }

    /// Unsubscribe every listener registered with this callback
    ///
    /// With a name, only listeners for that event are removed.
    pub fn off_callback(&self, name: Option<&str>, callback: &Callback) -> usize {
        self.remove_where(|l| {
            Rc::ptr_eq(&l.callback, callback) && name.is_none_or(|n| n == l.name)
        })
    }

    /// Unsubscribe every listener carrying this tag
    pub fn off_tag(&self, tag: u64) -> usize {
        self.remove_where(|l| l.tag == Some(tag))
    }

    /// Remove every listener
    pub fn clear(&self) {
        self.remove_where(|_| true);
    }

    fn remove_where(&self, pred: impl Fn(&Listener) -> bool) -> usize {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|l| {
            if pred(l) {
                l.active.set(false);
                false
            } else {
                true
            }
        });
        before - listeners.len()
    }

    /// Number of listeners, optionally for one event name
    pub fn listener_count(&self, name: Option<&str>) -> usize {
        let listeners = self.listeners.borrow();
        match name {
            Some(name) => listeners.iter().filter(|l| l.name == name).count(),
            None => listeners.len(),
        }
    }

    /// Dispatch an event to its listeners and to `all` listeners
    pub fn trigger(&self, event: &Event) {
        let snapshot: Vec<(Callback, Rc<Cell<bool>>)> = self
            .listeners
            .borrow()
            .iter()
            .filter(|l| l.name == event.name || l.name == ALL)
            .map(|l| (l.callback.clone(), l.active.clone()))
            .collect();

        if snapshot.is_empty() {
            return;
        }
        trace!(event = %event.name, listeners = snapshot.len(), "Dispatching event");

        for (callback, active) in snapshot {
            if active.get() {
                callback(event);
            }
        }
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("listeners", &self.listeners.borrow().len())
            .finish()
    }
}
