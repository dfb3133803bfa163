//! Entity Registry
//!
//! Deduplicates live entities by `(type, identifier)`. Slots hold weak
//! handles, so an entity stays registered exactly as long as something else
//! keeps it alive. Entities without an identifier register themselves the
//! first time their identifier attribute is assigned; a `destroy` event
//! frees the slot.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::{Entity, Event, ListenerId, WeakEntity};

type Slots = HashMap<String, HashMap<String, WeakEntity>>;

/// Registry of live entities by type and identifier
#[derive(Clone, Default)]
pub struct EntityRegistry {
    slots: Rc<RefCell<Slots>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an entity
    ///
    /// With an identifier the slot is filled now; otherwise it is filled
    /// when the identifier attribute changes for the first time.
    pub fn add(&self, entity: &Entity) {
        match entity.id() {
            Some(id) => self.insert(entity, &id),
            None => self.wait_for_id(entity),
        }
        self.watch_destroy(entity);
    }

    fn insert(&self, entity: &Entity, id: &str) {
        let mut slots = self.slots.borrow_mut();
        let by_id = slots.entry(entity.type_name().to_string()).or_default();
        prune(by_id);
        if let Some(existing) = by_id.get(id).and_then(WeakEntity::upgrade) {
            if existing != *entity {
                warn!(
                    model = entity.type_name(),
                    id,
                    "Overwriting registry slot held by another live entity"
                );
            }
        }
        by_id.insert(id.to_string(), entity.downgrade());
        debug!(model = entity.type_name(), id, "Registered entity");
    }

    fn wait_for_id(&self, entity: &Entity) {
        let weak = Rc::downgrade(&self.slots);
        let own_id: Rc<Cell<Option<ListenerId>>> = Rc::new(Cell::new(None));
        let listener = own_id.clone();

        let id = entity.on(
            &format!("change:{}", entity.id_attribute()),
            Rc::new(move |event: &Event| {
                let (Some(slots), Some(entity)) = (weak.upgrade(), event.entity()) else {
                    return;
                };
                let Some(id) = entity.id() else {
                    return;
                };
                EntityRegistry { slots }.insert(entity, &id);
                if let Some(own) = listener.take() {
                    entity.off(own);
                }
            }),
        );
        own_id.set(Some(id));
    }

    fn watch_destroy(&self, entity: &Entity) {
        let weak: Weak<RefCell<Slots>> = Rc::downgrade(&self.slots);
        entity.on(
            "destroy",
            Rc::new(move |event: &Event| {
                if let (Some(slots), Some(entity)) = (weak.upgrade(), event.entity()) {
                    EntityRegistry { slots }.remove_entity(entity);
                }
            }),
        );
    }

    /// Look up a live entity
    pub fn fetch(&self, model: &str, id: &str) -> Option<Entity> {
        let mut slots = self.slots.borrow_mut();
        let by_id = slots.get_mut(model)?;
        match by_id.get(id).map(WeakEntity::upgrade) {
            Some(Some(entity)) => Some(entity),
            Some(None) => {
                by_id.remove(id);
                None
            }
            None => None,
        }
    }

    /// Free a slot
    pub fn remove(&self, model: &str, id: &str) -> bool {
        self.slots
            .borrow_mut()
            .get_mut(model)
            .is_some_and(|by_id| by_id.remove(id).is_some())
    }

    /// Free the slot held by this entity, if it holds one
    pub fn remove_entity(&self, entity: &Entity) -> bool {
        let Some(id) = entity.id() else {
            return false;
        };
        let mut slots = self.slots.borrow_mut();
        let Some(by_id) = slots.get_mut(entity.type_name()) else {
            return false;
        };
        let held = by_id
            .get(&id)
            .and_then(WeakEntity::upgrade)
            .is_some_and(|e| e == *entity);
        if held {
            by_id.remove(&id);
            debug!(model = entity.type_name(), id, "Unregistered entity");
        }
        prune(by_id);
        held
    }

    /// Number of live entities of a type
    pub fn live_count(&self, model: &str) -> usize {
        self.slots
            .borrow()
            .get(model)
            .map(|by_id| by_id.values().filter(|w| w.is_alive()).count())
            .unwrap_or(0)
    }
}

/// Drop slots whose entity is gone
fn prune(by_id: &mut HashMap<String, WeakEntity>) {
    let before = by_id.len();
    by_id.retain(|_, weak| weak.is_alive());
    if by_id.len() < before {
        debug!(pruned = before - by_id.len(), "Pruned dead registry slots");
    }
}

impl std::fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.borrow();
        f.debug_map()
            .entries(slots.iter().map(|(model, by_id)| (model, by_id.len())))
            .finish()
    }
}
