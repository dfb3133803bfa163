//! Entity collections
//!
//! An ordered set of entities of one model type, indexed by identifier and
//! by client id. Every member event is re-broadcast on the collection, so
//! observers of the collection see member changes too.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use graphbind_schema::CollectionDef;
use tracing::{debug, trace};

use crate::{
    Attributes, Callback, Cid, CollectionError, Deferred, Entity, Event, EventData, EventHub,
    ListenerId, SyncResult, Value, WeakEntity, WeakStore, ALL,
};

// ─────────────────────────────────────────────────────────────────────────────
// Comparators
// ─────────────────────────────────────────────────────────────────────────────

/// Sort order of a collection
#[derive(Clone)]
pub enum Comparator {
    /// Sort by a derived key
    Key(Rc<dyn Fn(&Entity) -> Value>),
    /// Sort by pairwise comparison
    Compare(Rc<dyn Fn(&Entity, &Entity) -> Ordering>),
}

impl Comparator {
    /// Sort by an attribute value
    pub fn attribute(name: impl Into<String>) -> Self {
        let name = name.into();
        Comparator::Key(Rc::new(move |e: &Entity| e.get(&name).unwrap_or_default()))
    }

    fn sort(&self, models: &mut [Entity]) {
        match self {
            Comparator::Key(key) => models.sort_by_cached_key(|e| SortKey(key(e))),
            Comparator::Compare(cmp) => models.sort_by(|a, b| cmp(a, b)),
        }
    }
}

struct SortKey(Value);

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.compare(&other.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Options for `add`
#[derive(Debug, Clone, Copy, Default)]
pub struct AddOptions {
    /// Insert position; appended when absent
    pub at: Option<usize>,
    /// Skip validation and `add` events
    pub silent: bool,
}

impl AddOptions {
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    pub fn at(index: usize) -> Self {
        Self {
            at: Some(index),
            ..Self::default()
        }
    }
}

/// Options for `remove`, `reset` and `sort`
#[derive(Debug, Clone, Copy, Default)]
pub struct Quiet {
    pub silent: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Collection
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct CollectionState {
    models: Vec<Entity>,
    by_id: HashMap<String, Entity>,
    by_cid: HashMap<Cid, Entity>,
    comparator: Option<Comparator>,
    parent: Option<WeakEntity>,
    in_flight: Option<Deferred<SyncResult>>,
}

struct CollectionInner {
    cid: Cid,
    def: Rc<CollectionDef>,
    hub: EventHub,
    store: Option<WeakStore>,
    state: RefCell<CollectionState>,
}

/// Shared handle to a collection
#[derive(Clone)]
pub struct Collection(Rc<CollectionInner>);

/// Non-owning handle to a collection
#[derive(Clone)]
pub struct WeakCollection(Weak<CollectionInner>);

impl WeakCollection {
    pub fn upgrade(&self) -> Option<Collection> {
        self.0.upgrade().map(Collection)
    }
}

impl PartialEq for Collection {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Collection {}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.0.state.try_borrow().map(|s| s.models.len()).unwrap_or(0);
        write!(f, "Collection({}[{}] {})", self.0.def.name, len, self.0.cid)
    }
}

impl Collection {
    /// Create a detached collection
    pub fn new(def: Rc<CollectionDef>) -> Self {
        Self::build(def, None)
    }

    /// Create a collection able to hydrate raw attributes through a store
    pub(crate) fn attached(def: Rc<CollectionDef>, store: WeakStore) -> Self {
        Self::build(def, Some(store))
    }

    fn build(def: Rc<CollectionDef>, store: Option<WeakStore>) -> Self {
        let comparator = def.comparator.clone().map(Comparator::attribute);
        Collection(Rc::new(CollectionInner {
            cid: Cid::next(),
            def,
            hub: EventHub::new(),
            store,
            state: RefCell::new(CollectionState {
                comparator,
                ..CollectionState::default()
            }),
        }))
    }

    pub fn downgrade(&self) -> WeakCollection {
        WeakCollection(Rc::downgrade(&self.0))
    }

    pub fn cid(&self) -> Cid {
        self.0.cid
    }

    pub fn def(&self) -> &Rc<CollectionDef> {
        &self.0.def
    }

    pub fn name(&self) -> &str {
        &self.0.def.name
    }

    /// Element model type
    pub fn model_type(&self) -> &str {
        &self.0.def.model
    }

    pub fn is_embedded(&self) -> bool {
        self.0.def.embedded
    }

    pub(crate) fn hub(&self) -> &EventHub {
        &self.0.hub
    }

    pub(crate) fn store(&self) -> Option<crate::Store> {
        self.0.store.as_ref().and_then(WeakStore::upgrade)
    }

    /// Entity owning this collection
    pub fn parent(&self) -> Option<Entity> {
        self.0
            .state
            .borrow()
            .parent
            .as_ref()
            .and_then(WeakEntity::upgrade)
    }

    pub(crate) fn set_parent(&self, parent: Option<&Entity>) {
        self.0.state.borrow_mut().parent = parent.map(Entity::downgrade);
    }

    pub fn set_comparator(&self, comparator: Option<Comparator>) {
        self.0.state.borrow_mut().comparator = comparator;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reading
    // ─────────────────────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.0.state.borrow().models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Members in order
    pub fn models(&self) -> Vec<Entity> {
        self.0.state.borrow().models.clone()
    }

    /// Member by identifier
    pub fn get(&self, id: &str) -> Option<Entity> {
        self.0.state.borrow().by_id.get(id).cloned()
    }

    /// Member by client id
    pub fn get_by_cid(&self, cid: Cid) -> Option<Entity> {
        self.0.state.borrow().by_cid.get(&cid).cloned()
    }

    /// Member at a position
    pub fn at(&self, index: usize) -> Option<Entity> {
        self.0.state.borrow().models.get(index).cloned()
    }

    pub fn index_of(&self, entity: &Entity) -> Option<usize> {
        self.0.state.borrow().models.iter().position(|m| m == entity)
    }

    pub fn contains(&self, entity: &Entity) -> bool {
        self.0.state.borrow().by_cid.contains_key(&entity.cid())
    }

    /// Members whose attributes match every given value
    pub fn where_attrs(&self, attrs: &Attributes) -> Vec<Entity> {
        if attrs.is_empty() {
            return Vec::new();
        }
        self.models()
            .into_iter()
            .filter(|m| attrs.iter().all(|(k, v)| m.get(k).as_ref() == Some(v)))
            .collect()
    }

    /// One attribute of every member
    pub fn pluck(&self, attr: &str) -> Vec<Option<Value>> {
        self.models().iter().map(|m| m.get(attr)).collect()
    }

    /// Members serialised in order
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.models().iter().map(Entity::to_json).collect())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Membership
    // ─────────────────────────────────────────────────────────────────────

    /// Add entities
    ///
    /// Every element is validated before anything changes, so one invalid
    /// element rejects the whole batch. Entities already present (by client
    /// id or identifier) are skipped.
    pub fn add(&self, entities: Vec<Entity>, opts: AddOptions) -> Result<(), CollectionError> {
        if !opts.silent {
            self.validate_batch(&entities)?;
        }
        let added = self.insert(entities, opts.at);
        if added.is_empty() {
            return Ok(());
        }

        if let Some(comparator) = self.comparator() {
            self.sort_members(&comparator);
        }
        if !opts.silent {
            for (index, entity) in self.models().into_iter().enumerate() {
                if added.contains(&entity.cid()) {
                    entity.trigger(&Event::new(
                        "add",
                        EventData::Add {
                            entity: entity.clone(),
                            collection: self.clone(),
                            index,
                        },
                    ));
                }
            }
        }
        Ok(())
    }

    /// Hydrate raw attribute objects through the store, then add them
    pub fn add_raw(
        &self,
        raws: Vec<serde_json::Value>,
        opts: AddOptions,
    ) -> Result<Vec<Entity>, CollectionError> {
        let store = self.store().ok_or(CollectionError::Detached)?;
        let mut entities = Vec::with_capacity(raws.len());
        for raw in raws {
            let entity = store
                .hydrate(self.model_type(), raw)
                .map_err(|e| CollectionError::Store(Box::new(e)))?;
            entities.push(entity);
        }
        self.add(entities.clone(), opts)?;
        Ok(entities)
    }

    fn validate_batch(&self, entities: &[Entity]) -> Result<(), CollectionError> {
        for (index, entity) in entities.iter().enumerate() {
            if !entity.kind().has_validation() {
                continue;
            }
            entity
                .check_candidate(&entity.attributes(), None)
                .map_err(|errors| CollectionError::Invalid { index, errors })?;
        }
        Ok(())
    }

    fn insert(&self, entities: Vec<Entity>, at: Option<usize>) -> HashSet<Cid> {
        let mut added = HashSet::new();
        let mut fresh = Vec::new();
        {
            let state = self.0.state.borrow();
            let mut ids = HashSet::new();
            for entity in entities {
                let id = entity.id();
                let duplicate = added.contains(&entity.cid())
                    || state.by_cid.contains_key(&entity.cid())
                    || id
                        .as_ref()
                        .is_some_and(|id| ids.contains(id) || state.by_id.contains_key(id));
                if duplicate {
                    trace!(collection = %self.name(), entity = ?entity, "Skipping duplicate");
                    continue;
                }
                if let Some(id) = id {
                    ids.insert(id);
                }
                added.insert(entity.cid());
                fresh.push(entity);
            }
        }

        for entity in &fresh {
            self.attach(entity);
        }

        let mut state = self.0.state.borrow_mut();
        for entity in &fresh {
            state.by_cid.insert(entity.cid(), entity.clone());
            if let Some(id) = entity.id() {
                state.by_id.insert(id, entity.clone());
            }
        }
        let index = at.unwrap_or(state.models.len()).min(state.models.len());
        state.models.splice(index..index, fresh);
        added
    }

    /// Claim an entity and forward its events
    fn attach(&self, entity: &Entity) {
        if entity.collection().is_none() {
            entity.set_collection(Some(self));
        }
        let weak = self.downgrade();
        let forward: Callback = Rc::new(move |event: &Event| {
            if let Some(collection) = weak.upgrade() {
                collection.on_member_event(event);
            }
        });
        entity.hub().on_tagged(ALL, self.cid().as_u64(), forward);
    }

    fn detach(&self, entity: &Entity) {
        if entity.collection().is_some_and(|c| c == *self) {
            entity.set_collection(None);
        }
        entity.hub().off_tag(self.cid().as_u64());
    }

    fn on_member_event(&self, event: &Event) {
        match &event.data {
            EventData::Add { collection, .. } | EventData::Remove { collection, .. }
                if collection != self =>
            {
                return;
            }
            _ => {}
        }

        if event.name == "destroy" {
            if let Some(entity) = event.entity() {
                self.remove(std::slice::from_ref(entity), Quiet::default());
            }
        } else if let Some(entity) = event.entity() {
            if event.name == format!("change:{}", entity.id_attribute()) {
                self.reindex(entity);
            }
        }
        self.0.hub.trigger(event);
    }

    fn reindex(&self, entity: &Entity) {
        let previous = entity
            .previous(entity.id_attribute())
            .and_then(|v| v.as_identifier());
        let mut state = self.0.state.borrow_mut();
        if let Some(previous) = previous {
            if state.by_id.get(&previous).is_some_and(|e| e == entity) {
                state.by_id.remove(&previous);
            }
        }
        if let Some(id) = entity.id() {
            state.by_id.insert(id, entity.clone());
        }
    }

    /// Remove entities, matched by client id or identifier
    pub fn remove(&self, entities: &[Entity], opts: Quiet) -> Vec<Entity> {
        let mut removed = Vec::new();
        for entity in entities {
            let (member, index) = {
                let mut state = self.0.state.borrow_mut();
                let member = state.by_cid.get(&entity.cid()).cloned().or_else(|| {
                    entity.id().and_then(|id| state.by_id.get(&id).cloned())
                });
                let Some(member) = member else {
                    continue;
                };
                if let Some(id) = member.id() {
                    state.by_id.remove(&id);
                }
                state.by_cid.remove(&member.cid());
                let Some(index) = state.models.iter().position(|m| *m == member) else {
                    continue;
                };
                state.models.remove(index);
                (member, index)
            };

            if !opts.silent {
                member.trigger(&Event::new(
                    "remove",
                    EventData::Remove {
                        entity: member.clone(),
                        collection: self.clone(),
                        index,
                    },
                ));
            }
            self.detach(&member);
            removed.push(member);
        }
        removed
    }

    /// Replace every member. Fires a single `reset` event
    pub fn reset(&self, entities: Vec<Entity>, opts: Quiet) -> Result<(), CollectionError> {
        if !opts.silent {
            self.validate_batch(&entities)?;
        }
        let old = {
            let mut state = self.0.state.borrow_mut();
            state.by_id.clear();
            state.by_cid.clear();
            std::mem::take(&mut state.models)
        };
        for entity in &old {
            self.detach(entity);
        }

        self.insert(entities, None);
        if let Some(comparator) = self.comparator() {
            self.sort_members(&comparator);
        }
        debug!(collection = %self.name(), len = self.len(), "Collection reset");

        if !opts.silent {
            self.0.hub.trigger(&Event::new(
                "reset",
                EventData::Reset {
                    collection: self.clone(),
                },
            ));
        }
        Ok(())
    }

    /// Re-sort with the comparator. A non-silent sort fires `reset`
    pub fn sort(&self, opts: Quiet) -> Result<(), CollectionError> {
        let comparator = self.comparator().ok_or(CollectionError::NoComparator)?;
        self.sort_members(&comparator);
        if !opts.silent {
            self.0.hub.trigger(&Event::new(
                "reset",
                EventData::Reset {
                    collection: self.clone(),
                },
            ));
        }
        Ok(())
    }

    fn comparator(&self) -> Option<Comparator> {
        self.0.state.borrow().comparator.clone()
    }

    fn sort_members(&self, comparator: &Comparator) {
        let mut models = self.models();
        comparator.sort(&mut models);
        self.0.state.borrow_mut().models = models;
    }

    /// Append one entity
    pub fn push(&self, entity: Entity, opts: AddOptions) -> Result<Entity, CollectionError> {
        let opts = AddOptions { at: None, ..opts };
        self.add(vec![entity.clone()], opts)?;
        Ok(entity)
    }

    /// Remove and return the last member
    pub fn pop(&self, opts: Quiet) -> Option<Entity> {
        let last = self.at(self.len().checked_sub(1)?)?;
        self.remove(std::slice::from_ref(&last), opts);
        Some(last)
    }

    /// Insert one entity at the front
    pub fn unshift(&self, entity: Entity, opts: AddOptions) -> Result<Entity, CollectionError> {
        let opts = AddOptions { at: Some(0), ..opts };
        self.add(vec![entity.clone()], opts)?;
        Ok(entity)
    }

    /// Remove and return the first member
    pub fn shift(&self, opts: Quiet) -> Option<Entity> {
        let first = self.at(0)?;
        self.remove(std::slice::from_ref(&first), opts);
        Some(first)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────

    pub fn on(&self, name: &str, callback: Callback) -> ListenerId {
        self.0.hub.on(name, callback)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.0.hub.off(id)
    }

    pub fn trigger(&self, event: &Event) {
        self.0.hub.trigger(event);
    }

    pub fn listener_count(&self, name: Option<&str>) -> usize {
        self.0.hub.listener_count(name)
    }

    // ─────────────────────────────────────────────────────────────────────
    // In-flight fetch
    // ─────────────────────────────────────────────────────────────────────

    /// Whether no fetch is in flight
    pub fn in_sync(&self) -> bool {
        self.0
            .state
            .borrow()
            .in_flight
            .as_ref()
            .is_none_or(|d| !d.is_pending())
    }

    pub(crate) fn replace_in_flight(
        &self,
        deferred: Option<Deferred<SyncResult>>,
    ) -> Option<Deferred<SyncResult>> {
        std::mem::replace(&mut self.0.state.borrow_mut().in_flight, deferred)
    }

    /// Forget the in-flight fetch once it has settled
    pub(crate) fn clear_settled_in_flight(&self) {
        let mut state = self.0.state.borrow_mut();
        if state.in_flight.as_ref().is_some_and(|d| !d.is_pending()) {
            state.in_flight = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityType;
    use graphbind_schema::{ModelDef, RuleSpec};
    use std::cell::Cell;

    fn tag_kind(validated: bool) -> Rc<EntityType> {
        let mut def = ModelDef::new("Tag", "/tags");
        if validated {
            def = def.rule("label", RuleSpec::NotNull);
        }
        Rc::new(EntityType::new(Rc::new(def)))
    }

    fn tag(kind: &Rc<EntityType>, id: Option<&str>, label: &str) -> Entity {
        let mut attrs = Attributes::new();
        if let Some(id) = id {
            attrs.insert("_id".into(), Value::from(id));
        }
        attrs.insert("label".into(), Value::from(label));
        Entity::new(kind.clone(), attrs).unwrap()
    }

    fn tags() -> Collection {
        Collection::new(Rc::new(CollectionDef::anonymous("Tag")))
    }

    fn names(collection: &Collection) -> Rc<RefCell<Vec<String>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        collection.on(ALL, Rc::new(move |e: &Event| l.borrow_mut().push(e.name.clone())));
        log
    }

    #[test]
    fn test_add_and_lookup() {
        let kind = tag_kind(false);
        let collection = tags();
        let a = tag(&kind, Some("t1"), "a");
        let b = tag(&kind, None, "b");
        collection.add(vec![a.clone(), b.clone()], AddOptions::default()).unwrap();

        assert_eq!(collection.len(), 2);
        assert_eq!(collection.get("t1"), Some(a.clone()));
        assert_eq!(collection.get_by_cid(b.cid()), Some(b.clone()));
        assert_eq!(collection.at(1), Some(b.clone()));
        assert_eq!(a.collection(), Some(collection.clone()));
    }

    #[test]
    fn test_add_deduplicates() {
        let kind = tag_kind(false);
        let collection = tags();
        let a = tag(&kind, Some("t1"), "a");
        let twin = tag(&kind, Some("t1"), "twin");
        collection
            .add(vec![a.clone(), a.clone(), twin], AddOptions::default())
            .unwrap();
        collection.add(vec![a], AddOptions::default()).unwrap();
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn test_invalid_element_rejects_whole_batch() {
        let kind = tag_kind(true);
        let collection = tags();
        let mut batch: Vec<Entity> = (0..5).map(|i| tag(&kind, None, &format!("ok{i}"))).collect();
        batch.insert(2, tag(&kind, None, ""));

        let result = collection.add(batch, AddOptions::default());
        assert!(matches!(result, Err(CollectionError::Invalid { index: 2, .. })));
        assert!(collection.is_empty());
    }

    #[test]
    fn test_add_at_index_and_events() {
        let kind = tag_kind(false);
        let collection = tags();
        let log = names(&collection);
        collection
            .add(vec![tag(&kind, None, "a"), tag(&kind, None, "c")], AddOptions::default())
            .unwrap();
        let b = tag(&kind, None, "b");
        collection.add(vec![b.clone()], AddOptions::at(1)).unwrap();

        assert_eq!(collection.index_of(&b), Some(1));
        assert_eq!(*log.borrow(), vec!["add", "add", "add"]);
    }

    #[test]
    fn test_comparator_keeps_order() {
        let kind = tag_kind(false);
        let collection = Collection::new(Rc::new(CollectionDef::anonymous("Tag").sorted_by("label")));
        collection
            .add(
                vec![tag(&kind, None, "c"), tag(&kind, None, "a"), tag(&kind, None, "b")],
                AddOptions::default(),
            )
            .unwrap();
        let labels: Vec<_> = collection
            .pluck("label")
            .into_iter()
            .map(|v| v.unwrap().to_display_string())
            .collect();
        assert_eq!(labels, vec!["a", "b", "c"]);

        collection.set_comparator(Some(Comparator::Compare(Rc::new(|a: &Entity, b: &Entity| {
            b.get("label").unwrap().compare(&a.get("label").unwrap())
        }))));
        collection.sort(Quiet::default()).unwrap();
        assert_eq!(collection.at(0).unwrap().get("label"), Some(Value::from("c")));

        assert!(matches!(tags().sort(Quiet::default()), Err(CollectionError::NoComparator)));
    }

    #[test]
    fn test_remove_and_reset() {
        let kind = tag_kind(false);
        let collection = tags();
        let a = tag(&kind, Some("t1"), "a");
        let b = tag(&kind, Some("t2"), "b");
        collection.add(vec![a.clone(), b.clone()], AddOptions::default()).unwrap();
        let log = names(&collection);

        let removed = collection.remove(std::slice::from_ref(&a), Quiet::default());
        assert_eq!(removed, vec![a.clone()]);
        assert!(a.collection().is_none());
        assert!(collection.get("t1").is_none());

        let c = tag(&kind, Some("t3"), "c");
        collection.reset(vec![c.clone()], Quiet::default()).unwrap();
        assert_eq!(collection.models(), vec![c]);
        assert_eq!(b.listener_count(None), 0);
        assert_eq!(*log.borrow(), vec!["remove", "reset"]);
    }

    #[test]
    fn test_member_events_forwarded() {
        let kind = tag_kind(false);
        let collection = tags();
        let a = tag(&kind, None, "a");
        collection.add(vec![a.clone()], AddOptions::default()).unwrap();
        let log = names(&collection);

        a.set("label", "z").unwrap();
        assert_eq!(*log.borrow(), vec!["change:label", "change"]);
    }

    #[test]
    fn test_foreign_add_not_forwarded() {
        let kind = tag_kind(false);
        let first = tags();
        let second = tags();
        let a = tag(&kind, None, "a");
        first.add(vec![a.clone()], AddOptions::default()).unwrap();
        let log = names(&first);

        second.add(vec![a.clone()], AddOptions::default()).unwrap();
        assert!(log.borrow().is_empty());
        assert_eq!(a.collection(), Some(first));
    }

    #[test]
    fn test_destroy_evicts_member() {
        let kind = tag_kind(false);
        let collection = tags();
        let a = tag(&kind, Some("t1"), "a");
        collection.add(vec![a.clone()], AddOptions::default()).unwrap();
        let log = names(&collection);

        a.trigger(&Event::new(
            "destroy",
            EventData::Destroy {
                entity: a.clone(),
                collection: Some(collection.clone()),
            },
        ));
        assert!(collection.is_empty());
        assert_eq!(*log.borrow(), vec!["remove", "destroy"]);
    }

    #[test]
    fn test_identifier_change_reindexes() {
        let kind = tag_kind(false);
        let collection = tags();
        let a = tag(&kind, None, "a");
        collection.add(vec![a.clone()], AddOptions::default()).unwrap();
        let resets = Rc::new(Cell::new(0));
        let r = resets.clone();
        collection.on("reset", Rc::new(move |_: &Event| r.set(r.get() + 1)));

        a.set("_id", "t9").unwrap();
        assert_eq!(collection.get("t9"), Some(a.clone()));
        a.set("_id", "t10").unwrap();
        assert!(collection.get("t9").is_none());
        assert_eq!(collection.get("t10"), Some(a));
        assert_eq!(resets.get(), 0);
    }

    #[test]
    fn test_push_pop_shift_unshift() {
        let kind = tag_kind(false);
        let collection = tags();
        let a = collection.push(tag(&kind, None, "a"), AddOptions::default()).unwrap();
        let b = collection.unshift(tag(&kind, None, "b"), AddOptions::default()).unwrap();
        assert_eq!(collection.models(), vec![b.clone(), a.clone()]);

        assert_eq!(collection.pop(Quiet::default()), Some(a));
        assert_eq!(collection.shift(Quiet::default()), Some(b));
        assert_eq!(collection.pop(Quiet::default()), None);
    }

    #[test]
    fn test_where_and_contains() {
        let kind = tag_kind(false);
        let collection = tags();
        let a = tag(&kind, None, "a");
        collection
            .add(vec![a.clone(), tag(&kind, None, "b")], AddOptions::default())
            .unwrap();

        let query = Attributes::from([("label".to_string(), Value::from("a"))]);
        assert_eq!(collection.where_attrs(&query), vec![a.clone()]);
        assert!(collection.where_attrs(&Attributes::new()).is_empty());
        assert!(collection.contains(&a));
        assert_eq!(collection.to_json().as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_add_raw_requires_store() {
        let result = tags().add_raw(vec![serde_json::json!({"label": "x"})], AddOptions::default());
        assert!(matches!(result, Err(CollectionError::Detached)));
    }
}
