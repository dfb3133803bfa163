//! Entities
//!
//! An [`Entity`] is a typed, mutable attribute record shared through
//! reference-counted handles. Changes are applied synchronously and announced
//! through a change cycle:
//!
//! 1. `set` validates the candidate attributes, then applies them.
//! 2. One `change:<attr>` event fires per attribute that differs from its
//!    current value, including attributes changed silently since the last
//!    cycle.
//! 3. While attributes differ from the last snapshot, a `change` event fires
//!    and the snapshot is retaken. Handlers may call `set` again; nested
//!    cycles only emit their `change:<attr>` events and leave the loop to the
//!    outermost cycle.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use graphbind_schema::ModelDef;
use tracing::trace;

use crate::change_map::ChangeMap;
use crate::validation::{self, Validator};
use crate::{
    attributes_from_json, get_nested, remove_nested, set_nested, Attributes, Callback,
    Collection, Event, EventData, EventHub, ListenerId, ReadTracker, SetError, Store,
    ValidationErrors, Value, WeakCollection, WeakStore,
};

// ─────────────────────────────────────────────────────────────────────────────
// Client Ids
// ─────────────────────────────────────────────────────────────────────────────

static NEXT_CID: AtomicU64 = AtomicU64::new(1);

/// Process-local identifier of an entity or collection instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid(u64);

impl Cid {
    /// Allocate the next id
    pub fn next() -> Self {
        Cid(NEXT_CID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Cid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "c{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entity Types
// ─────────────────────────────────────────────────────────────────────────────

/// Runtime descriptor of a model type: its definition plus custom validators
pub struct EntityType {
    def: Rc<ModelDef>,
    validators: RefCell<Vec<Validator>>,
    store: Option<WeakStore>,
}

impl EntityType {
    /// Type without a store; its entities cannot sync
    pub fn new(def: Rc<ModelDef>) -> Self {
        Self {
            def,
            validators: RefCell::new(Vec::new()),
            store: None,
        }
    }

    pub(crate) fn attached(def: Rc<ModelDef>, store: WeakStore) -> Self {
        Self {
            store: Some(store),
            ..Self::new(def)
        }
    }

    /// Store that created this type, if it is still alive
    pub fn store(&self) -> Option<Store> {
        self.store.as_ref().and_then(WeakStore::upgrade)
    }

    pub fn def(&self) -> &Rc<ModelDef> {
        &self.def
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Register a custom validator
    pub fn add_validator(&self, validator: Validator) {
        self.validators.borrow_mut().push(validator);
    }

    pub fn has_validation(&self) -> bool {
        validation::has_validation(&self.def, &self.validators.borrow())
    }

    /// Validate a candidate attribute map
    pub fn validate(&self, attrs: &Attributes) -> Option<ValidationErrors> {
        let validators = self.validators.borrow().clone();
        validation::validate(&self.def, &validators, attrs)
    }
}

impl std::fmt::Debug for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityType")
            .field("name", &self.def.name)
            .field("validators", &self.validators.borrow().len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Set Options
// ─────────────────────────────────────────────────────────────────────────────

/// Receives validation failures instead of the `error` event
pub type ErrorCallback = Rc<dyn Fn(&Entity, &ValidationErrors)>;

/// Options for `set`, `unset` and `clear`
#[derive(Clone, Default)]
pub struct SetOptions {
    /// Skip validation and defer change events to the next cycle
    pub silent: bool,
    /// Delete the attributes instead of assigning them
    pub unset: bool,
    /// Report validation failures here instead of firing `error`
    pub error: Option<ErrorCallback>,
}

impl SetOptions {
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    pub fn with_error(mut self, callback: ErrorCallback) -> Self {
        self.error = Some(callback);
        self
    }
}

impl std::fmt::Debug for SetOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetOptions")
            .field("silent", &self.silent)
            .field("unset", &self.unset)
            .field("error", &self.error.is_some())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entity
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct EntityState {
    id: Option<String>,
    attributes: Attributes,
    previous: Attributes,
    changed: BTreeMap<String, Option<Value>>,
    silent: BTreeSet<String>,
    pending: BTreeSet<String>,
    changing: bool,
    collection: Option<WeakCollection>,
}

struct EntityInner {
    kind: Rc<EntityType>,
    cid: Cid,
    hub: EventHub,
    state: RefCell<EntityState>,
    trackers: RefCell<Vec<Rc<ChangeMap>>>,
}

/// Shared handle to an entity
#[derive(Clone)]
pub struct Entity(Rc<EntityInner>);

/// Non-owning handle to an entity
#[derive(Clone, Default)]
pub struct WeakEntity(Weak<EntityInner>);

impl WeakEntity {
    pub fn upgrade(&self) -> Option<Entity> {
        self.0.upgrade().map(Entity)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Entity {}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.0.state.try_borrow();
        let id = state.as_ref().ok().and_then(|s| s.id.clone());
        write!(f, "Entity({}#{} {})", self.type_name(), id.unwrap_or_default(), self.0.cid)
    }
}

impl Entity {
    /// Create an entity. Type defaults are merged under `attrs`
    ///
    /// Construction is silent: no events fire and nothing is validated.
    pub fn new(kind: Rc<EntityType>, attrs: Attributes) -> Result<Self, SetError> {
        let mut initial = attributes_from_json(kind.def().defaults.clone());
        initial.extend(attrs);

        let entity = Entity(Rc::new(EntityInner {
            kind,
            cid: Cid::next(),
            hub: EventHub::new(),
            state: RefCell::new(EntityState::default()),
            trackers: RefCell::new(Vec::new()),
        }));
        entity.set_attrs(initial, SetOptions::silent())?;

        {
            let mut state = entity.0.state.borrow_mut();
            state.changed.clear();
            state.silent.clear();
            state.pending.clear();
            state.previous = state.attributes.clone();
        }
        Ok(entity)
    }

    pub fn downgrade(&self) -> WeakEntity {
        WeakEntity(Rc::downgrade(&self.0))
    }

    pub fn cid(&self) -> Cid {
        self.0.cid
    }

    /// Server identifier, absent while new
    pub fn id(&self) -> Option<String> {
        self.0.state.borrow().id.clone()
    }

    pub fn is_new(&self) -> bool {
        self.0.state.borrow().id.is_none()
    }

    pub fn kind(&self) -> &Rc<EntityType> {
        &self.0.kind
    }

    pub fn def(&self) -> &Rc<ModelDef> {
        self.0.kind.def()
    }

    pub fn type_name(&self) -> &str {
        self.0.kind.name()
    }

    pub fn id_attribute(&self) -> &str {
        &self.def().id_attribute
    }

    /// Collection this entity belongs to, if it is still alive
    pub fn collection(&self) -> Option<Collection> {
        self.0
            .state
            .borrow()
            .collection
            .as_ref()
            .and_then(WeakCollection::upgrade)
    }

    pub(crate) fn set_collection(&self, collection: Option<&Collection>) {
        self.0.state.borrow_mut().collection = collection.map(Collection::downgrade);
    }

    pub(crate) fn hub(&self) -> &EventHub {
        &self.0.hub
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reading
    // ─────────────────────────────────────────────────────────────────────

    /// Top-level attribute, without path resolution
    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.0.state.borrow().attributes.get(name).cloned()
    }

    /// Copy of every attribute
    pub fn attributes(&self) -> Attributes {
        self.0.state.borrow().attributes.clone()
    }

    /// Resolve a dotted path through nested entities and plain objects
    ///
    /// Returns `None` as soon as a hop is missing.
    pub fn get(&self, path: &str) -> Option<Value> {
        let (first, rest) = match path.split_once('.') {
            Some((first, rest)) => (first, Some(rest)),
            None => (path, None),
        };
        let value = self.attribute(first)?;
        match rest {
            Some(rest) => value.resolve(rest),
            None => Some(value),
        }
    }

    /// [`get`](Self::get), recording the read on a tracker
    ///
    /// Collections passed through on the way (`tags.length`) are recorded
    /// as membership reads.
    pub fn get_tracked(&self, path: &str, tracker: &ReadTracker) -> Option<Value> {
        tracker.record(self, path);
        let mut names = path.split('.');
        let mut value = self.attribute(names.next()?)?;
        for name in names {
            if let Value::Collection(collection) = &value {
                tracker.record_collection(collection);
            }
            value = value.member(name)?;
        }
        Some(value)
    }

    /// Whether the attribute resolves to a non-null value
    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_some_and(|v| !v.is_null())
    }

    /// HTML-escaped display form of an attribute
    pub fn escape(&self, path: &str) -> String {
        let raw = self.get(path).map(|v| v.to_display_string()).unwrap_or_default();
        escape_html(&raw)
    }

    /// Value of an attribute at the last completed change cycle
    pub fn previous(&self, path: &str) -> Option<Value> {
        get_nested(&self.0.state.borrow().previous, path).cloned()
    }

    /// Snapshot taken at the last completed change cycle
    pub fn previous_attributes(&self) -> Attributes {
        self.0.state.borrow().previous.clone()
    }

    /// Whether anything (or one attribute) changed since the last cycle
    pub fn has_changed(&self, attr: Option<&str>) -> bool {
        let state = self.0.state.borrow();
        match attr {
            Some(attr) => state.changed.contains_key(attr),
            None => !state.changed.is_empty(),
        }
    }

    /// Changed attributes, or which attributes of `diff` differ from the
    /// last snapshot. `None` when nothing differs
    pub fn changed_attributes(
        &self,
        diff: Option<&Attributes>,
    ) -> Option<BTreeMap<String, Option<Value>>> {
        let state = self.0.state.borrow();
        let changed: BTreeMap<String, Option<Value>> = match diff {
            None => state.changed.clone(),
            Some(diff) => diff
                .iter()
                .filter(|(k, v)| state.previous.get(*k) != Some(*v))
                .map(|(k, v)| (k.clone(), Some(v.clone())))
                .collect(),
        };
        if changed.is_empty() { None } else { Some(changed) }
    }

    /// Validate a candidate attribute map against this entity's type
    pub fn validate(&self, candidate: &Attributes) -> Option<ValidationErrors> {
        self.0.kind.validate(candidate)
    }

    /// Whether the current attributes pass validation
    pub fn is_valid(&self) -> bool {
        !self.0.kind.has_validation() || self.validate(&self.attributes()).is_none()
    }

    /// Serialise attributes. Names starting with `-` are local only
    pub fn to_json(&self) -> serde_json::Value {
        let attributes = self.attributes();
        serde_json::Value::Object(
            attributes
                .iter()
                .filter(|(k, _)| !k.starts_with('-'))
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    // ─────────────────────────────────────────────────────────────────────
    // Writing
    // ─────────────────────────────────────────────────────────────────────

    /// Assign one attribute and run a change cycle
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<(), SetError> {
        self.set_with(key, value, SetOptions::default())
    }

    /// Assign one attribute with options
    pub fn set_with(
        &self,
        key: &str,
        value: impl Into<Value>,
        opts: SetOptions,
    ) -> Result<(), SetError> {
        let mut attrs = Attributes::new();
        attrs.insert(key.to_string(), value.into());
        self.set_attrs(attrs, opts)
    }

    /// Assign several attributes at once
    ///
    /// Validation runs first; on failure nothing is mutated and the error is
    /// reported through `opts.error` or an `error` event.
    pub fn set_attrs(&self, attrs: Attributes, opts: SetOptions) -> Result<(), SetError> {
        let entries = attrs
            .into_iter()
            .map(|(k, v)| (k, if opts.unset { None } else { Some(v) }))
            .collect();
        self.apply_routed(entries, &opts)
    }

    /// Delete one attribute
    pub fn unset(&self, key: &str, opts: SetOptions) -> Result<(), SetError> {
        let opts = SetOptions { unset: true, ..opts };
        self.apply_routed(vec![(key.to_string(), None)], &opts)
    }

    /// Delete every attribute
    pub fn clear(&self, opts: SetOptions) -> Result<(), SetError> {
        let opts = SetOptions { unset: true, ..opts };
        let entries = self
            .0
            .state
            .borrow()
            .attributes
            .keys()
            .map(|k| (k.clone(), None))
            .collect();
        self.apply_routed(entries, &opts)
    }

    /// Add `by` to a numeric attribute, optionally clamping at zero
    pub fn inc(&self, path: &str, by: f64, min_zero: bool) -> Result<(), SetError> {
        let current = self.get(path).and_then(|v| v.as_f64()).unwrap_or(0.0);
        let mut next = current + by;
        if min_zero && next < 0.0 {
            next = 0.0;
        }
        let value = if next.fract() == 0.0 && next.abs() < 9e15 {
            Value::Int(next as i64)
        } else {
            Value::Float(next)
        };
        self.set(path, value)
    }

    /// Run a change cycle for changes made silently
    pub fn change(&self) {
        self.change_cycle(Vec::new());
    }

    /// Route dotted keys whose prefix resolves to a nested entity into that
    /// entity; everything else applies here.
    ///
    /// Every target is checked before any of them is written, so a rejected
    /// set leaves the whole graph untouched.
    fn apply_routed(
        &self,
        entries: Vec<(String, Option<Value>)>,
        opts: &SetOptions,
    ) -> Result<(), SetError> {
        let mut local = Vec::new();
        let mut delegated: Vec<(Entity, Vec<(String, Option<Value>)>)> = Vec::new();
        for (key, value) in entries {
            match self.route(&key) {
                Some((target, rest)) => match delegated.iter_mut().find(|(e, _)| *e == target) {
                    Some((_, group)) => group.push((rest, value)),
                    None => delegated.push((target, vec![(rest, value)])),
                },
                None => local.push((key, value)),
            }
        }

        for (target, group) in &delegated {
            target.precheck(group, opts)?;
        }
        self.precheck(&local, opts)?;

        for (target, group) in delegated {
            target.commit(group, opts);
        }
        self.commit(local, opts);
        Ok(())
    }

    /// Deepest nested entity along a dotted path, with the remaining path
    fn route(&self, path: &str) -> Option<(Entity, String)> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.len() < 2 {
            return None;
        }
        let mut found = None;
        let mut value = self.attribute(segments[0])?;
        for (i, name) in segments.iter().enumerate().skip(1) {
            if let Value::Entity(entity) = &value {
                found = Some((entity.clone(), segments[i..].join(".")));
            }
            match value.member(name) {
                Some(next) => value = next,
                None => break,
            }
        }
        found
    }

    /// Validation and ownership checks. Mutates nothing
    fn precheck(&self, entries: &[(String, Option<Value>)], opts: &SetOptions) -> Result<(), SetError> {
        if entries.is_empty() {
            return Ok(());
        }
        if !opts.silent {
            self.check(entries, opts)?;
        }
        for (attr, value) in entries {
            if let Some(Value::Collection(collection)) = value {
                if collection.parent().is_some_and(|owner| owner != *self) {
                    return Err(SetError::CollectionOwned { attr: attr.clone() });
                }
            }
        }
        Ok(())
    }

    /// Write checked entries and run the change cycle
    fn commit(&self, entries: Vec<(String, Option<Value>)>, opts: &SetOptions) {
        if entries.is_empty() {
            return;
        }
        for (_, value) in &entries {
            if let Some(Value::Collection(collection)) = value {
                collection.set_parent(Some(self));
            }
        }

        let id_attr = self.id_attribute().to_string();
        let mut changes = Vec::new();
        {
            let mut guard = self.0.state.borrow_mut();
            let state = &mut *guard;
            for (attr, value) in entries {
                if attr == id_attr {
                    state.id = value.as_ref().and_then(Value::as_identifier);
                }

                if get_nested(&state.attributes, &attr) != value.as_ref() {
                    if opts.silent {
                        state.silent.insert(attr.clone());
                    } else {
                        changes.push(attr.clone());
                    }
                }

                match &value {
                    Some(v) => set_nested(&mut state.attributes, &attr, v.clone()),
                    None => {
                        remove_nested(&mut state.attributes, &attr);
                    }
                }

                if get_nested(&state.previous, &attr) != value.as_ref() {
                    state.changed.insert(attr.clone(), value);
                    if !opts.silent {
                        state.pending.insert(attr);
                    }
                } else {
                    state.changed.remove(&attr);
                    state.pending.remove(&attr);
                }
            }
        }

        if !opts.silent {
            self.change_cycle(changes);
        }
    }

    fn check(&self, entries: &[(String, Option<Value>)], opts: &SetOptions) -> Result<(), SetError> {
        if !self.0.kind.has_validation() {
            return Ok(());
        }
        let mut candidate = self.attributes();
        for (key, value) in entries {
            match value {
                Some(v) => set_nested(&mut candidate, key, v.clone()),
                None => {
                    remove_nested(&mut candidate, key);
                }
            }
        }
        self.check_candidate(&candidate, opts.error.as_ref())
            .map_err(SetError::Invalid)
    }

    /// Validate a full candidate map, reporting failures
    pub(crate) fn check_candidate(
        &self,
        candidate: &Attributes,
        callback: Option<&ErrorCallback>,
    ) -> Result<(), ValidationErrors> {
        match self.validate(candidate) {
            None => Ok(()),
            Some(errors) => {
                match callback {
                    Some(callback) => callback(self, &errors),
                    None => self.trigger(&Event::new(
                        "error",
                        EventData::Invalid {
                            entity: self.clone(),
                            errors: errors.clone(),
                        },
                    )),
                }
                Err(errors)
            }
        }
    }

    fn change_cycle(&self, changes: Vec<String>) {
        let (was_changing, attrs) = {
            let mut state = self.0.state.borrow_mut();
            let was_changing = std::mem::replace(&mut state.changing, true);
            let silent = std::mem::take(&mut state.silent);
            state.pending.extend(silent.iter().cloned());
            let mut attrs = changes;
            let quiet: Vec<String> = silent.into_iter().filter(|a| !attrs.contains(a)).collect();
            attrs.extend(quiet);
            (was_changing, attrs)
        };

        for attr in attrs {
            let value = self.get(&attr);
            self.trigger(&Event::new(
                format!("change:{attr}"),
                EventData::Change {
                    entity: self.clone(),
                    value,
                },
            ));
        }
        if was_changing {
            return;
        }

        loop {
            {
                let mut state = self.0.state.borrow_mut();
                if state.pending.is_empty() {
                    break;
                }
                state.pending.clear();
            }
            trace!(entity = ?self, "Change cycle");
            self.trigger(&Event::new(
                "change",
                EventData::Change {
                    entity: self.clone(),
                    value: None,
                },
            ));
            let mut guard = self.0.state.borrow_mut();
            let state = &mut *guard;
            let (pending, silent) = (&state.pending, &state.silent);
            state
                .changed
                .retain(|attr, _| pending.contains(attr) || silent.contains(attr));
            state.previous = state.attributes.clone();
        }
        self.0.state.borrow_mut().changing = false;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────

    /// Subscribe to an event
    ///
    /// `change:` subscriptions whose attribute contains a `.` follow the
    /// path across nested entities and keep following it when intermediate
    /// entities are replaced. Every other name goes straight to the hub.
    pub fn on(&self, name: &str, callback: Callback) -> ListenerId {
        match nested_change_path(name) {
            Some(path) => self.track(path, callback),
            None => self.0.hub.on(name, callback),
        }
    }

    fn track(&self, path: &str, callback: Callback) -> ListenerId {
        let existing = self
            .0
            .trackers
            .borrow()
            .iter()
            .find(|t| t.path() == path && Rc::ptr_eq(t.callback(), &callback))
            .cloned();
        if let Some(tracker) = existing {
            tracker.build();
            return tracker.id();
        }

        let tracker = ChangeMap::new(self.0.hub.allocate_id(), self, path, callback);
        self.0.trackers.borrow_mut().push(tracker.clone());
        tracker.build();
        tracker.id()
    }

    /// Unsubscribe by id. Nested subscriptions release every hop listener
    pub fn off(&self, id: ListenerId) -> bool {
        let tracker = {
            let mut trackers = self.0.trackers.borrow_mut();
            trackers
                .iter()
                .position(|t| t.id() == id)
                .map(|i| trackers.remove(i))
        };
        match tracker {
            Some(tracker) => {
                tracker.detach();
                true
            }
            None => self.0.hub.off(id),
        }
    }

    /// Unsubscribe every listener registered for `name` with this callback
    pub fn off_callback(&self, name: &str, callback: &Callback) -> usize {
        let Some(path) = nested_change_path(name) else {
            return self.0.hub.off_callback(Some(name), callback);
        };
        let removed: Vec<Rc<ChangeMap>> = {
            let mut trackers = self.0.trackers.borrow_mut();
            let (removed, kept) = std::mem::take(&mut *trackers)
                .into_iter()
                .partition(|t| t.path() == path && Rc::ptr_eq(t.callback(), callback));
            *trackers = kept;
            removed
        };
        for tracker in &removed {
            tracker.detach();
        }
        removed.len()
    }

    /// Dispatch an event to this entity's listeners
    pub fn trigger(&self, event: &Event) {
        self.0.hub.trigger(event);
    }

    /// Number of direct listeners, optionally for one event name
    pub fn listener_count(&self, name: Option<&str>) -> usize {
        self.0.hub.listener_count(name)
    }

    /// Number of live nested-path subscriptions
    pub fn tracker_count(&self) -> usize {
        self.0.trackers.borrow().len()
    }
}

fn nested_change_path(name: &str) -> Option<&str> {
    name.strip_prefix("change:").filter(|path| path.contains('.'))
}

/// Escape text for inclusion in HTML
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphbind_schema::{CollectionDef, RuleSpec};
    use serde_json::json;
    use std::cell::Cell;

    fn kind(def: ModelDef) -> Rc<EntityType> {
        Rc::new(EntityType::new(Rc::new(def)))
    }

    fn user() -> Entity {
        let attrs = Attributes::from([("name".to_string(), Value::from("Ann"))]);
        Entity::new(kind(ModelDef::new("User", "/users")), attrs).unwrap()
    }

    fn record(entity: &Entity) -> Rc<RefCell<Vec<String>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        entity.on("all", Rc::new(move |e: &Event| l.borrow_mut().push(e.name.clone())));
        log
    }

    #[test]
    fn test_get_after_set() {
        let entity = user();
        assert_eq!(entity.get("name"), Some(Value::from("Ann")));
        entity.set("name", "Bea").unwrap();
        assert_eq!(entity.get("name"), Some(Value::from("Bea")));
        assert_eq!(entity.get("missing.deep.path"), None);
    }

    #[test]
    fn test_identifier_and_is_new() {
        let entity = user();
        assert!(entity.is_new());
        entity.set("_id", "abc").unwrap();
        assert_eq!(entity.id().as_deref(), Some("abc"));
        assert!(!entity.is_new());
        assert!(entity.cid().to_string().starts_with('c'));
    }

    #[test]
    fn test_change_events_order() {
        let entity = user();
        let log = record(&entity);

        let mut attrs = Attributes::new();
        attrs.insert("name".into(), Value::from("Bea"));
        attrs.insert("age".into(), Value::Int(3));
        entity.set_attrs(attrs, SetOptions::default()).unwrap();

        assert_eq!(*log.borrow(), vec!["change:age", "change:name", "change"]);
        assert!(!entity.has_changed(None));
        assert_eq!(entity.previous("name"), Some(Value::from("Bea")));
    }

    #[test]
    fn test_setting_same_value_is_quiet() {
        let entity = user();
        let log = record(&entity);
        entity.set("name", "Ann").unwrap();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_silent_changes_fire_on_next_cycle() {
        let entity = user();
        let log = record(&entity);

        entity.set_with("name", "Bea", SetOptions::silent()).unwrap();
        assert!(log.borrow().is_empty());
        assert!(entity.has_changed(Some("name")));

        entity.change();
        assert_eq!(*log.borrow(), vec!["change:name", "change"]);
    }

    #[test]
    fn test_reentrant_set_drains_to_fixpoint() {
        let entity = user();
        let log = record(&entity);

        let e = entity.clone();
        entity.on(
            "change:name",
            Rc::new(move |_: &Event| {
                e.set("upper", e.get("name").unwrap().to_display_string().to_uppercase())
                    .unwrap();
            }),
        );
        entity.set("name", "Bea").unwrap();

        assert_eq!(entity.get("upper"), Some(Value::from("BEA")));
        assert_eq!(*log.borrow(), vec!["change:name", "change:upper", "change"]);
        assert_eq!(entity.previous("upper"), Some(Value::from("BEA")));
    }

    #[test]
    fn test_changed_reflects_last_cycle_only() {
        let entity = user();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (e, s) = (entity.clone(), seen.clone());
        entity.on(
            "change",
            Rc::new(move |_: &Event| {
                s.borrow_mut()
                    .push((e.has_changed(Some("a")), e.has_changed(Some("b"))));
            }),
        );

        entity.set("a", 1).unwrap();
        entity.set("b", 2).unwrap();
        assert_eq!(*seen.borrow(), vec![(true, false), (false, true)]);
        assert!(!entity.has_changed(None));
        assert_eq!(entity.previous_attributes().get("b"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_validation_rejects_without_mutation() {
        let def = ModelDef::new("User", "/users").rule("name", RuleSpec::NotNull);
        let entity = Entity::new(
            kind(def),
            Attributes::from([("name".to_string(), Value::from("Ann"))]),
        )
        .unwrap();
        let log = record(&entity);

        let result = entity.set("name", "");
        assert!(matches!(result, Err(SetError::Invalid(ref e)) if e.get("name") == Some("notnull")));
        assert_eq!(entity.get("name"), Some(Value::from("Ann")));
        assert_eq!(*log.borrow(), vec!["error"]);
        assert!(entity.is_valid());
    }

    #[test]
    fn test_validation_error_callback() {
        let def = ModelDef::new("User", "/users").rule("name", RuleSpec::NotNull);
        let entity = Entity::new(kind(def), Attributes::new()).unwrap();
        let log = record(&entity);
        let called = Rc::new(Cell::new(false));
        let c = called.clone();

        let opts = SetOptions::default().with_error(Rc::new(move |_: &Entity, _: &ValidationErrors| {
            c.set(true)
        }));
        assert!(entity.set_with("age", 3, opts).is_err());
        assert!(called.get());
        assert!(log.borrow().is_empty());
        assert!(!entity.is_valid());
    }

    #[test]
    fn test_unset_and_clear() {
        let entity = user();
        entity.set("age", 3).unwrap();
        let log = record(&entity);
        entity.unset("age", SetOptions::default()).unwrap();
        assert!(!entity.has("age"));
        assert_eq!(entity.previous("age"), None);
        assert_eq!(*log.borrow(), vec!["change:age", "change"]);

        entity.clear(SetOptions::default()).unwrap();
        assert!(entity.attributes().is_empty());
    }

    #[test]
    fn test_nested_plain_path_set() {
        let entity = user();
        let log = record(&entity);
        entity.set("meta.color", "red").unwrap();
        assert_eq!(entity.get("meta.color"), Some(Value::from("red")));
        assert_eq!(*log.borrow(), vec!["change:meta.color", "change"]);
    }

    #[test]
    fn test_dotted_set_routes_into_nested_entity() {
        let author = user();
        let post = Entity::new(kind(ModelDef::new("Post", "/posts")), Attributes::new()).unwrap();
        post.set("author", author.clone()).unwrap();
        let author_log = record(&author);

        post.set("author.name", "Cy").unwrap();
        assert_eq!(author.get("name"), Some(Value::from("Cy")));
        assert_eq!(post.get("author.name"), Some(Value::from("Cy")));
        assert_eq!(*author_log.borrow(), vec!["change:name", "change"]);
    }

    #[test]
    fn test_rejected_routed_set_leaves_nested_entity_untouched() {
        let author = user();
        let def = ModelDef::new("Post", "/posts").rule("title", RuleSpec::NotNull);
        let post = Entity::new(
            kind(def),
            Attributes::from([
                ("title".to_string(), Value::from("Hello")),
                ("author".to_string(), Value::from(author.clone())),
            ]),
        )
        .unwrap();
        let author_log = record(&author);

        let attrs = Attributes::from([
            ("author.name".to_string(), Value::from("Cy")),
            ("title".to_string(), Value::Null),
        ]);
        assert!(matches!(
            post.set_attrs(attrs, SetOptions::default()),
            Err(SetError::Invalid(_))
        ));
        assert_eq!(author.get("name"), Some(Value::from("Ann")));
        assert_eq!(post.get("title"), Some(Value::from("Hello")));
        assert!(author_log.borrow().is_empty());
    }

    #[test]
    fn test_rejected_nested_part_blocks_local_changes() {
        let author_def = ModelDef::new("User", "/users").rule("name", RuleSpec::NotNull);
        let author = Entity::new(
            kind(author_def),
            Attributes::from([("name".to_string(), Value::from("Ann"))]),
        )
        .unwrap();
        let post = Entity::new(kind(ModelDef::new("Post", "/posts")), Attributes::new()).unwrap();
        post.set("author", author.clone()).unwrap();
        post.set("title", "Hello").unwrap();
        let post_log = record(&post);
        let author_log = record(&author);

        let attrs = Attributes::from([
            ("author.name".to_string(), Value::from("")),
            ("author.age".to_string(), Value::Int(4)),
            ("title".to_string(), Value::from("Changed")),
            ("draft".to_string(), Value::Bool(true)),
        ]);
        assert!(post.set_attrs(attrs, SetOptions::default()).is_err());

        assert_eq!(post.get("title"), Some(Value::from("Hello")));
        assert!(!post.has("draft"));
        assert_eq!(author.get("name"), Some(Value::from("Ann")));
        assert!(!author.has("age"));
        assert!(post_log.borrow().is_empty());
        assert_eq!(*author_log.borrow(), vec!["error"]);
    }

    #[test]
    fn test_collection_ownership() {
        let tags = Collection::new(Rc::new(CollectionDef::anonymous("Tag")));
        let a = user();
        let b = user();

        a.set("tags", tags.clone()).unwrap();
        assert_eq!(tags.parent(), Some(a.clone()));
        a.set("tags", tags.clone()).unwrap();

        let result = b.set("tags", tags.clone());
        assert!(matches!(result, Err(SetError::CollectionOwned { .. })));
        assert!(!b.has("tags"));
    }

    #[test]
    fn test_defaults_and_to_json() {
        let def = ModelDef::new("User", "/users")
            .default_value("role", json!("guest"))
            .default_value("-draft", json!(true));
        let entity = Entity::new(kind(def), Attributes::new()).unwrap();
        assert_eq!(entity.get("role"), Some(Value::from("guest")));
        assert!(!entity.has_changed(None));
        assert_eq!(entity.to_json(), json!({"role": "guest"}));
    }

    #[test]
    fn test_nested_entity_serialises_as_identifier() {
        let author = user();
        author.set("_id", "u1").unwrap();
        let post = Entity::new(kind(ModelDef::new("Post", "/posts")), Attributes::new()).unwrap();
        post.set("author", author).unwrap();
        assert_eq!(post.to_json(), json!({"author": "u1"}));
    }

    #[test]
    fn test_inc_and_escape() {
        let entity = user();
        entity.inc("count", 2.0, false).unwrap();
        entity.inc("count", -5.0, true).unwrap();
        assert_eq!(entity.get("count"), Some(Value::Int(0)));

        entity.set("name", "<b>").unwrap();
        assert_eq!(entity.escape("name"), "&lt;b&gt;");
    }

    #[test]
    fn test_changed_attributes_with_diff() {
        let entity = user();
        let diff = Attributes::from([
            ("name".to_string(), Value::from("Ann")),
            ("age".to_string(), Value::Int(4)),
        ]);
        let changed = entity.changed_attributes(Some(&diff)).unwrap();
        assert_eq!(changed.len(), 1);
        assert!(changed.contains_key("age"));
    }
}
