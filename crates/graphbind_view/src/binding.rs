//! Dependency-tracked bindings
//!
//! A [`DependencyBinding`] wraps a run function. Every build runs it with a
//! fresh [`ReadTracker`], drops the subscriptions of the previous build and
//! subscribes to exactly what was read: `change:<path>` on each entity and
//! membership events on each collection. Any of those events rebuilds the
//! binding, so the dependency set follows whatever the last run touched.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use graphbind_model::{Callback, Collection, Entity, Event, ListenerId, ReadTracker};
use tracing::{trace, warn};

use crate::error::BindingError;

/// Work performed by a binding on every run
pub type RunFn = Box<dyn Fn(&ReadTracker) -> Result<(), BindingError>>;

const MEMBERSHIP_EVENTS: [&str; 3] = ["add", "remove", "reset"];

enum Subscription {
    Entity(Entity, ListenerId),
    Collection(Collection, Vec<ListenerId>),
}

impl Subscription {
    fn release(self) {
        match self {
            Subscription::Entity(entity, id) => {
                entity.off(id);
            }
            Subscription::Collection(collection, ids) => {
                for id in ids {
                    collection.off(id);
                }
            }
        }
    }
}

struct BindingInner {
    run: RunFn,
    subscriptions: RefCell<Vec<Subscription>>,
    generation: Cell<u64>,
    runs: Cell<u64>,
    cleared: Cell<bool>,
}

/// Shared handle to a binding
#[derive(Clone)]
pub struct DependencyBinding(Rc<BindingInner>);

impl DependencyBinding {
    pub fn new(run: RunFn) -> Self {
        DependencyBinding(Rc::new(BindingInner {
            run,
            subscriptions: RefCell::new(Vec::new()),
            generation: Cell::new(0),
            runs: Cell::new(0),
            cleared: Cell::new(false),
        }))
    }

    /// Run and resubscribe to the reads of this run
    ///
    /// Builds may nest: a run can trigger a change that rebuilds this same
    /// binding. Only the innermost build subscribes.
    pub fn build(&self) -> Result<(), BindingError> {
        if self.0.cleared.get() {
            return Ok(());
        }
        self.unsubscribe();
        let generation = self.0.generation.get() + 1;
        self.0.generation.set(generation);

        let tracker = ReadTracker::new();
        let result = (self.0.run)(&tracker);
        self.0.runs.set(self.0.runs.get() + 1);

        if self.0.generation.get() != generation || self.0.cleared.get() {
            trace!("Superseded binding run, not subscribing");
            return result;
        }
        self.subscribe(&tracker);
        result
    }

    fn subscribe(&self, tracker: &ReadTracker) {
        let callback = self.rebuild_callback();
        let mut subscriptions = Vec::new();
        for (entity, path) in tracker.take_reads() {
            let id = entity.on(&format!("change:{path}"), callback.clone());
            subscriptions.push(Subscription::Entity(entity, id));
        }
        for collection in tracker.take_collections() {
            let ids = MEMBERSHIP_EVENTS
                .iter()
                .map(|name| collection.on(name, callback.clone()))
                .collect();
            subscriptions.push(Subscription::Collection(collection, ids));
        }
        trace!(dependencies = subscriptions.len(), "Binding subscribed");
        *self.0.subscriptions.borrow_mut() = subscriptions;
    }

    fn rebuild_callback(&self) -> Callback {
        let weak: Weak<BindingInner> = Rc::downgrade(&self.0);
        Rc::new(move |event: &Event| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            trace!(event = %event.name, "Dependency changed, rebuilding binding");
            if let Err(error) = DependencyBinding(inner).build() {
                warn!(%error, "Binding rerun failed");
            }
        })
    }

    fn unsubscribe(&self) {
        let subscriptions = std::mem::take(&mut *self.0.subscriptions.borrow_mut());
        for subscription in subscriptions {
            subscription.release();
        }
    }

    /// Drop every subscription. Later events and builds are ignored
    pub fn clear(&self) {
        self.0.cleared.set(true);
        self.unsubscribe();
    }

    pub fn is_cleared(&self) -> bool {
        self.0.cleared.get()
    }

    /// Number of completed runs
    pub fn run_count(&self) -> u64 {
        self.0.runs.get()
    }

    /// Number of entity paths and collections currently subscribed
    pub fn dependency_count(&self) -> usize {
        self.0.subscriptions.borrow().len()
    }
}

impl std::fmt::Debug for DependencyBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyBinding")
            .field("runs", &self.run_count())
            .field("dependencies", &self.dependency_count())
            .field("cleared", &self.is_cleared())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphbind_model::{AddOptions, Quiet, Store, Value};
    use graphbind_schema::{AttrType, CollectionDef, ModelDef, SchemaRegistry};
    use serde_json::json;

    fn store() -> Store {
        let mut schemas = SchemaRegistry::new("");
        schemas
            .register_model(ModelDef::new("User", "/users").attr("friend", AttrType::model("User")))
            .unwrap();
        schemas
            .register_collection(CollectionDef::new("Users", "User", "/users"))
            .unwrap();
        Store::new(schemas)
    }

    fn reading(entity: &Entity, paths: Rc<RefCell<Vec<&'static str>>>, out: Rc<RefCell<Vec<Value>>>) -> RunFn {
        let entity = entity.clone();
        Box::new(move |tracker: &ReadTracker| {
            let values = paths
                .borrow()
                .iter()
                .map(|p| entity.get_tracked(p, tracker).unwrap_or_default())
                .collect::<Vec<_>>();
            out.borrow_mut().extend(values);
            Ok(())
        })
    }

    #[test]
    fn test_reruns_once_per_change_and_keeps_one_listener() {
        let store = store();
        let user = store.hydrate("User", json!({"name": "Ann"})).unwrap();
        let out = Rc::new(RefCell::new(Vec::new()));
        let binding = DependencyBinding::new(reading(&user, Rc::new(RefCell::new(vec!["name"])), out.clone()));

        binding.build().unwrap();
        assert_eq!(*out.borrow(), vec![Value::from("Ann")]);

        for name in ["Bea", "Cy", "Di"] {
            user.set("name", name).unwrap();
            assert_eq!(user.listener_count(Some("change:name")), 1);
        }
        assert_eq!(binding.run_count(), 4);
        assert_eq!(out.borrow().last(), Some(&Value::from("Di")));

        user.set("age", 3).unwrap();
        assert_eq!(binding.run_count(), 4);
    }

    #[test]
    fn test_dependencies_follow_last_run() {
        let store = store();
        let user = store.hydrate("User", json!({"name": "Ann", "age": 1})).unwrap();
        let paths = Rc::new(RefCell::new(vec!["name"]));
        let out = Rc::new(RefCell::new(Vec::new()));
        let binding = DependencyBinding::new(reading(&user, paths.clone(), out));
        binding.build().unwrap();

        *paths.borrow_mut() = vec!["age"];
        user.set("name", "Bea").unwrap();
        assert_eq!(user.listener_count(Some("change:name")), 0);
        assert_eq!(user.listener_count(Some("change:age")), 1);

        user.set("name", "Cy").unwrap();
        assert_eq!(binding.run_count(), 2);
        user.set("age", 2).unwrap();
        assert_eq!(binding.run_count(), 3);
    }

    #[test]
    fn test_nested_path_follows_replacement() {
        let store = store();
        let user = store
            .hydrate("User", json!({"friend": {"_id": "f1", "name": "Ann"}}))
            .unwrap();
        let out = Rc::new(RefCell::new(Vec::new()));
        let binding = DependencyBinding::new(reading(&user, Rc::new(RefCell::new(vec!["friend.name"])), out.clone()));
        binding.build().unwrap();

        let other = store.hydrate("User", json!({"_id": "f2", "name": "Bea"})).unwrap();
        user.set("friend", other.clone()).unwrap();
        assert_eq!(out.borrow().last(), Some(&Value::from("Bea")));
        let runs = binding.run_count();

        store.hydrate("User", json!({"_id": "f1", "name": "Old"})).unwrap();
        assert_eq!(binding.run_count(), runs);

        other.set("name", "Cy").unwrap();
        assert_eq!(binding.run_count(), runs + 1);
        assert_eq!(out.borrow().last(), Some(&Value::from("Cy")));
    }

    #[test]
    fn test_collection_membership_reruns() {
        let store = store();
        let users = store.create_collection("Users").unwrap();
        let counts = Rc::new(RefCell::new(Vec::new()));
        let seen = counts.clone();
        let watched = users.clone();
        let binding = DependencyBinding::new(Box::new(move |tracker: &ReadTracker| {
            tracker.record_collection(&watched);
            seen.borrow_mut().push(watched.len());
            Ok(())
        }));
        binding.build().unwrap();

        let ann = store.hydrate("User", json!({"name": "Ann"})).unwrap();
        users.add(vec![ann.clone()], AddOptions::default()).unwrap();
        users.remove(&[ann], Quiet::default());
        users.reset(Vec::new(), Quiet::default()).unwrap();
        assert_eq!(*counts.borrow(), vec![0, 1, 0, 0]);
        assert_eq!(users.listener_count(Some("add")), 1);
    }

    #[test]
    fn test_clear_stops_reruns() {
        let store = store();
        let user = store.hydrate("User", json!({"name": "Ann"})).unwrap();
        let binding = DependencyBinding::new(reading(
            &user,
            Rc::new(RefCell::new(vec!["name"])),
            Rc::new(RefCell::new(Vec::new())),
        ));
        binding.build().unwrap();
        binding.clear();
        user.set("name", "Bea").unwrap();
        assert_eq!(binding.run_count(), 1);
        assert_eq!(user.listener_count(None), 0);
        binding.build().unwrap();
        assert_eq!(binding.run_count(), 1);
    }

    #[test]
    fn test_run_error_is_returned_from_build() {
        let binding = DependencyBinding::new(Box::new(|_: &ReadTracker| Err(BindingError::ViewRemoved)));
        assert_eq!(binding.build(), Err(BindingError::ViewRemoved));
    }
}
