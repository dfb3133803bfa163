//! Binding scope
//!
//! Named values a view's bindings resolve against. Accessors name a scope
//! (`~user:name`), falling back to [`DEFAULT_SCOPE`].

use std::collections::BTreeMap;

use graphbind_model::{ReadTracker, Value};

/// Scope used by accessors and expressions that do not name one
pub const DEFAULT_SCOPE: &str = "model";

#[derive(Debug, Clone, Default)]
pub struct Scope {
    values: BTreeMap<String, Value>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: bind a name
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Resolve `path` inside the scope value `name`, recording entity reads
    ///
    /// A missing scope or a missing hop yields `Null`.
    pub fn resolve(&self, name: &str, path: Option<&str>, tracker: &ReadTracker) -> Value {
        let Some(root) = self.get(name) else {
            return Value::Null;
        };
        match path {
            Some(path) if !path.is_empty() => {
                let segments: Vec<&str> = path.split('.').collect();
                resolve_tracked(root.clone(), &segments, tracker)
            }
            _ => root.clone(),
        }
    }
}

/// Walk `segments` from `root`
///
/// Once an entity is reached the remaining path is read through
/// [`Entity::get_tracked`](graphbind_model::Entity::get_tracked), so nested
/// hops are subscribed as one dotted path.
pub(crate) fn resolve_tracked(root: Value, segments: &[&str], tracker: &ReadTracker) -> Value {
    let mut current = root;
    for (i, name) in segments.iter().enumerate() {
        match &current {
            Value::Entity(entity) => {
                return entity
                    .get_tracked(&segments[i..].join("."), tracker)
                    .unwrap_or_default();
            }
            Value::Collection(collection) => tracker.record_collection(collection),
            _ => {}
        }
        current = match current.member(name) {
            Some(value) => value,
            None => return Value::Null,
        };
    }
    current
}
