//! Nested change tracking
//!
//! A subscription to `change:a.b.c` on an entity is served by one ChangeMap.
//! The map walks the path and places one listener per hop:
//!
//!   root --change:a--> A --change:b--> B --change:c--> callback
//!
//! Hops whose value is an entity are marked for rebuild: when `a` or `b` is
//! replaced the whole chain is torn down and walked again, so listeners on
//! the old entities disappear. A hop that cannot be resolved yet is bound at
//! the last resolvable point and also rebuilds once data arrives. When the
//! path reaches or passes through a collection, its add/remove/reset events
//! are delivered too.
//!
//! Hop listeners hold a weak reference to the map; the root entity owns it.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::trace;

use crate::{
    Callback, Collection, Entity, Event, EventData, ListenerId, Value, WeakCollection, WeakEntity,
};

enum HopTarget {
    Entity(WeakEntity),
    Collection(WeakCollection),
}

struct Hop {
    target: HopTarget,
    listeners: Vec<ListenerId>,
}

pub(crate) struct ChangeMap {
    id: ListenerId,
    root: WeakEntity,
    path: String,
    callback: Callback,
    hops: RefCell<BTreeMap<String, Hop>>,
    detached: Cell<bool>,
}

impl ChangeMap {
    pub(crate) fn new(id: ListenerId, root: &Entity, path: &str, callback: Callback) -> Rc<Self> {
        Rc::new(Self {
            id,
            root: root.downgrade(),
            path: path.to_string(),
            callback,
            hops: RefCell::new(BTreeMap::new()),
            detached: Cell::new(false),
        })
    }

    pub(crate) fn id(&self) -> ListenerId {
        self.id
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn callback(&self) -> &Callback {
        &self.callback
    }

    /// Tear down and walk the path again
    pub(crate) fn build(self: &Rc<Self>) {
        self.clear();
        if self.detached.get() {
            return;
        }
        let Some(root) = self.root.upgrade() else {
            return;
        };

        let mut names: Vec<&str> = self.path.split('.').collect();
        names.reverse();

        let mut model = root.clone();
        let mut value = Some(Value::Entity(root));
        let mut current: Option<String> = None;

        while let Some(v) = value.as_ref().filter(|v| !v.is_null()) {
            let Some(name) = names.pop() else {
                break;
            };
            if let Value::Collection(collection) = v {
                self.bind_collection(collection);
            }
            let next = v.member(name);
            current = Some(match current.take() {
                Some(prefix) => format!("{prefix}.{name}"),
                None => name.to_string(),
            });

            if let Some(Value::Entity(entity)) = &next {
                if !names.is_empty() {
                    let hop = current.take().unwrap_or_default();
                    self.bind(&model, &hop, &remaining(&names), true);
                    model = entity.clone();
                }
            }
            value = next;
        }

        let Some(hop) = current else {
            return;
        };
        let rest = remaining(&names);
        let is_collection = matches!(value, Some(Value::Collection(_)));
        self.bind(&model, &hop, &rest, !rest.is_empty() || is_collection);

        // A plain object hop can also be replaced as a whole
        if let Some((head, tail)) = hop.split_once('.') {
            let tail = if rest.is_empty() {
                tail.to_string()
            } else {
                format!("{tail}.{rest}")
            };
            self.bind(&model, head, &tail, false);
        }

        if let Some(Value::Collection(collection)) = value {
            self.bind_collection(&collection);
        }
    }

    fn bind(self: &Rc<Self>, model: &Entity, hop: &str, value_path: &str, rebuild: bool) {
        let key = format!("{}@{}@{}", model.cid(), hop, value_path);
        if self.hops.borrow().contains_key(&key) {
            return;
        }

        let weak = Rc::downgrade(self);
        let value_path = value_path.to_string();
        let listener = model.hub().on(
            &format!("change:{hop}"),
            Rc::new(move |event: &Event| {
                let Some(map) = weak.upgrade() else {
                    return;
                };
                let value = if value_path.is_empty() {
                    event.value().cloned()
                } else {
                    event.value().and_then(|v| v.resolve(&value_path))
                };
                map.deliver(value);
                if rebuild {
                    map.build();
                }
            }),
        );

        trace!(key = %key, rebuild, "Bound change hop");
        self.hops.borrow_mut().insert(
            key,
            Hop {
                target: HopTarget::Entity(model.downgrade()),
                listeners: vec![listener],
            },
        );
    }

    fn bind_collection(self: &Rc<Self>, collection: &Collection) {
        let key = format!("{}@collection", collection.cid());
        if self.hops.borrow().contains_key(&key) {
            return;
        }

        let listeners = ["add", "remove", "reset"]
            .into_iter()
            .map(|name| {
                let weak = Rc::downgrade(self);
                collection.hub().on(
                    name,
                    Rc::new(move |event: &Event| {
                        if let Some(map) = weak.upgrade() {
                            if !map.detached.get() {
                                (map.callback)(event);
                            }
                        }
                    }),
                )
            })
            .collect();

        self.hops.borrow_mut().insert(
            key,
            Hop {
                target: HopTarget::Collection(collection.downgrade()),
                listeners,
            },
        );
    }

    fn deliver(&self, value: Option<Value>) {
        if self.detached.get() {
            return;
        }
        let Some(root) = self.root.upgrade() else {
            return;
        };
        (self.callback)(&Event::new(
            format!("change:{}", self.path),
            EventData::Change {
                entity: root,
                value,
            },
        ));
    }

    /// Remove every hop listener
    pub(crate) fn clear(&self) {
        let hops = std::mem::take(&mut *self.hops.borrow_mut());
        for hop in hops.into_values() {
            match hop.target {
                HopTarget::Entity(weak) => {
                    if let Some(entity) = weak.upgrade() {
                        for id in hop.listeners {
                            entity.hub().off(id);
                        }
                    }
                }
                HopTarget::Collection(weak) => {
                    if let Some(collection) = weak.upgrade() {
                        for id in hop.listeners {
                            collection.hub().off(id);
                        }
                    }
                }
            }
        }
    }

    /// Clear for good. Later rebuild requests are ignored
    pub(crate) fn detach(&self) {
        self.detached.set(true);
        self.clear();
    }
}

fn remaining(reversed: &[&str]) -> String {
    reversed.iter().rev().copied().collect::<Vec<_>>().join(".")
}
