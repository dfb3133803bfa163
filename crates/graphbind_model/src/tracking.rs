//! Read tracking
//!
//! A [`ReadTracker`] is passed explicitly into tracked accessors
//! ([`Entity::get_tracked`]) and records every `(entity, path)` pair and
//! every collection read while it is in use. Bindings subscribe to exactly
//! what was recorded.

use std::cell::RefCell;
use std::collections::HashSet;

use crate::{Cid, Collection, Entity};

/// Records the dependencies of one evaluation run
#[derive(Debug, Default)]
pub struct ReadTracker {
    reads: RefCell<Vec<(Entity, String)>>,
    collections: RefCell<Vec<Collection>>,
    seen: RefCell<HashSet<(Cid, String)>>,
}

impl ReadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attribute read. Repeated reads are recorded once
    pub fn record(&self, entity: &Entity, path: &str) {
        if self.seen.borrow_mut().insert((entity.cid(), path.to_string())) {
            self.reads.borrow_mut().push((entity.clone(), path.to_string()));
        }
    }

    /// Record a read of collection membership (length, members)
    pub fn record_collection(&self, collection: &Collection) {
        if self
            .seen
            .borrow_mut()
            .insert((collection.cid(), String::new()))
        {
            self.collections.borrow_mut().push(collection.clone());
        }
    }

    /// Number of distinct reads recorded
    pub fn len(&self) -> usize {
        self.reads.borrow().len() + self.collections.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the recorded attribute reads
    pub fn take_reads(&self) -> Vec<(Entity, String)> {
        std::mem::take(&mut *self.reads.borrow_mut())
    }

    /// Take the recorded collection reads
    pub fn take_collections(&self) -> Vec<Collection> {
        std::mem::take(&mut *self.collections.borrow_mut())
    }
}
