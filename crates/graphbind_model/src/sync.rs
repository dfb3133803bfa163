//! Network operations on entities and collections
//!
//! Each operation issues one request through the owning [`Store`] and
//! returns the [`Deferred`] handle. Successful responses are applied back
//! with a regular `set`, so they announce themselves through the usual
//! change events.

use tracing::{debug, warn};

use crate::transport::{Operation, SyncResult, Target};
use crate::{
    AddOptions, Attributes, Collection, Deferred, Entity, Event, EventData, Quiet, SetError,
    SetOptions, Store, SyncError, set_nested,
};

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Request overrides shared by every operation
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Absolute endpoint replacing the resolved one
    pub endpoint: Option<String>,
    /// Query parameters passed to the transport
    pub query: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Keep the current attributes until the server acknowledges
    pub wait: bool,
    pub sync: SyncOptions,
}

#[derive(Debug, Clone, Default)]
pub struct DestroyOptions {
    /// Fire `destroy` only after the server acknowledges
    pub wait: bool,
    pub sync: SyncOptions,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Add the fetched members instead of replacing every member
    pub add: bool,
    pub sync: SyncOptions,
}

// ─────────────────────────────────────────────────────────────────────────────
// Entity
// ─────────────────────────────────────────────────────────────────────────────

impl Entity {
    fn sync_store(&self) -> Result<Store, SyncError> {
        self.kind()
            .store()
            .ok_or_else(|| SyncError::Detached(self.type_name().to_string()))
    }

    fn send(&self, operation: Operation, opts: SyncOptions) -> Result<Deferred<SyncResult>, SyncError> {
        let deferred = self.sync_store()?.sync(
            operation,
            &Target::Entity(self.clone()),
            opts.endpoint.as_deref(),
            opts.query,
        )?;
        Ok(deferred)
    }

    /// Attributes a response carries for this entity
    fn server_attributes(&self, result: &SyncResult) -> Attributes {
        match result {
            SyncResult::Attributes(attrs) => attrs.clone(),
            // Already merged when the registry resolved the response to us
            SyncResult::Entities(list) => list
                .first()
                .filter(|entity| *entity != self)
                .map(Entity::attributes)
                .unwrap_or_default(),
            SyncResult::Empty => Attributes::new(),
        }
    }

    fn apply_server(&self, attrs: Attributes) {
        if attrs.is_empty() {
            return;
        }
        if let Err(e) = self.set_attrs(attrs, SetOptions::default()) {
            warn!(entity = ?self, error = %e, "Server attributes rejected");
        }
    }

    fn trigger_sync(&self) {
        self.trigger(&Event::new("sync", EventData::Sync(Target::Entity(self.clone()))));
    }

    fn trigger_destroy(&self) {
        self.trigger(&Event::new(
            "destroy",
            EventData::Destroy {
                entity: self.clone(),
                collection: self.collection(),
            },
        ));
    }

    /// Read the entity from the server and apply the response
    pub fn fetch(&self, opts: SyncOptions) -> Result<Deferred<SyncResult>, SyncError> {
        let deferred = self.send(Operation::Read, opts)?;
        let weak = self.downgrade();
        deferred.success(move |result| {
            if let Some(entity) = weak.upgrade() {
                entity.apply_server(entity.server_attributes(result));
                entity.trigger_sync();
            }
        });
        Ok(deferred)
    }

    /// Apply `attrs` and send the entity, creating it when new
    ///
    /// With `wait` the attributes are validated up front and only become
    /// visible once the server acknowledges; the server's attributes are
    /// merged over them.
    pub fn save(&self, attrs: Attributes, opts: SaveOptions) -> Result<Deferred<SyncResult>, SyncError> {
        let store = self.sync_store()?;
        let restore = if opts.wait {
            let mut candidate = self.attributes();
            for (key, value) in &attrs {
                set_nested(&mut candidate, key, value.clone());
            }
            if self.kind().has_validation() {
                self.check_candidate(&candidate, None)
                    .map_err(SyncError::Invalid)?;
            }
            let previous = self.attributes();
            self.set_attrs(attrs.clone(), SetOptions::silent())?;
            Some(previous)
        } else {
            self.set_attrs(attrs.clone(), SetOptions::default())
                .map_err(|e| match e {
                    SetError::Invalid(errors) => SyncError::Invalid(errors),
                    other => other.into(),
                })?;
            None
        };

        let operation = if self.is_new() {
            Operation::Create
        } else {
            Operation::Update
        };
        let sent = store.sync(
            operation,
            &Target::Entity(self.clone()),
            opts.sync.endpoint.as_deref(),
            opts.sync.query,
        );
        if let Some(previous) = restore {
            self.restore_silently(previous);
        }
        let deferred = sent?;

        let weak = self.downgrade();
        let wait = opts.wait;
        deferred.success(move |result| {
            let Some(entity) = weak.upgrade() else {
                return;
            };
            let mut merged = if wait { attrs } else { Attributes::new() };
            merged.extend(entity.server_attributes(result));
            entity.apply_server(merged);
            entity.trigger_sync();
        });
        Ok(deferred)
    }

    fn restore_silently(&self, previous: Attributes) {
        let added: Vec<String> = self
            .attributes()
            .into_keys()
            .filter(|key| !previous.contains_key(key))
            .collect();
        for key in added {
            if let Err(e) = self.unset(&key, SetOptions::silent()) {
                warn!(entity = ?self, key = %key, error = %e, "Failed to drop pending attribute");
            }
        }
        if let Err(e) = self.set_attrs(previous, SetOptions::silent()) {
            warn!(entity = ?self, error = %e, "Failed to restore attributes");
        }
    }

    /// Delete the entity
    ///
    /// A new entity is destroyed locally without a request. Otherwise
    /// `destroy` fires right away, or once the server acknowledges with
    /// `wait` (a `waiting` event fires meanwhile).
    pub fn destroy(&self, opts: DestroyOptions) -> Result<Deferred<SyncResult>, SyncError> {
        if self.is_new() {
            debug!(entity = ?self, "Destroying unsaved entity locally");
            self.trigger_destroy();
            let deferred = Deferred::new();
            deferred.settle(Ok(SyncResult::Empty));
            return Ok(deferred);
        }

        let deferred = self.send(Operation::Delete, opts.sync)?;
        let weak = self.downgrade();
        let wait = opts.wait;
        deferred.success(move |_| {
            if let Some(entity) = weak.upgrade() {
                if wait {
                    entity.trigger_destroy();
                }
                entity.trigger_sync();
            }
        });

        if wait {
            self.trigger(&Event::new(
                "waiting",
                EventData::Waiting {
                    entity: self.clone(),
                },
            ));
        } else {
            self.trigger_destroy();
        }
        Ok(deferred)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Collection
// ─────────────────────────────────────────────────────────────────────────────

impl Collection {
    fn sync_store(&self) -> Result<Store, SyncError> {
        self.store()
            .ok_or_else(|| SyncError::Detached(self.name().to_string()))
    }

    /// Load members from the server
    ///
    /// A fetch still in flight is aborted first: only the latest response
    /// is applied. Members are replaced unless `opts.add` is set.
    pub fn fetch(&self, opts: FetchOptions) -> Result<Deferred<SyncResult>, SyncError> {
        let store = self.sync_store()?;
        if let Some(previous) = self.replace_in_flight(None) {
            if previous.abort() {
                debug!(collection = %self.name(), "Aborted in-flight fetch");
            }
        }

        let deferred = store.sync(
            Operation::Read,
            &Target::Collection(self.clone()),
            opts.sync.endpoint.as_deref(),
            opts.sync.query,
        )?;
        self.replace_in_flight(Some(deferred.clone()));

        let weak = self.downgrade();
        let add = opts.add;
        deferred.success(move |result| {
            let Some(collection) = weak.upgrade() else {
                return;
            };
            let members = match result {
                SyncResult::Entities(list) => list.clone(),
                SyncResult::Empty => Vec::new(),
                SyncResult::Attributes(_) => {
                    warn!(collection = %collection.name(), "Fetch returned attributes, ignoring");
                    return;
                }
            };
            let applied = if add {
                collection.add(members, AddOptions::default())
            } else {
                collection.reset(members, Quiet::default())
            };
            if let Err(e) = applied {
                warn!(collection = %collection.name(), error = %e, "Fetched members rejected");
            }
            collection.trigger(&Event::new(
                "sync",
                EventData::Sync(Target::Collection(collection.clone())),
            ));
        });

        let weak = self.downgrade();
        deferred.complete(move || {
            if let Some(collection) = weak.upgrade() {
                collection.clear_settled_in_flight();
            }
        });
        Ok(deferred)
    }

    /// Hydrate a raw entity, add it and save it
    ///
    /// With `wait` the entity joins the collection only once the server
    /// acknowledges.
    pub fn create(
        &self,
        raw: serde_json::Value,
        opts: SaveOptions,
    ) -> Result<(Entity, Deferred<SyncResult>), SyncError> {
        let store = self.sync_store()?;
        let entity = store.hydrate(self.model_type(), raw)?;
        if entity.collection().is_none() {
            entity.set_collection(Some(self));
        }

        let wait = opts.wait;
        if !wait {
            self.add(vec![entity.clone()], AddOptions::default())?;
        }
        let deferred = entity.save(Attributes::new(), opts)?;
        if wait {
            let weak = self.downgrade();
            let member = entity.clone();
            deferred.success(move |_| {
                if let Some(collection) = weak.upgrade() {
                    if let Err(e) = collection.add(vec![member], AddOptions::default()) {
                        warn!(collection = %collection.name(), error = %e, "Created entity rejected");
                    }
                }
            });
        }
        Ok((entity, deferred))
    }
}
