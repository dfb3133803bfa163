//! Store
//!
//! The [`Store`] ties a [`SchemaRegistry`] to live data: it owns the entity
//! registry, the runtime entity types and the transport. Everything that
//! turns raw server JSON into entities goes through it, so the registry is
//! an explicit dependency rather than ambient state.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};

use graphbind_schema::{ConfigError, SchemaRegistry};
use tracing::{debug, trace, warn};

use crate::transport::{Operation, Responder, SyncRequest, SyncResponse, SyncResult, Target, Transport};
use crate::{
    Attributes, Collection, Deferred, Entity, EntityRegistry, EntityType, OfflineTransport, Quiet,
    SetError, SetOptions, StoreError, TransportError, Validator, Value,
};

struct StoreInner {
    schemas: Rc<SchemaRegistry>,
    registry: EntityRegistry,
    types: RefCell<HashMap<String, Rc<EntityType>>>,
    transport: Rc<dyn Transport>,
}

/// Shared handle to a store
#[derive(Clone)]
pub struct Store(Rc<StoreInner>);

/// Non-owning handle to a store
#[derive(Clone)]
pub struct WeakStore(Weak<StoreInner>);

impl WeakStore {
    pub fn upgrade(&self) -> Option<Store> {
        self.0.upgrade().map(Store)
    }
}

impl PartialEq for Store {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("base_path", &self.0.schemas.base_path())
            .field("registry", &self.0.registry)
            .finish()
    }
}

impl Store {
    /// Store without a transport. Every request fails with `Offline`
    pub fn new(schemas: SchemaRegistry) -> Self {
        Self::with_transport(schemas, Rc::new(OfflineTransport))
    }

    pub fn with_transport(schemas: SchemaRegistry, transport: Rc<dyn Transport>) -> Self {
        Store(Rc::new(StoreInner {
            schemas: Rc::new(schemas),
            registry: EntityRegistry::new(),
            types: RefCell::new(HashMap::new()),
            transport,
        }))
    }

    pub fn downgrade(&self) -> WeakStore {
        WeakStore(Rc::downgrade(&self.0))
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.0.schemas
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.0.registry
    }

    // ─────────────────────────────────────────────────────────────────────
    // Types
    // ─────────────────────────────────────────────────────────────────────

    /// Runtime type for a model, created on first use
    pub fn entity_type(&self, model: &str) -> Result<Rc<EntityType>, ConfigError> {
        if let Some(kind) = self.0.types.borrow().get(model) {
            return Ok(kind.clone());
        }
        let def = self.0.schemas.model(model)?;
        let kind = Rc::new(EntityType::attached(def, self.downgrade()));
        self.0
            .types
            .borrow_mut()
            .insert(model.to_string(), kind.clone());
        Ok(kind)
    }

    /// Register a custom validator for a model
    pub fn add_validator(&self, model: &str, validator: Validator) -> Result<(), ConfigError> {
        self.entity_type(model)?.add_validator(validator);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Entities and Collections
    // ─────────────────────────────────────────────────────────────────────

    /// Create an entity from typed attributes
    ///
    /// When a live entity with the same type and identifier exists, the
    /// attributes are merged into it and it is returned instead.
    pub fn create_entity(&self, model: &str, attrs: Attributes) -> Result<Entity, StoreError> {
        let kind = self.entity_type(model)?;
        let id = attrs
            .get(kind.def().id_attribute.as_str())
            .and_then(Value::as_identifier);

        if let Some(existing) = id.as_deref().and_then(|id| self.0.registry.fetch(model, id)) {
            trace!(model, id = ?id, "Merging into existing entity");
            match existing.set_attrs(attrs, SetOptions::default()) {
                Ok(()) => {}
                Err(SetError::Invalid(errors)) => {
                    warn!(model, id = ?id, %errors, "Merged attributes failed validation");
                }
                Err(e) => return Err(e.into()),
            }
            return Ok(existing);
        }

        let entity = Entity::new(kind, attrs)?;
        self.0.registry.add(&entity);
        Ok(entity)
    }

    /// Create an entity from raw JSON
    ///
    /// Objects are coerced through the model's schema. Strings and numbers
    /// are identifiers: the live entity is returned, or a stub holding only
    /// the identifier.
    pub fn hydrate(&self, model: &str, raw: serde_json::Value) -> Result<Entity, StoreError> {
        let actual = json_kind(&raw);
        self.reference(model, raw)?
            .ok_or_else(|| StoreError::NotAnObject {
                model: model.to_string(),
                actual: actual.to_string(),
            })
    }

    /// Entity for a raw reference, or `None` when the value cannot name one
    pub(crate) fn reference(
        &self,
        model: &str,
        raw: serde_json::Value,
    ) -> Result<Option<Entity>, StoreError> {
        let attrs = match raw {
            serde_json::Value::Object(map) => self.coerce(model, map)?,
            serde_json::Value::String(_) | serde_json::Value::Number(_) => {
                let def = self.0.schemas.model(model)?;
                let mut attrs = Attributes::new();
                attrs.insert(def.id_attribute.clone(), Value::from(raw));
                attrs
            }
            _ => return Ok(None),
        };
        self.create_entity(model, attrs).map(Some)
    }

    /// Empty collection bound to this store
    pub fn create_collection(&self, name: &str) -> Result<Collection, ConfigError> {
        let def = self.0.schemas.collection(name)?;
        self.0.schemas.model(&def.model)?;
        Ok(Collection::attached(def, self.downgrade()))
    }

    /// Collection holding raw members
    pub fn hydrate_collection(
        &self,
        name: &str,
        raw: Vec<serde_json::Value>,
    ) -> Result<Collection, StoreError> {
        let collection = self.create_collection(name)?;
        let mut members = Vec::with_capacity(raw.len());
        for item in raw {
            match self.reference(collection.model_type(), item)? {
                Some(entity) => members.push(entity),
                None => debug!(collection = name, "Dropping unusable collection member"),
            }
        }
        collection.reset(members, Quiet { silent: true })?;
        Ok(collection)
    }

    /// Merge every raw `models` entry into the registry
    pub fn merge_models(
        &self,
        models: BTreeMap<String, Vec<serde_json::Value>>,
    ) -> Result<BTreeMap<String, Vec<Entity>>, StoreError> {
        let mut merged = BTreeMap::new();
        for (model, raws) in models {
            let mut entities = Vec::with_capacity(raws.len());
            for raw in raws {
                entities.push(self.hydrate(&model, raw)?);
            }
            debug!(model = %model, count = entities.len(), "Merged models");
            merged.insert(model, entities);
        }
        Ok(merged)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Endpoints
    // ─────────────────────────────────────────────────────────────────────

    /// Endpoint of an entity, relative to the base path
    ///
    /// Embedded entities live under their collection's endpoint.
    pub fn entity_endpoint(&self, entity: &Entity) -> Result<String, ConfigError> {
        let def = entity.def();
        let root = if def.embedded {
            let collection = entity
                .collection()
                .ok_or_else(|| ConfigError::MissingCollection(def.name.clone()))?;
            self.collection_endpoint(&collection)?
        } else {
            def.endpoint
                .clone()
                .ok_or_else(|| ConfigError::MissingEndpoint(def.name.clone()))?
        };
        Ok(match entity.id() {
            Some(id) => format!("{}/{}", root.trim_end_matches('/'), id),
            None => root,
        })
    }

    /// Endpoint of a collection, relative to the base path
    ///
    /// Embedded collections append their suffix to the parent's endpoint.
    /// Collections without an endpoint use their model's.
    pub fn collection_endpoint(&self, collection: &Collection) -> Result<String, ConfigError> {
        let def = collection.def();
        if def.embedded {
            let parent = collection
                .parent()
                .ok_or_else(|| ConfigError::MissingParent(def.name.clone()))?;
            let root = self.entity_endpoint(&parent)?;
            return Ok(format!("{}{}", root, def.endpoint.as_deref().unwrap_or_default()));
        }
        if let Some(endpoint) = &def.endpoint {
            return Ok(endpoint.clone());
        }
        self.0
            .schemas
            .model(&def.model)?
            .endpoint
            .clone()
            .ok_or_else(|| ConfigError::MissingEndpoint(def.name.clone()))
    }

    /// Absolute endpoint of a target
    pub fn url(&self, target: &Target) -> Result<String, ConfigError> {
        let relative = match target {
            Target::Entity(entity) => self.entity_endpoint(entity)?,
            Target::Collection(collection) => self.collection_endpoint(collection)?,
        };
        Ok(format!("{}{}", self.0.schemas.base_path(), relative))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sync
    // ─────────────────────────────────────────────────────────────────────

    /// Send one operation for a target
    ///
    /// Entities are sent as their JSON for create and update. Collections
    /// can only be read.
    pub fn sync(
        &self,
        operation: Operation,
        target: &Target,
        endpoint: Option<&str>,
        query: Option<serde_json::Value>,
    ) -> Result<Deferred<SyncResult>, ConfigError> {
        let (model, body) = match target {
            Target::Entity(entity) => {
                let body = matches!(operation, Operation::Create | Operation::Update)
                    .then(|| entity.to_json());
                (entity.type_name().to_string(), body)
            }
            Target::Collection(collection) => {
                if operation != Operation::Read {
                    return Err(ConfigError::CollectionWrite(operation.to_string()));
                }
                (collection.model_type().to_string(), None)
            }
        };
        let endpoint = match endpoint {
            Some(endpoint) => endpoint.to_string(),
            None => self.url(target)?,
        };

        let request = SyncRequest {
            operation,
            endpoint,
            body,
            query,
        };
        debug!(%operation, endpoint = %request.endpoint, "Sync request");

        let deferred = Deferred::new();
        let store = self.downgrade();
        let responder = Responder::new(
            deferred.clone(),
            Box::new(move |body| {
                if operation == Operation::Delete {
                    return Ok(SyncResult::Empty);
                }
                let store = store
                    .upgrade()
                    .ok_or_else(|| TransportError::InvalidResponse("store dropped".into()))?;
                store.parse_response(body, &model)
            }),
        );
        self.0.transport.send(request, responder);
        Ok(deferred)
    }

    /// Interpret a response envelope for a target of type `model`
    ///
    /// `models` are merged first, whatever the shape of `result`. A missing
    /// or null `result` is an error; delete responses never get here.
    pub fn parse_response(
        &self,
        body: serde_json::Value,
        model: &str,
    ) -> Result<SyncResult, TransportError> {
        let response: SyncResponse = serde_json::from_value(body)
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        let models = self.merge_models(response.models)?;

        match response.result {
            serde_json::Value::Null => Err(TransportError::InvalidResponse(
                "result expected".into(),
            )),
            serde_json::Value::Array(items) => {
                let mut items = items.into_iter();
                let Some(serde_json::Value::String(kind)) = items.next() else {
                    return Err(TransportError::InvalidResponse(
                        "result array must start with a type name".into(),
                    ));
                };
                let mut entities = Vec::new();
                for item in items {
                    let Some(id) = Value::from(item).as_identifier() else {
                        continue;
                    };
                    match self.0.registry.fetch(&kind, &id) {
                        Some(entity) => entities.push(entity),
                        None => warn!(model = %kind, id, "Result references unknown entity"),
                    }
                }
                Ok(SyncResult::Entities(entities))
            }
            serde_json::Value::Object(map) => Ok(SyncResult::Attributes(self.coerce(model, map)?)),
            serde_json::Value::String(name) if models.contains_key(&name) => {
                Ok(SyncResult::Entities(models[&name].clone()))
            }
            raw @ (serde_json::Value::String(_) | serde_json::Value::Number(_)) => {
                let id = Value::from(raw).as_identifier().unwrap_or_default();
                self.0
                    .registry
                    .fetch(model, &id)
                    .map(|entity| SyncResult::Entities(vec![entity]))
                    .ok_or_else(|| {
                        TransportError::InvalidResponse(format!("unknown {model} {id}"))
                    })
            }
            serde_json::Value::Bool(_) => Err(TransportError::InvalidResponse(
                "unexpected boolean result".into(),
            )),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryTransport;
    use graphbind_schema::{AttrType, CollectionDef, ModelDef};
    use serde_json::json;

    fn schemas() -> SchemaRegistry {
        let mut schemas = SchemaRegistry::new("/api");
        schemas
            .register_model(
                ModelDef::new("User", "/users")
                    .attr("name", AttrType::Primitive(graphbind_schema::PrimitiveKind::String))
                    .attr("tags", AttrType::collection("Tag"))
                    .attr("comments", AttrType::collection("Comments")),
            )
            .unwrap();
        schemas.register_model(ModelDef::new("Tag", "/tags")).unwrap();
        schemas.register_model(ModelDef::embedded("Comment")).unwrap();
        schemas
            .register_collection(CollectionDef::embedded("Comments", "Comment", "/comments"))
            .unwrap();
        schemas
    }

    #[test]
    fn test_create_entity_merges_by_id() {
        let store = Store::new(schemas());
        let mut attrs = Attributes::new();
        attrs.insert("_id".into(), Value::from("u1"));
        attrs.insert("name".into(), Value::from("Ann"));
        let first = store.create_entity("User", attrs).unwrap();

        let mut attrs = Attributes::new();
        attrs.insert("_id".into(), Value::from("u1"));
        attrs.insert("name".into(), Value::from("Bea"));
        let second = store.create_entity("User", attrs).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.get("name"), Some(Value::from("Bea")));
    }

    #[test]
    fn test_unknown_model_is_config_error() {
        let store = Store::new(schemas());
        assert!(matches!(
            store.create_entity("Nope", Attributes::new()),
            Err(StoreError::Config(ConfigError::UnknownModel(_)))
        ));
    }

    #[test]
    fn test_hydrate_reference_forms() {
        let store = Store::new(schemas());
        let stub = store.hydrate("Tag", json!("t9")).unwrap();
        assert_eq!(stub.id().as_deref(), Some("t9"));
        assert_eq!(store.hydrate("Tag", json!("t9")).unwrap(), stub);
        assert!(matches!(
            store.hydrate("Tag", json!(true)),
            Err(StoreError::NotAnObject { .. })
        ));
    }

    #[test]
    fn test_entity_endpoints() {
        let store = Store::new(schemas());
        let user = store.hydrate("User", json!({"_id": "u1"})).unwrap();
        assert_eq!(store.url(&Target::Entity(user.clone())).unwrap(), "/api/users/u1");

        let fresh = store.hydrate("User", json!({"name": "x"})).unwrap();
        assert_eq!(store.url(&Target::Entity(fresh)).unwrap(), "/api/users");
    }

    #[test]
    fn test_embedded_endpoints() {
        let store = Store::new(schemas());
        let user = store
            .hydrate("User", json!({"_id": "u1", "comments": [{"_id": "c1"}]}))
            .unwrap();
        let comments = user.get("comments").and_then(|v| v.as_collection().cloned()).unwrap();
        assert_eq!(
            store.url(&Target::Collection(comments.clone())).unwrap(),
            "/api/users/u1/comments"
        );
        let comment = comments.at(0).unwrap();
        assert_eq!(
            store.url(&Target::Entity(comment)).unwrap(),
            "/api/users/u1/comments/c1"
        );

        let orphan = store.create_collection("Comments").unwrap();
        assert!(matches!(
            store.collection_endpoint(&orphan),
            Err(ConfigError::MissingParent(_))
        ));
        let loose = store.create_entity("Comment", Attributes::new()).unwrap();
        assert!(matches!(
            store.entity_endpoint(&loose),
            Err(ConfigError::MissingCollection(_))
        ));
    }

    #[test]
    fn test_collection_endpoint_falls_back_to_model() {
        let store = Store::new(schemas());
        let tags = store.create_collection("Tag").unwrap();
        assert_eq!(store.url(&Target::Collection(tags)).unwrap(), "/api/tags");
    }

    #[test]
    fn test_collection_write_rejected() {
        let store = Store::new(schemas());
        let tags = store.create_collection("Tag").unwrap();
        assert!(matches!(
            store.sync(Operation::Update, &Target::Collection(tags), None, None),
            Err(ConfigError::CollectionWrite(_))
        ));
    }

    #[test]
    fn test_parse_response_merges_models_first() {
        let store = Store::new(schemas());
        let result = store
            .parse_response(
                json!({
                    "result": ["Tag", "t1", "t2", "missing"],
                    "models": {"Tag": [{"_id": "t1"}, {"_id": "t2"}]}
                }),
                "Tag",
            )
            .unwrap();
        let SyncResult::Entities(tags) = result else {
            panic!("expected entities");
        };
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[1].id().as_deref(), Some("t2"));
    }

    #[test]
    fn test_parse_response_result_forms() {
        let store = Store::new(schemas());
        let by_name = store
            .parse_response(json!({"result": "Tag", "models": {"Tag": [{"_id": "t1"}]}}), "User")
            .unwrap();
        assert!(matches!(by_name, SyncResult::Entities(ref list) if list.len() == 1));

        let by_id = store
            .parse_response(json!({"result": "t1"}), "Tag")
            .unwrap();
        assert!(matches!(by_id, SyncResult::Entities(ref list) if list[0].id().as_deref() == Some("t1")));

        let attrs = store
            .parse_response(json!({"result": {"name": "Ann"}}), "User")
            .unwrap();
        assert!(matches!(attrs, SyncResult::Attributes(ref a) if a["name"] == Value::from("Ann")));

        assert!(store.parse_response(json!({"result": "nobody"}), "User").is_err());
        assert!(store.parse_response(json!([1, 2]), "User").is_err());
    }

    #[test]
    fn test_parse_response_requires_result() {
        let store = Store::new(schemas());
        let missing = store.parse_response(json!({"models": {"Tag": [{"_id": "t1"}]}}), "Tag");
        assert!(matches!(missing, Err(TransportError::InvalidResponse(_))));

        let null = store.parse_response(json!({"result": null}), "Tag");
        assert!(matches!(null, Err(TransportError::InvalidResponse(_))));
    }

    #[test]
    fn test_delete_ignores_response_body() {
        let transport = MemoryTransport::new();
        let store = Store::with_transport(schemas(), transport.clone());
        let user = store.hydrate("User", json!({"_id": "u1", "name": "Ann"})).unwrap();
        let deferred = store
            .sync(Operation::Delete, &Target::Entity(user.clone()), None, None)
            .unwrap();
        transport.respond_next(json!({"result": null}));
        assert!(matches!(deferred.outcome(), Some(Ok(SyncResult::Empty))));
    }

    #[test]
    fn test_sync_sends_entity_json() {
        let transport = MemoryTransport::new();
        let store = Store::with_transport(schemas(), transport.clone());
        let user = store.hydrate("User", json!({"_id": "u1", "name": "Ann"})).unwrap();

        let deferred = store
            .sync(Operation::Update, &Target::Entity(user), None, None)
            .unwrap();
        let sent = transport.sent();
        assert_eq!(sent[0].endpoint, "/api/users/u1");
        assert_eq!(sent[0].body.as_ref().unwrap()["name"], json!("Ann"));

        transport.respond_next(json!({"result": {"name": "Ann"}}));
        assert!(matches!(deferred.outcome(), Some(Ok(SyncResult::Attributes(_)))));
    }
}
