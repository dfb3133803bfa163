//! Schema Registry
//!
//! Holds every model and collection definition known to a client. The registry
//! is an explicit value handed to the coercion and transport layers; there is
//! no process-wide table of model types.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::{ApiConfig, AttrType, CollectionDef, ModelDef};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Error
// ─────────────────────────────────────────────────────────────────────────────

/// Setup mistakes. These are never recoverable at runtime.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Model already registered: {0}")]
    DuplicateModel(String),
    #[error("Collection already registered: {0}")]
    DuplicateCollection(String),
    #[error("Unknown model: {0}")]
    UnknownModel(String),
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),
    #[error("Invalid attribute type declaration: {0}")]
    InvalidAttrType(String),
    #[error("{owner}.{attr} references unknown type {target}")]
    DanglingReference {
        owner: String,
        attr: String,
        target: String,
    },
    #[error("Missing endpoint for {0}")]
    MissingEndpoint(String),
    #[error("Embedded model {0} has no owning collection")]
    MissingCollection(String),
    #[error("Embedded collection {0} has no parent entity")]
    MissingParent(String),
    #[error("Collections can only be read, not {0}")]
    CollectionWrite(String),
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Schema Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Registry of model and collection definitions
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    base_path: String,
    models: HashMap<String, Rc<ModelDef>>,
    collections: HashMap<String, Rc<CollectionDef>>,
}

impl SchemaRegistry {
    /// Create an empty registry
    pub fn new(base_path: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            models: HashMap::new(),
            collections: HashMap::new(),
        }
    }

    /// Build a registry from a configuration, checking every reference
    pub fn from_config(config: ApiConfig) -> Result<Self, ConfigError> {
        let mut registry = Self::new(config.base_path);
        for def in config.models {
            registry.register_model(def)?;
        }
        for def in config.collections {
            registry.register_collection(def)?;
        }
        registry.check_references()?;
        debug!(
            models = registry.models.len(),
            collections = registry.collections.len(),
            "Schema registry built"
        );
        Ok(registry)
    }

    /// Register a model definition
    pub fn register_model(&mut self, def: ModelDef) -> Result<(), ConfigError> {
        if self.models.contains_key(&def.name) {
            return Err(ConfigError::DuplicateModel(def.name));
        }
        self.models.insert(def.name.clone(), Rc::new(def));
        Ok(())
    }

    /// Register a collection definition
    pub fn register_collection(&mut self, def: CollectionDef) -> Result<(), ConfigError> {
        if self.collections.contains_key(&def.name) {
            return Err(ConfigError::DuplicateCollection(def.name));
        }
        self.collections.insert(def.name.clone(), Rc::new(def));
        Ok(())
    }

    /// Base path prefixed to every endpoint
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Get a model definition
    pub fn model(&self, name: &str) -> Result<Rc<ModelDef>, ConfigError> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownModel(name.to_string()))
    }

    /// Check if a model exists
    pub fn contains_model(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Get a collection definition
    ///
    /// A name that only matches a model resolves to an anonymous collection
    /// of that model.
    pub fn collection(&self, name: &str) -> Result<Rc<CollectionDef>, ConfigError> {
        if let Some(def) = self.collections.get(name) {
            return Ok(def.clone());
        }
        if self.models.contains_key(name) {
            return Ok(Rc::new(CollectionDef::anonymous(name)));
        }
        Err(ConfigError::UnknownCollection(name.to_string()))
    }

    /// All registered model names
    pub fn model_names(&self) -> Vec<&str> {
        self.models.keys().map(|s| s.as_str()).collect()
    }

    /// Verify that every schema reference names a known type
    pub fn check_references(&self) -> Result<(), ConfigError> {
        for def in self.models.values() {
            for (attr, attr_type) in &def.schema {
                let known = match attr_type {
                    AttrType::Model { model } => self.models.contains_key(model),
                    AttrType::Collection { collection } => self
                        .collection(collection)
                        .map(|c| self.models.contains_key(&c.model))
                        .unwrap_or(false),
                    AttrType::Primitive(_) | AttrType::Date => true,
                };
                if !known {
                    return Err(ConfigError::DanglingReference {
                        owner: def.name.clone(),
                        attr: attr.clone(),
                        target: attr_type.reference().unwrap_or_default().to_string(),
                    });
                }
            }
        }
        for def in self.collections.values() {
            if !self.models.contains_key(&def.model) {
                return Err(ConfigError::DanglingReference {
                    owner: def.name.clone(),
                    attr: "model".to_string(),
                    target: def.model.clone(),
                });
            }
        }
        Ok(())
    }
}
