// Model, collection and API definitions
//
// These are loaded from `graphbind.toml` (or JSON) and describe the shape and
// location of every model type the client knows about.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{AttrType, ConfigError};

// ─────────────────────────────────────────────────────────────────────────────
// Validation Rules
// ─────────────────────────────────────────────────────────────────────────────

/// A declarative validation rule applied to one attribute
///
/// Rules for an attribute run in order and stop at the first failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSpec {
    /// A missing or falsy value is accepted and the remaining rules are skipped
    Nullable,
    /// Value must be present and truthy
    NotNull,
    /// Value must be absent or falsy
    Null,
    /// Value must be an array
    Array,
    /// Value must be a 24 character object id
    ObjectId,
    /// String or array length bounds. Without `max`, length must equal `min`
    Len {
        min: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<usize>,
    },
    /// Value must equal one of the listed values
    OneOf(Vec<serde_json::Value>),
}

impl RuleSpec {
    /// Error code reported when this rule fails
    pub fn error_code(&self) -> &'static str {
        match self {
            RuleSpec::Nullable => "nullable",
            RuleSpec::NotNull => "notnull",
            RuleSpec::Null => "must_be_null",
            RuleSpec::Array => "array_expected",
            RuleSpec::ObjectId => "invalid_object_id",
            RuleSpec::Len { .. } => "invalid_len",
            RuleSpec::OneOf(_) => "invalid_enum",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Model Definition
// ─────────────────────────────────────────────────────────────────────────────

fn default_id_attribute() -> String {
    "_id".to_string()
}

/// Definition of one model type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDef {
    /// Unique model name (e.g. "User")
    pub name: String,
    /// Endpoint relative to the API base path (e.g. "/users")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Embedded models have no endpoint of their own; they are addressed
    /// through the collection that holds them
    #[serde(default)]
    pub embedded: bool,
    /// Attribute holding the server identifier
    #[serde(default = "default_id_attribute")]
    pub id_attribute: String,
    /// Attribute type declarations
    #[serde(default)]
    pub schema: BTreeMap<String, AttrType>,
    /// Validation rules by attribute
    #[serde(default)]
    pub validation: BTreeMap<String, Vec<RuleSpec>>,
    /// Default attribute values merged under constructor attributes
    #[serde(default)]
    pub defaults: serde_json::Map<String, serde_json::Value>,
}

impl ModelDef {
    /// Create a model definition with an endpoint
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: Some(endpoint.into()),
            embedded: false,
            id_attribute: default_id_attribute(),
            schema: BTreeMap::new(),
            validation: BTreeMap::new(),
            defaults: serde_json::Map::new(),
        }
    }

    /// Create an embedded model definition (no endpoint of its own)
    pub fn embedded(name: impl Into<String>) -> Self {
        Self {
            endpoint: None,
            embedded: true,
            ..Self::new(name, "")
        }
    }

    /// Declare an attribute type
    pub fn attr(mut self, name: impl Into<String>, attr_type: AttrType) -> Self {
        self.schema.insert(name.into(), attr_type);
        self
    }

    /// Add a validation rule for an attribute
    pub fn rule(mut self, name: impl Into<String>, rule: RuleSpec) -> Self {
        self.validation.entry(name.into()).or_default().push(rule);
        self
    }

    /// Add a default value
    pub fn default_value(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.defaults.insert(name.into(), value);
        self
    }

    /// Override the identifier attribute
    pub fn with_id_attribute(mut self, attr: impl Into<String>) -> Self {
        self.id_attribute = attr.into();
        self
    }

    /// Get an attribute type declaration
    pub fn attr_type(&self, name: &str) -> Option<&AttrType> {
        self.schema.get(name)
    }

    /// Whether this model declares any validation
    pub fn has_validation(&self) -> bool {
        !self.validation.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Collection Definition
// ─────────────────────────────────────────────────────────────────────────────

/// Definition of a named collection type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionDef {
    /// Unique collection name
    pub name: String,
    /// Element model type
    pub model: String,
    /// Endpoint, relative to the base path or, when embedded, to the parent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Embedded collections are addressed through their owning entity
    #[serde(default)]
    pub embedded: bool,
    /// Attribute used to keep members sorted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparator: Option<String>,
}

impl CollectionDef {
    /// Create a collection definition with its own endpoint
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            endpoint: Some(endpoint.into()),
            embedded: false,
            comparator: None,
        }
    }

    /// Create an embedded collection with an endpoint relative to its parent
    pub fn embedded(
        name: impl Into<String>,
        model: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Self {
        Self {
            embedded: true,
            ..Self::new(name, model, suffix)
        }
    }

    /// Anonymous collection of a model, used when a schema names a model
    /// directly instead of a collection
    pub fn anonymous(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            name: model.clone(),
            model,
            endpoint: None,
            embedded: false,
            comparator: None,
        }
    }

    /// Keep members sorted by an attribute
    pub fn sorted_by(mut self, attr: impl Into<String>) -> Self {
        self.comparator = Some(attr.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Complete API description
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Prefix for every resolved endpoint (e.g. "https://api.example.com")
    #[serde(default)]
    pub base_path: String,
    /// Model definitions
    #[serde(default)]
    pub models: Vec<ModelDef>,
    /// Collection definitions
    #[serde(default)]
    pub collections: Vec<CollectionDef>,
}

impl ApiConfig {
    /// Create an empty configuration with a base path
    pub fn new(base_path: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Self::default()
        }
    }

    /// Add a model definition
    pub fn with_model(mut self, def: ModelDef) -> Self {
        self.models.push(def);
        self
    }

    /// Add a collection definition
    pub fn with_collection(mut self, def: CollectionDef) -> Self {
        self.collections.push(def);
        self
    }

    /// Parse from TOML content
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Parse from JSON content
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}
