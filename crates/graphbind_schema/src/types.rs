// Attribute type declarations
//
// A model schema maps attribute names to one of these declarations. The JSON
// and TOML forms are intentionally terse:
//
//   "string" | "number" | "boolean" | "any"  -> primitive, passed through
//   "date"                                    -> constructible wrapper
//   "User"                                    -> nested model reference
//   ["Tag"]                                   -> nested collection

use serde::{Deserialize, Serialize};

use crate::ConfigError;

// ─────────────────────────────────────────────────────────────────────────────
// Primitive Kinds
// ─────────────────────────────────────────────────────────────────────────────

/// Primitive attribute kinds. These are never coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    String,
    Number,
    Boolean,
    Any,
}

impl PrimitiveKind {
    fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "boolean" | "bool" => Some(Self::Boolean),
            "any" => Some(Self::Any),
            _ => None,
        }
    }
}

impl std::fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrimitiveKind::String => write!(f, "string"),
            PrimitiveKind::Number => write!(f, "number"),
            PrimitiveKind::Boolean => write!(f, "boolean"),
            PrimitiveKind::Any => write!(f, "any"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Attribute Types
// ─────────────────────────────────────────────────────────────────────────────

/// Declared type of a single model attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub enum AttrType {
    /// Plain value, left as the server sent it
    Primitive(PrimitiveKind),
    /// Date/time, constructed from an RFC 3339 string or epoch milliseconds
    Date,
    /// Reference to another model type (by id string or embedded object)
    Model { model: String },
    /// Collection of another model type, by collection or model name
    Collection { collection: String },
}

impl AttrType {
    /// Create a nested model reference type
    pub fn model(model: impl Into<String>) -> Self {
        AttrType::Model {
            model: model.into(),
        }
    }

    /// Create a nested collection type
    pub fn collection(collection: impl Into<String>) -> Self {
        AttrType::Collection {
            collection: collection.into(),
        }
    }

    /// Parse the terse declaration form
    pub fn parse(decl: &serde_json::Value) -> Result<Self, ConfigError> {
        match decl {
            serde_json::Value::String(s) if s.is_empty() => {
                Err(ConfigError::InvalidAttrType(decl.to_string()))
            }
            serde_json::Value::String(s) => {
                if s == "date" {
                    return Ok(AttrType::Date);
                }
                Ok(PrimitiveKind::from_keyword(s)
                    .map(AttrType::Primitive)
                    .unwrap_or_else(|| AttrType::model(s.clone())))
            }
            serde_json::Value::Array(items) => match items.as_slice() {
                [serde_json::Value::String(name)] if !name.is_empty() => {
                    Ok(AttrType::collection(name.clone()))
                }
                _ => Err(ConfigError::InvalidAttrType(decl.to_string())),
            },
            _ => Err(ConfigError::InvalidAttrType(decl.to_string())),
        }
    }

    /// Get the referenced model or collection name, if any
    pub fn reference(&self) -> Option<&str> {
        match self {
            AttrType::Model { model } => Some(model),
            AttrType::Collection { collection } => Some(collection),
            _ => None,
        }
    }
}

impl TryFrom<serde_json::Value> for AttrType {
    type Error = ConfigError;

    fn try_from(v: serde_json::Value) -> Result<Self, Self::Error> {
        AttrType::parse(&v)
    }
}

impl From<AttrType> for serde_json::Value {
    fn from(t: AttrType) -> Self {
        match t {
            AttrType::Primitive(kind) => serde_json::Value::String(kind.to_string()),
            AttrType::Date => serde_json::Value::String("date".to_string()),
            AttrType::Model { model } => serde_json::Value::String(model),
            AttrType::Collection { collection } => {
                serde_json::Value::Array(vec![serde_json::Value::String(collection)])
            }
        }
    }
}
