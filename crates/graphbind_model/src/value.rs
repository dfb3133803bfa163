//! Attribute values
//!
//! Every entity attribute holds a [`Value`]. Plain JSON shapes are carried
//! structurally; nested entities and collections are carried as shared
//! handles and compared by identity.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{Collection, Entity};

/// Attribute map of an entity or plain object
pub type Attributes = BTreeMap<String, Value>;

// ─────────────────────────────────────────────────────────────────────────────
// Value Type
// ─────────────────────────────────────────────────────────────────────────────

/// A single attribute value
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Explicit null
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Coerced date/time
    Date(DateTime<Utc>),
    Array(Vec<Value>),
    /// Plain nested object, not an entity
    Object(Attributes),
    /// Reference to a live entity
    Entity(Entity),
    /// Reference to a live collection
    Collection(Collection),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_f64() == other.as_f64()
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Entity(a), Value::Entity(b)) => a == b,
            (Value::Collection(a), Value::Collection(b)) => a == b,
            _ => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value Accessors
// ─────────────────────────────────────────────────────────────────────────────

impl Value {
    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64 (also converts from float if lossless)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Get as f64 (also converts from int)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Get as string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as date
    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(d),
            _ => None,
        }
    }

    /// Get as array reference
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Get as plain object reference
    pub fn as_object(&self) -> Option<&Attributes> {
        match self {
            Value::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Get as entity handle
    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Value::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// Get as collection handle
    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            Value::Collection(c) => Some(c),
            _ => None,
        }
    }

    /// Interpret as a server identifier
    pub fn as_identifier(&self) -> Option<String> {
        match self {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some((*f as i64).to_string()),
            _ => None,
        }
    }

    /// Truthiness used by validation rules and binding expressions
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0 && !f.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Length of strings, arrays and collections
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(arr) => Some(arr.len()),
            Value::Collection(c) => Some(c.len()),
            _ => None,
        }
    }

    /// Resolve one path segment against this value
    ///
    /// Entities resolve against their attributes, plain objects against
    /// their fields, and strings, arrays and collections understand
    /// `length` and numeric indexes.
    pub fn member(&self, name: &str) -> Option<Value> {
        match self {
            Value::Entity(e) => e.attribute(name),
            Value::Object(fields) => fields.get(name).cloned(),
            Value::Array(arr) => match name {
                "length" => Some(Value::from(arr.len())),
                _ => name.parse::<usize>().ok().and_then(|i| arr.get(i).cloned()),
            },
            Value::Collection(c) => match name {
                "length" => Some(Value::from(c.len())),
                _ => name
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| c.at(i))
                    .map(Value::Entity),
            },
            Value::String(s) if name == "length" => Some(Value::from(s.chars().count())),
            _ => None,
        }
    }

    /// Resolve a dotted path against this value
    pub fn resolve(&self, path: &str) -> Option<Value> {
        let mut names = path.split('.');
        let first = names.next()?;
        let mut value = self.member(first)?;
        for name in names {
            value = value.member(name)?;
        }
        Some(value)
    }

    /// Human readable form used when rendering into text
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => (*f as i64).to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::Date(d) => d.to_rfc3339_opts(SecondsFormat::Millis, true),
            Value::Array(arr) => arr
                .iter()
                .map(Value::to_display_string)
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => self.to_json().to_string(),
            Value::Entity(e) => e.id().unwrap_or_else(|| e.cid().to_string()),
            Value::Collection(c) => c
                .models()
                .iter()
                .map(|e| e.id().unwrap_or_else(|| e.cid().to_string()))
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Order two values for sorting
    ///
    /// Numbers compare numerically, strings and dates naturally. Mixed kinds
    /// are ordered by kind with null first.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                let (a, b) = (self.as_f64().unwrap_or(0.0), other.as_f64().unwrap_or(0.0));
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::String(_) => 3,
            Value::Date(_) => 4,
            Value::Array(_) => 5,
            Value::Object(_) => 6,
            Value::Entity(_) => 7,
            Value::Collection(_) => 8,
        }
    }

    /// Kind name for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Entity(_) => "entity",
            Value::Collection(_) => "collection",
        }
    }

    /// Serialise into plain JSON
    ///
    /// Entities become their identifier, or their full JSON while new.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Date(d) => {
                serde_json::Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Value::Array(arr) => serde_json::Value::Array(arr.iter().map(Value::to_json).collect()),
            Value::Object(fields) => serde_json::Value::Object(
                fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Entity(e) => match e.id() {
                Some(id) => serde_json::Value::String(id),
                None => e.to_json(),
            },
            Value::Collection(c) => c.to_json(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Nested Plain Paths
// ─────────────────────────────────────────────────────────────────────────────

/// Look up a dotted path through plain nested objects
pub fn get_nested<'a>(fields: &'a Attributes, path: &str) -> Option<&'a Value> {
    let mut names = path.split('.');
    let mut value = fields.get(names.next()?)?;
    for name in names {
        value = value.as_object()?.get(name)?;
    }
    Some(value)
}

/// Assign a dotted path, creating intermediate objects as needed
pub fn set_nested(fields: &mut Attributes, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            fields.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let slot = fields
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Attributes::new()));
            if !matches!(slot, Value::Object(_)) {
                *slot = Value::Object(Attributes::new());
            }
            if let Value::Object(inner) = slot {
                set_nested(inner, rest, value);
            }
        }
    }
}

/// Remove a dotted path, returning the removed value
pub fn remove_nested(fields: &mut Attributes, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => fields.remove(path),
        Some((head, rest)) => match fields.get_mut(head) {
            Some(Value::Object(inner)) => remove_nested(inner, rest),
            _ => None,
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// From Implementations
// ─────────────────────────────────────────────────────────────────────────────

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Date(v)
    }
}

impl From<Entity> for Value {
    fn from(v: Entity) -> Self {
        Value::Entity(v)
    }
}

impl From<Collection> for Value {
    fn from(v: Collection) -> Self {
        Value::Collection(v)
    }
}

impl From<Attributes> for Value {
    fn from(fields: Attributes) -> Self {
        Value::Object(fields)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// serde_json::Value Interop
// ─────────────────────────────────────────────────────────────────────────────

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Null
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => {
                Value::Object(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Convert a JSON object into plain attributes without coercion
pub fn attributes_from_json(map: serde_json::Map<String, serde_json::Value>) -> Attributes {
    map.into_iter().map(|(k, v)| (k, Value::from(v))).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_equality_across_kinds() {
        assert_eq!(Value::Int(3), Value::Float(3.0));
        assert_ne!(Value::Int(3), Value::String("3".into()));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Float(f64::NAN).is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(Value::Array(vec![]).is_truthy());
    }

    #[test]
    fn test_nested_plain_paths() {
        let mut fields = Attributes::new();
        set_nested(&mut fields, "meta.author.name", Value::from("Ann"));
        assert_eq!(
            get_nested(&fields, "meta.author.name"),
            Some(&Value::from("Ann"))
        );
        assert!(get_nested(&fields, "meta.missing.name").is_none());

        assert_eq!(
            remove_nested(&mut fields, "meta.author.name"),
            Some(Value::from("Ann"))
        );
        assert!(get_nested(&fields, "meta.author").is_some());
    }

    #[test]
    fn test_resolve_length_and_index() {
        let value = Value::from(json!({"items": [1, 2, 3], "name": "abc"}));
        assert_eq!(value.resolve("items.length"), Some(Value::Int(3)));
        assert_eq!(value.resolve("items.1"), Some(Value::Int(2)));
        assert_eq!(value.resolve("name.length"), Some(Value::Int(3)));
        assert_eq!(value.resolve("name.first"), None);
    }

    #[test]
    fn test_json_roundtrip_of_plain_values() {
        let raw = json!({"a": [1, 2.5, "x", null, true], "b": {"c": 1}});
        assert_eq!(Value::from(raw.clone()).to_json(), raw);
    }

    #[test]
    fn test_display_strings() {
        assert_eq!(Value::Null.to_display_string(), "");
        assert_eq!(Value::Float(2.0).to_display_string(), "2");
        assert_eq!(Value::Float(2.5).to_display_string(), "2.5");
        assert_eq!(
            Value::from(vec![Value::Int(1), Value::from("b")]).to_display_string(),
            "1,b"
        );
    }

    #[test]
    fn test_compare_mixed_kinds() {
        assert_eq!(Value::Int(1).compare(&Value::Float(1.5)), Ordering::Less);
        assert_eq!(Value::Null.compare(&Value::Int(0)), Ordering::Less);
        assert_eq!(Value::from("b").compare(&Value::from("a")), Ordering::Greater);
    }

    #[test]
    fn test_identifier_forms() {
        assert_eq!(Value::from("abc").as_identifier().as_deref(), Some("abc"));
        assert_eq!(Value::Int(7).as_identifier().as_deref(), Some("7"));
        assert_eq!(Value::from("").as_identifier(), None);
        assert_eq!(Value::Bool(true).as_identifier(), None);
    }
}
