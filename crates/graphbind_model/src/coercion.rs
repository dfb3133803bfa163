//! Attribute coercion
//!
//! Raw JSON attributes are turned into typed values following the model's
//! schema. Coercion only adds structure: undeclared attributes and nulls
//! pass through untouched.

use chrono::{DateTime, NaiveDate, Utc};
use graphbind_schema::AttrType;
use tracing::{debug, warn};

use crate::{Attributes, Store, StoreError, Value};

impl Store {
    /// Coerce raw attributes of `model`
    ///
    /// - collection attributes: an array becomes a collection of coerced
    ///   members, anything else an empty collection
    /// - model attributes: a string is an identifier, an object a nested
    ///   entity; other values are dropped
    /// - dates: RFC 3339, `YYYY-MM-DD` or epoch milliseconds
    pub fn coerce(
        &self,
        model: &str,
        raw: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Attributes, StoreError> {
        let def = self.schemas().model(model)?;
        let mut attrs = Attributes::new();

        for (name, value) in raw {
            let attr_type = match def.attr_type(&name) {
                Some(attr_type) if !value.is_null() => attr_type,
                _ => {
                    attrs.insert(name, Value::from(value));
                    continue;
                }
            };

            match attr_type {
                AttrType::Primitive(_) => {
                    attrs.insert(name, Value::from(value));
                }
                AttrType::Date => {
                    attrs.insert(name, coerce_date(value));
                }
                AttrType::Model { model: target } => match self.reference(target, value)? {
                    Some(entity) => {
                        attrs.insert(name, Value::Entity(entity));
                    }
                    None => {
                        debug!(model, attr = %name, "Dropping unusable reference");
                    }
                },
                AttrType::Collection { collection } => {
                    let members = match value {
                        serde_json::Value::Array(items) => items,
                        other => {
                            debug!(model, attr = %name, actual = %other, "Collection payload is not an array");
                            Vec::new()
                        }
                    };
                    let collection = self.hydrate_collection(collection, members)?;
                    attrs.insert(name, Value::Collection(collection));
                }
            }
        }
        Ok(attrs)
    }
}

/// Build a date from a raw value, keeping the raw value when it does not parse
pub fn coerce_date(raw: serde_json::Value) -> Value {
    let parsed = match &raw {
        serde_json::Value::String(s) => parse_date(s),
        serde_json::Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    };
    match parsed {
        Some(date) => Value::Date(date),
        None => {
            warn!(raw = %raw, "Unparseable date");
            Value::from(raw)
        }
    }
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(s) {
        return Some(date.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphbind_schema::{AttrType, ConfigError, ModelDef, PrimitiveKind, SchemaRegistry};
    use serde_json::json;

    fn store() -> Store {
        let mut schemas = SchemaRegistry::new("");
        schemas
            .register_model(
                ModelDef::new("Post", "/posts")
                    .attr("name", AttrType::Primitive(PrimitiveKind::String))
                    .attr("tags", AttrType::collection("Tag"))
                    .attr("author", AttrType::model("User"))
                    .attr("created", AttrType::Date),
            )
            .unwrap();
        schemas
            .register_model(ModelDef::new("Tag", "/tags").attr("parent", AttrType::model("Tag")))
            .unwrap();
        schemas.register_model(ModelDef::new("User", "/users")).unwrap();
        Store::new(schemas)
    }

    #[test]
    fn test_scenario_tags_collection() {
        let store = store();
        let post = store
            .hydrate("Post", json!({"_id": "abc", "name": "x", "tags": [{"_id": "t1"}]}))
            .unwrap();
        assert_eq!(post.id().as_deref(), Some("abc"));
        assert_eq!(post.get("name"), Some(Value::from("x")));

        let tags = post.get("tags").and_then(|v| v.as_collection().cloned()).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags.at(0).unwrap().id().as_deref(), Some("t1"));
        assert_eq!(tags.parent(), Some(post));
    }

    #[test]
    fn test_non_array_collection_is_empty() {
        let store = store();
        let post = store.hydrate("Post", json!({"tags": "oops"})).unwrap();
        let tags = post.get("tags").and_then(|v| v.as_collection().cloned()).unwrap();
        assert!(tags.is_empty());
    }

    #[test]
    fn test_model_references() {
        let store = store();
        let user = store.hydrate("User", json!({"_id": "u1", "name": "Ann"})).unwrap();

        let post = store.hydrate("Post", json!({"author": "u1"})).unwrap();
        assert_eq!(post.get("author").and_then(|v| v.as_entity().cloned()), Some(user));

        let stub = store.hydrate("Post", json!({"author": "u2"})).unwrap();
        let author = stub.get("author").and_then(|v| v.as_entity().cloned()).unwrap();
        assert_eq!(author.id().as_deref(), Some("u2"));
        assert_eq!(author.attributes().len(), 1);

        let nested = store
            .hydrate("Post", json!({"author": {"_id": "u3", "name": "Cy"}}))
            .unwrap();
        assert_eq!(nested.get("author.name"), Some(Value::from("Cy")));

        let dropped = store.hydrate("Post", json!({"author": true})).unwrap();
        assert!(!dropped.has("author"));
        assert!(dropped.attribute("author").is_none());
    }

    #[test]
    fn test_passthrough() {
        let store = store();
        let post = store
            .hydrate("Post", json!({"author": null, "extra": {"a": 1}}))
            .unwrap();
        assert_eq!(post.attribute("author"), Some(Value::Null));
        assert_eq!(post.get("extra.a"), Some(Value::Int(1)));
    }

    #[test]
    fn test_dates() {
        assert!(matches!(coerce_date(json!("2024-03-01T10:00:00Z")), Value::Date(_)));
        assert!(matches!(coerce_date(json!("2024-03-01")), Value::Date(_)));
        let Value::Date(date) = coerce_date(json!(0)) else {
            panic!("expected a date");
        };
        assert_eq!(date.timestamp(), 0);
        assert_eq!(coerce_date(json!("soon")), Value::from("soon"));
    }

    #[test]
    fn test_unregistered_reference_is_config_error() {
        let mut schemas = SchemaRegistry::new("");
        schemas
            .register_model(ModelDef::new("Post", "/posts").attr("author", AttrType::model("Ghost")))
            .unwrap();
        let store = Store::new(schemas);
        assert!(matches!(
            store.hydrate("Post", json!({"author": "g1"})),
            Err(StoreError::Config(ConfigError::UnknownModel(_)))
        ));
    }

    #[test]
    fn test_round_trip_through_json() {
        let store = store();
        let post = store
            .hydrate(
                "Post",
                json!({"_id": "p1", "name": "x", "tags": [{"_id": "t1"}], "author": {"_id": "u1"}}),
            )
            .unwrap();
        let again = store.hydrate("Post", post.to_json()).unwrap();
        assert_eq!(again, post);
        assert_eq!(again.get("author").and_then(|v| v.as_entity().map(|e| e.id())), Some(Some("u1".to_string())));
        assert_eq!(again.get("tags.length"), Some(Value::Int(1)));
    }
}
