//! Command implementations
//!
//! `hydrate` merges a response envelope into a store and describes the
//! resulting entity graph. `render` binds an in-memory element against
//! hydrated entities, applies attribute assignments and renders again.
//! Both return their output so the binary only prints.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::str::FromStr;

use graphbind_model::{
    Entity, SetError, Store, StoreError, SyncResponse, SyncResult, TransportError, Value,
};
use graphbind_view::{BindRuntime, BindingError, Element, Scope, View};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Invalid response envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error(transparent)]
    Set(#[from] SetError),

    #[error("No {model} with id {id} in the response")]
    UnknownEntity { model: String, id: String },

    #[error("Unknown scope: {0}")]
    UnknownScope(String),

    #[error("Cannot tell the response type, pass --type")]
    MissingType,
}

/// Malformed command line value
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArgError {
    #[error("Expected name=Type:id, got {0:?}")]
    Scope(String),

    #[error("Expected scope.path=value, got {0:?}")]
    Assignment(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Arguments
// ─────────────────────────────────────────────────────────────────────────────

/// `name=Type:id`: expose an entity under `name`
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeSpec {
    pub name: String,
    pub model: String,
    pub id: String,
}

impl FromStr for ScopeSpec {
    type Err = ArgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ArgError::Scope(s.to_string());
        let (name, target) = s.split_once('=').ok_or_else(invalid)?;
        let (model, id) = target.split_once(':').ok_or_else(invalid)?;
        let (name, model, id) = (name.trim(), model.trim(), id.trim());
        if name.is_empty() || model.is_empty() || id.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            name: name.to_string(),
            model: model.to_string(),
            id: id.to_string(),
        })
    }
}

/// `scope.path=value`. The value is JSON when it parses as JSON, a string otherwise
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub scope: String,
    pub path: String,
    pub value: serde_json::Value,
}

impl FromStr for Assignment {
    type Err = ArgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ArgError::Assignment(s.to_string());
        let (target, raw) = s.split_once('=').ok_or_else(invalid)?;
        let (scope, path) = target.trim().split_once('.').ok_or_else(invalid)?;
        if scope.is_empty() || path.is_empty() {
            return Err(invalid());
        }
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        Ok(Self {
            scope: scope.to_string(),
            path: path.to_string(),
            value,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hydrate
// ─────────────────────────────────────────────────────────────────────────────

/// Merge `body` into `store` and describe every entity it produced
///
/// `model` is the type an object or identifier `result` refers to. Without
/// it the first type listed under `models` is used.
pub fn hydrate(store: &Store, body: serde_json::Value, model: Option<&str>) -> Result<String, CommandError> {
    let response: SyncResponse = serde_json::from_value(body)?;
    let merged = store.merge_models(response.models)?;

    let mut out = String::new();
    for (name, entities) in &merged {
        let _ = writeln!(out, "{name} ({})", entities.len());
        for entity in entities {
            write_entity(&mut out, entity);
        }
    }

    if !response.result.is_null() {
        let model = model
            .or_else(|| merged.keys().next().map(String::as_str))
            .ok_or(CommandError::MissingType)?;
        let envelope = serde_json::json!({ "result": response.result });
        let _ = writeln!(out, "result:");
        match store.parse_response(envelope, model)? {
            SyncResult::Entities(entities) => {
                for entity in &entities {
                    write_entity(&mut out, entity);
                }
            }
            SyncResult::Attributes(attrs) => {
                let json: serde_json::Map<_, _> =
                    attrs.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
                let _ = writeln!(out, "  {model} attributes {}", serde_json::Value::Object(json));
            }
            SyncResult::Empty => {
                let _ = writeln!(out, "  (empty)");
            }
        }
    }

    info!(models = merged.len(), "Response hydrated");
    Ok(out)
}

fn write_entity(out: &mut String, entity: &Entity) {
    let id = entity.id().unwrap_or_else(|| format!("c{}", entity.cid().as_u64()));
    let _ = writeln!(out, "  {}#{} {}", entity.type_name(), id, entity.to_json());
}

// ─────────────────────────────────────────────────────────────────────────────
// Render
// ─────────────────────────────────────────────────────────────────────────────

/// Rendered HTML before and after the assignments
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub before: String,
    pub after: String,
}

/// Bind a `div` carrying `bind` against the scoped entities of `body`
pub fn render(
    store: &Store,
    body: serde_json::Value,
    scopes: &[ScopeSpec],
    bind: &str,
    sets: &[Assignment],
) -> Result<Rendered, CommandError> {
    let response: SyncResponse = serde_json::from_value(body)?;
    // Held so the weakly registered entities stay alive while bound
    let _merged: BTreeMap<String, Vec<Entity>> = store.merge_models(response.models)?;

    let mut scope = Scope::new();
    let mut entities = BTreeMap::new();
    for spec in scopes {
        let entity = store
            .registry()
            .fetch(&spec.model, &spec.id)
            .ok_or_else(|| CommandError::UnknownEntity {
                model: spec.model.clone(),
                id: spec.id.clone(),
            })?;
        scope.set(&spec.name, entity.clone());
        entities.insert(spec.name.clone(), entity);
    }

    let element = Element::new("div").with_bind(bind);
    let view = View::new(BindRuntime::new(), element.clone(), scope);
    view.bind()?;
    let before = element.to_html();

    for assignment in sets {
        let entity = entities
            .get(&assignment.scope)
            .ok_or_else(|| CommandError::UnknownScope(assignment.scope.clone()))?;
        debug!(scope = %assignment.scope, path = %assignment.path, "Applying assignment");
        entity.set(&assignment.path, Value::from(assignment.value.clone()))?;
    }
    let after = element.to_html();
    view.remove();

    Ok(Rendered { before, after })
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphbind_schema::{AttrType, ModelDef, PrimitiveKind, SchemaRegistry};
    use serde_json::json;

    fn store() -> Store {
        let mut schemas = SchemaRegistry::new("/api");
        schemas
            .register_model(
                ModelDef::new("User", "/users")
                    .attr("name", AttrType::Primitive(PrimitiveKind::String))
                    .attr("tags", AttrType::collection("Tag")),
            )
            .unwrap();
        schemas.register_model(ModelDef::new("Tag", "/tags")).unwrap();
        Store::new(schemas)
    }

    #[test]
    fn test_parse_scope_spec() {
        let spec: ScopeSpec = "user=User:u1".parse().unwrap();
        assert_eq!(spec.name, "user");
        assert_eq!(spec.model, "User");
        assert_eq!(spec.id, "u1");
        assert!("user=User".parse::<ScopeSpec>().is_err());
        assert!("=User:u1".parse::<ScopeSpec>().is_err());
    }

    #[test]
    fn test_parse_assignment() {
        let set: Assignment = "user.name=Bea".parse().unwrap();
        assert_eq!(set.scope, "user");
        assert_eq!(set.path, "name");
        assert_eq!(set.value, json!("Bea"));

        let set: Assignment = "user.profile.age=42".parse().unwrap();
        assert_eq!(set.path, "profile.age");
        assert_eq!(set.value, json!(42));
        assert_eq!(
            "name=Bea".parse::<Assignment>(),
            Err(ArgError::Assignment("name=Bea".into()))
        );
    }

    #[test]
    fn test_hydrate_describes_graph() {
        let store = store();
        let out = hydrate(
            &store,
            json!({
                "result": ["User", "u1"],
                "models": {"User": [{"_id": "u1", "name": "Ann", "tags": [{"_id": "t1"}]}]}
            }),
            None,
        )
        .unwrap();
        assert!(out.contains("User (1)"));
        assert!(out.contains("User#u1"));
        assert!(out.contains("result:"));
    }

    #[test]
    fn test_hydrate_needs_type_for_bare_result() {
        let store = store();
        assert!(matches!(
            hydrate(&store, json!({"result": "u1"}), None),
            Err(CommandError::MissingType)
        ));
    }

    #[test]
    fn test_render_applies_assignments() {
        let store = store();
        let rendered = render(
            &store,
            json!({"models": {"User": [{"_id": "u1", "name": "Ann"}]}}),
            &["user=User:u1".parse().unwrap()],
            "text: ~user:name",
            &["user.name=Bea".parse().unwrap()],
        )
        .unwrap();
        assert!(rendered.before.contains(">Ann<"));
        assert!(rendered.after.contains(">Bea<"));
    }

    #[test]
    fn test_render_unknown_entity() {
        let store = store();
        let result = render(
            &store,
            json!({}),
            &["user=User:missing".parse().unwrap()],
            "text: ~user:name",
            &[],
        );
        assert!(matches!(result, Err(CommandError::UnknownEntity { .. })));
    }
}
