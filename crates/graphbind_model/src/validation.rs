// Attribute validation
//
// Declarative rules come from the model definition; custom validators are
// registered per model type on the store. Rules for one attribute run in
// order and stop at the first failure.

use std::collections::BTreeMap;
use std::rc::Rc;

use graphbind_schema::{ModelDef, RuleSpec};

use crate::{Attributes, Value};

/// Custom validator over the candidate attribute map
pub type Validator = Rc<dyn Fn(&Attributes) -> Result<(), ValidationErrors>>;

/// Attribute name to error code
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(BTreeMap<String, String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single error
    pub fn single(attr: impl Into<String>, code: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.insert(attr, code);
        errors
    }

    /// Record an error. The first error for an attribute wins
    pub fn insert(&mut self, attr: impl Into<String>, code: impl Into<String>) {
        self.0.entry(attr.into()).or_insert_with(|| code.into());
    }

    /// Error code for an attribute
    pub fn get(&self, attr: &str) -> Option<&str> {
        self.0.get(attr).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn merge(&mut self, other: ValidationErrors) {
        for (attr, code) in other.0 {
            self.insert(attr, code);
        }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.iter().map(|(k, v)| format!("{k}: {v}")).collect();
        write!(f, "{}", parts.join(", "))
    }
}

impl std::error::Error for ValidationErrors {}

impl From<&ValidationErrors> for serde_json::Value {
    fn from(errors: &ValidationErrors) -> Self {
        serde_json::Value::Object(
            errors
                .iter()
                .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
                .collect(),
        )
    }
}

/// Whether a model type validates at all
pub fn has_validation(def: &ModelDef, validators: &[Validator]) -> bool {
    def.has_validation() || !validators.is_empty()
}

/// Validate a candidate attribute map
///
/// Returns `None` when every rule and validator passes.
pub fn validate(
    def: &ModelDef,
    validators: &[Validator],
    attrs: &Attributes,
) -> Option<ValidationErrors> {
    let mut errors = ValidationErrors::new();

    for (attr, rules) in &def.validation {
        if let Err(code) = check_rules(rules, attrs.get(attr)) {
            errors.insert(attr.clone(), code);
        }
    }
    for validator in validators {
        if let Err(e) = validator(attrs) {
            errors.merge(e);
        }
    }

    if errors.is_empty() { None } else { Some(errors) }
}

fn check_rules(rules: &[RuleSpec], value: Option<&Value>) -> Result<(), &'static str> {
    let truthy = value.is_some_and(Value::is_truthy);

    for rule in rules {
        match rule {
            RuleSpec::Nullable => {
                if !truthy {
                    return Ok(());
                }
            }
            RuleSpec::NotNull => {
                if !truthy {
                    return Err(rule.error_code());
                }
            }
            RuleSpec::Null => {
                if truthy {
                    return Err(rule.error_code());
                }
            }
            RuleSpec::Array => {
                if !matches!(value, Some(Value::Array(_) | Value::Collection(_))) {
                    return Err(rule.error_code());
                }
            }
            RuleSpec::ObjectId => {
                let id = match value {
                    None | Some(Value::Null) => return Err("object_required"),
                    Some(Value::Entity(e)) => e.id(),
                    Some(v) => v.as_identifier(),
                };
                if id.is_none_or(|id| id.len() != 24) {
                    return Err(rule.error_code());
                }
            }
            RuleSpec::Len { min, max } => {
                let len = value.and_then(Value::len).unwrap_or(0);
                let ok = match max {
                    Some(max) => len >= *min && len <= *max,
                    None => len == *min,
                };
                if !ok {
                    return Err(rule.error_code());
                }
            }
            RuleSpec::OneOf(allowed) => {
                let candidate = value.cloned().unwrap_or(Value::Null);
                if !allowed.iter().any(|a| Value::from(a.clone()) == candidate) {
                    return Err(rule.error_code());
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(raw: serde_json::Value) -> Attributes {
        match Value::from(raw) {
            Value::Object(fields) => fields,
            _ => Attributes::new(),
        }
    }

    #[test]
    fn test_not_null_and_len() {
        let def = ModelDef::new("User", "/users")
            .rule("name", RuleSpec::NotNull)
            .rule("name", RuleSpec::Len { min: 2, max: Some(4) });

        assert!(validate(&def, &[], &attrs(json!({"name": "Ann"}))).is_none());

        let errors = validate(&def, &[], &attrs(json!({"name": "A"}))).unwrap();
        assert_eq!(errors.get("name"), Some("invalid_len"));

        let errors = validate(&def, &[], &attrs(json!({}))).unwrap();
        assert_eq!(errors.get("name"), Some("notnull"));
    }

    #[test]
    fn test_nullable_short_circuits() {
        let def = ModelDef::new("User", "/users")
            .rule("manager", RuleSpec::Nullable)
            .rule("manager", RuleSpec::ObjectId);

        assert!(validate(&def, &[], &attrs(json!({}))).is_none());
        let errors = validate(&def, &[], &attrs(json!({"manager": "short"}))).unwrap();
        assert_eq!(errors.get("manager"), Some("invalid_object_id"));
        assert!(
            validate(
                &def,
                &[],
                &attrs(json!({"manager": "0123456789abcdef01234567"}))
            )
            .is_none()
        );
    }

    #[test]
    fn test_one_of_and_array() {
        let def = ModelDef::new("Post", "/posts")
            .rule("state", RuleSpec::OneOf(vec![json!("draft"), json!("live")]))
            .rule("tags", RuleSpec::Array);

        let errors = validate(&def, &[], &attrs(json!({"state": "gone", "tags": "x"}))).unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.get("state"), Some("invalid_enum"));
        assert_eq!(errors.get("tags"), Some("array_expected"));
    }

    #[test]
    fn test_custom_validator() {
        let def = ModelDef::new("Post", "/posts");
        let validator: Validator = Rc::new(|a: &Attributes| match a.get("title") {
            Some(Value::String(s)) if s.starts_with('#') => {
                Err(ValidationErrors::single("title", "no_hash"))
            }
            _ => Ok(()),
        });

        assert!(has_validation(&def, std::slice::from_ref(&validator)));
        assert!(validate(&def, &[validator.clone()], &attrs(json!({"title": "ok"}))).is_none());
        let errors = validate(&def, &[validator], &attrs(json!({"title": "#no"}))).unwrap();
        assert_eq!(errors.to_string(), "title: no_hash");
    }
}
