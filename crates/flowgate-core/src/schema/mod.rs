//! Schema model
//!
//! The manifest-facing [`SchemaSpec`] descriptor is parsed once into this
//! immutable tagged tree. The validator and the compatibility checker both
//! pattern-match on it; task and workflow schemas are parsed at compile
//! time and shared read-only across executions.

mod compat;
mod validate;

pub use compat::{compatible, Incompatibility};
pub use validate::{validate, validate_strict};

use std::collections::{BTreeMap, BTreeSet};

use flowgate_contracts::SchemaSpec;

use crate::error::{Violation, ViolationKind};

/// Parsed, immutable schema tree
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Object {
        properties: BTreeMap<String, Schema>,
        required: BTreeSet<String>,
    },
    Array {
        items: Box<Schema>,
    },
    String {
        format: Option<String>,
        enumeration: Option<Vec<String>>,
    },
    Number {
        minimum: Option<f64>,
        maximum: Option<f64>,
    },
    Integer {
        minimum: Option<f64>,
        maximum: Option<f64>,
    },
    Boolean,
    Any,
}

impl Schema {
    /// Parse a declarative descriptor, collecting every problem instead of
    /// stopping at the first.
    pub fn parse(spec: &SchemaSpec) -> Result<Schema, Vec<Violation>> {
        let mut violations = Vec::new();
        let schema = parse_at(spec, "", &mut violations);
        if violations.is_empty() {
            Ok(schema)
        } else {
            Err(violations)
        }
    }

    /// Base kind name as written in manifests
    pub fn kind(&self) -> &'static str {
        match self {
            Schema::Object { .. } => "object",
            Schema::Array { .. } => "array",
            Schema::String { .. } => "string",
            Schema::Number { .. } => "number",
            Schema::Integer { .. } => "integer",
            Schema::Boolean => "boolean",
            Schema::Any => "any",
        }
    }

    /// Short human-readable description for diagnostics
    pub fn describe(&self) -> String {
        match self {
            Schema::String {
                format: Some(f), ..
            } => format!("string(format={f})"),
            Schema::String {
                enumeration: Some(e),
                ..
            } => format!("string(enum of {})", e.len()),
            other => other.kind().to_string(),
        }
    }

    /// Walk the schema along object-field / array-index segments.
    ///
    /// Returns `None` when a segment has no counterpart in the schema.
    /// Walking through `any` yields `any` for the remainder.
    pub fn walk<'a, I>(&self, segments: I) -> Option<Schema>
    where
        I: IntoIterator<Item = &'a crate::template::Segment>,
    {
        use crate::template::Segment;

        let mut current = self;
        for segment in segments {
            if matches!(current, Schema::Any) {
                return Some(Schema::Any);
            }
            current = match (current, segment) {
                (Schema::Object { properties, .. }, Segment::Field(name)) => {
                    properties.get(name)?
                }
                (Schema::Array { items }, Segment::Index(_)) => items,
                _ => return None,
            };
        }
        Some(current.clone())
    }

    /// Schema that a JSON literal trivially satisfies, used to type-check
    /// literal bindings against a consumer property.
    pub fn of_literal(value: &serde_json::Value) -> Schema {
        use serde_json::Value;

        match value {
            Value::Null => Schema::Any,
            Value::Bool(_) => Schema::Boolean,
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    Schema::Integer {
                        minimum: n.as_f64(),
                        maximum: n.as_f64(),
                    }
                } else {
                    Schema::Number {
                        minimum: n.as_f64(),
                        maximum: n.as_f64(),
                    }
                }
            }
            Value::String(s) => Schema::String {
                format: None,
                enumeration: Some(vec![s.clone()]),
            },
            Value::Array(items) => {
                // Element schema would need a join over all elements; `any`
                // keeps literal arrays permissive and defers to runtime
                // validation.
                let _ = items;
                Schema::Array {
                    items: Box::new(Schema::Any),
                }
            }
            Value::Object(map) => Schema::Object {
                properties: map
                    .iter()
                    .map(|(k, v)| (k.clone(), Schema::of_literal(v)))
                    .collect(),
                required: map.keys().cloned().collect(),
            },
        }
    }
}

fn parse_at(spec: &SchemaSpec, path: &str, violations: &mut Vec<Violation>) -> Schema {
    let child_path = |name: &str| {
        if path.is_empty() {
            name.to_string()
        } else {
            format!("{path}.{name}")
        }
    };

    if let (Some(min), Some(max)) = (spec.minimum, spec.maximum) {
        if min > max {
            violations.push(Violation::new(
                path,
                ViolationKind::OutOfRange,
                format!("minimum {min} exceeds maximum {max}"),
            ));
        }
    }

    match spec.kind.as_str() {
        "object" => {
            let properties: BTreeMap<String, Schema> = spec
                .properties
                .iter()
                .map(|(name, child)| {
                    (name.clone(), parse_at(child, &child_path(name), violations))
                })
                .collect();
            let mut required = BTreeSet::new();
            for name in &spec.required {
                if !properties.contains_key(name) {
                    violations.push(Violation::new(
                        path,
                        ViolationKind::MissingRequired,
                        format!("required property '{name}' is not declared in properties"),
                    ));
                } else {
                    required.insert(name.clone());
                }
            }
            Schema::Object {
                properties,
                required,
            }
        }
        "array" => match &spec.items {
            Some(items) => Schema::Array {
                items: Box::new(parse_at(items, &child_path("[]"), violations)),
            },
            None => Schema::Array {
                items: Box::new(Schema::Any),
            },
        },
        "string" => Schema::String {
            format: spec.format.clone(),
            enumeration: spec.enumeration.clone(),
        },
        "number" => Schema::Number {
            minimum: spec.minimum,
            maximum: spec.maximum,
        },
        "integer" => Schema::Integer {
            minimum: spec.minimum,
            maximum: spec.maximum,
        },
        "boolean" => Schema::Boolean,
        "any" => Schema::Any,
        other => {
            violations.push(Violation::new(
                path,
                ViolationKind::TypeMismatch,
                format!("unknown schema type '{other}'"),
            ));
            Schema::Any
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Segment;

    fn spec(json: serde_json::Value) -> SchemaSpec {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_parse_nested_object() {
        let schema = Schema::parse(&spec(serde_json::json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "scores": { "type": "array", "items": { "type": "number" } }
            },
            "required": ["name"]
        })))
        .unwrap();

        match &schema {
            Schema::Object {
                properties,
                required,
            } => {
                assert!(required.contains("name"));
                assert!(matches!(properties["scores"], Schema::Array { .. }));
            }
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        let err = Schema::parse(&spec(serde_json::json!({ "type": "float" }))).unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err[0].kind, crate::error::ViolationKind::TypeMismatch);
    }

    #[test]
    fn test_parse_rejects_undeclared_required() {
        let err = Schema::parse(&spec(serde_json::json!({
            "type": "object",
            "properties": { "a": { "type": "string" } },
            "required": ["a", "ghost"]
        })))
        .unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(err[0].detail.contains("ghost"));
    }

    #[test]
    fn test_parse_collects_multiple_problems() {
        let err = Schema::parse(&spec(serde_json::json!({
            "type": "object",
            "properties": {
                "a": { "type": "wat" },
                "b": { "type": "integer", "minimum": 9.0, "maximum": 1.0 }
            },
            "required": ["missing"]
        })))
        .unwrap_err();
        assert_eq!(err.len(), 3);
    }

    #[test]
    fn test_walk_object_and_array() {
        let schema = Schema::parse(&spec(serde_json::json!({
            "type": "object",
            "properties": {
                "items": { "type": "array", "items": { "type": "string" } }
            }
        })))
        .unwrap();

        let hit = schema
            .walk(&[Segment::Field("items".into()), Segment::Index(0)])
            .unwrap();
        assert_eq!(hit.kind(), "string");

        assert!(schema.walk(&[Segment::Field("ghost".into())]).is_none());
    }

    #[test]
    fn test_walk_through_any() {
        let schema = Schema::Any;
        let hit = schema
            .walk(&[Segment::Field("anything".into()), Segment::Index(3)])
            .unwrap();
        assert_eq!(hit.kind(), "any");
    }
}
