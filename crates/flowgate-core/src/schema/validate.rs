//! Value validation against a parsed schema
//!
//! Returns every violation, not just the first, so callers can surface a
//! complete report in one round trip. Objects are open by default: unknown
//! properties pass unless the strict variant is used.

use serde_json::Value;

use crate::error::{Violation, ViolationKind};

use super::Schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strictness {
    Open,
    Strict,
}

/// Validate `value` against `schema`; an empty list means the value
/// conforms. Unknown object properties are allowed.
pub fn validate(value: &Value, schema: &Schema) -> Vec<Violation> {
    let mut violations = Vec::new();
    validate_at(value, schema, "", Strictness::Open, &mut violations);
    violations
}

/// Like [`validate`] but unknown object properties are reported as
/// `extra-property-in-strict`. Used by admission checks, not by the engine.
pub fn validate_strict(value: &Value, schema: &Schema) -> Vec<Violation> {
    let mut violations = Vec::new();
    validate_at(value, schema, "", Strictness::Strict, &mut violations);
    violations
}

fn validate_at(
    value: &Value,
    schema: &Schema,
    path: &str,
    strictness: Strictness,
    out: &mut Vec<Violation>,
) {
    match schema {
        Schema::Any => {}

        Schema::Object {
            properties,
            required,
        } => {
            let Some(map) = value.as_object() else {
                out.push(type_mismatch(path, "object", value));
                return;
            };
            for name in required {
                if !map.contains_key(name) {
                    out.push(Violation::new(
                        path,
                        ViolationKind::MissingRequired,
                        format!("missing required property '{name}'"),
                    ));
                }
            }
            for (name, child) in map {
                let child_path = join(path, name);
                match properties.get(name) {
                    Some(child_schema) => {
                        validate_at(child, child_schema, &child_path, strictness, out)
                    }
                    None => {
                        if strictness == Strictness::Strict {
                            out.push(Violation::new(
                                child_path,
                                ViolationKind::ExtraPropertyInStrict,
                                "property is not declared in the schema",
                            ));
                        }
                    }
                }
            }
        }

        Schema::Array { items } => {
            let Some(elements) = value.as_array() else {
                out.push(type_mismatch(path, "array", value));
                return;
            };
            for (index, element) in elements.iter().enumerate() {
                validate_at(element, items, &format!("{path}[{index}]"), strictness, out);
            }
        }

        Schema::String {
            format,
            enumeration,
        } => {
            let Some(s) = value.as_str() else {
                out.push(type_mismatch(path, "string", value));
                return;
            };
            if let Some(allowed) = enumeration {
                if !allowed.iter().any(|a| a == s) {
                    out.push(Violation::new(
                        path,
                        ViolationKind::EnumMismatch,
                        format!("'{s}' is not one of [{}]", allowed.join(", ")),
                    ));
                }
            }
            if let Some(format) = format {
                if let Some(detail) = check_format(s, format) {
                    out.push(Violation::new(path, ViolationKind::FormatMismatch, detail));
                }
            }
        }

        Schema::Number { minimum, maximum } => {
            let Some(n) = value.as_f64() else {
                out.push(type_mismatch(path, "number", value));
                return;
            };
            check_range(n, *minimum, *maximum, path, out);
        }

        Schema::Integer { minimum, maximum } => {
            let Some(n) = value.as_f64() else {
                out.push(type_mismatch(path, "integer", value));
                return;
            };
            if !value.is_i64() && !value.is_u64() {
                out.push(Violation::new(
                    path,
                    ViolationKind::TypeMismatch,
                    format!("expected integer, got non-integral number {n}"),
                ));
                return;
            }
            check_range(n, *minimum, *maximum, path, out);
        }

        Schema::Boolean => {
            if !value.is_boolean() {
                out.push(type_mismatch(path, "boolean", value));
            }
        }
    }
}

fn check_range(n: f64, minimum: Option<f64>, maximum: Option<f64>, path: &str, out: &mut Vec<Violation>) {
    if let Some(min) = minimum {
        if n < min {
            out.push(Violation::new(
                path,
                ViolationKind::OutOfRange,
                format!("{n} is below minimum {min}"),
            ));
        }
    }
    if let Some(max) = maximum {
        if n > max {
            out.push(Violation::new(
                path,
                ViolationKind::OutOfRange,
                format!("{n} is above maximum {max}"),
            ));
        }
    }
}

/// Best-effort checks for the common string formats; unrecognized format
/// names are treated as annotations and always pass.
fn check_format(s: &str, format: &str) -> Option<String> {
    let ok = match format {
        "email" => match s.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
            }
            None => false,
        },
        "uri" | "url" => s.split_once("://").is_some_and(|(scheme, rest)| {
            !scheme.is_empty()
                && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-')
                && !rest.is_empty()
        }),
        "uuid" => {
            s.len() == 36
                && s.chars().enumerate().all(|(i, c)| match i {
                    8 | 13 | 18 | 23 => c == '-',
                    _ => c.is_ascii_hexdigit(),
                })
        }
        _ => return None,
    };

    if ok {
        None
    } else {
        Some(format!("'{s}' does not match format '{format}'"))
    }
}

fn type_mismatch(path: &str, expected: &str, got: &Value) -> Violation {
    Violation::new(
        path,
        ViolationKind::TypeMismatch,
        format!("expected {expected}, got {}", kind_of(got)),
    )
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_contracts::SchemaSpec;
    use serde_json::json;

    fn schema(spec: serde_json::Value) -> Schema {
        let spec: SchemaSpec = serde_json::from_value(spec).unwrap();
        Schema::parse(&spec).unwrap()
    }

    #[test]
    fn test_valid_object_passes() {
        let s = schema(json!({
            "type": "object",
            "properties": { "x": { "type": "integer" } },
            "required": ["x"]
        }));
        assert!(validate(&json!({ "x": 7 }), &s).is_empty());
    }

    #[test]
    fn test_reports_all_violations() {
        let s = schema(json!({
            "type": "object",
            "properties": {
                "a": { "type": "string" },
                "b": { "type": "integer", "minimum": 0.0 }
            },
            "required": ["a", "b", "c"]
        }));
        let got = validate(&json!({ "a": 1, "b": -5 }), &s);
        // wrong type for a, out-of-range b, missing c
        assert_eq!(got.len(), 3);
    }

    #[test]
    fn test_open_objects_allow_extras() {
        let s = schema(json!({ "type": "object", "properties": {} }));
        assert!(validate(&json!({ "extra": true }), &s).is_empty());
        let strict = validate_strict(&json!({ "extra": true }), &s);
        assert_eq!(strict.len(), 1);
        assert_eq!(
            strict[0].kind,
            crate::error::ViolationKind::ExtraPropertyInStrict
        );
    }

    #[test]
    fn test_integer_rejects_fractional() {
        let s = schema(json!({ "type": "integer" }));
        let got = validate(&json!(1.5), &s);
        assert_eq!(got.len(), 1);
        assert!(got[0].detail.contains("non-integral"));
        assert!(validate(&json!(2), &s).is_empty());
    }

    #[test]
    fn test_enum_mismatch() {
        let s = schema(json!({ "type": "string", "enum": ["red", "green"] }));
        let got = validate(&json!("blue"), &s);
        assert_eq!(got[0].kind, crate::error::ViolationKind::EnumMismatch);
    }

    #[test]
    fn test_email_format() {
        let s = schema(json!({ "type": "string", "format": "email" }));
        assert!(validate(&json!("a@example.com"), &s).is_empty());
        let got = validate(&json!("not-an-email"), &s);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].kind, crate::error::ViolationKind::FormatMismatch);
    }

    #[test]
    fn test_unknown_format_is_annotation() {
        let s = schema(json!({ "type": "string", "format": "hostname" }));
        assert!(validate(&json!("whatever"), &s).is_empty());
    }

    #[test]
    fn test_array_paths_in_violations() {
        let s = schema(json!({ "type": "array", "items": { "type": "string" } }));
        let got = validate(&json!(["ok", 3]), &s);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].path, "[1]");
    }

    #[test]
    fn test_any_accepts_everything() {
        let s = schema(json!({ "type": "any" }));
        for v in [json!(null), json!(1), json!("s"), json!({ "k": [1] })] {
            assert!(validate(&v, &s).is_empty());
        }
    }
}
