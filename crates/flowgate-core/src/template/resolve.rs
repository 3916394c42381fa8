//! Template resolution against a live execution context

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use super::{PathExpr, Piece, Root, Segment, Template};

/// Read-only view of the data a template may reference
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    /// Workflow input, already validated
    pub input: &'a Value,
    /// Environment snapshot captured at execution start
    pub env: &'a BTreeMap<String, String>,
    /// Outputs of completed invocations, keyed by invocation id
    pub outputs: &'a BTreeMap<String, Value>,
}

/// Resolution failure; paths are rendered in source syntax
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// A segment has no value: absent field, out-of-bounds index, or a
    /// traversal into a non-container
    #[error("missing field '{path}'")]
    MissingField { path: String },

    /// An intermediate segment resolved to null; never silently returned
    #[error("null value at '{path}'")]
    NullIntermediate { path: String },
}

/// Resolve a template. Pure-interpolation templates return the referenced
/// value as-is; mixed templates stringify each placeholder canonically.
pub fn resolve(template: &Template, ctx: &ResolveContext<'_>) -> Result<Value, ResolveError> {
    match template {
        Template::Literal(value) => Ok(value.clone()),
        Template::Path(path) => resolve_path(path, ctx),
        Template::Interpolated(pieces) => {
            let mut out = String::new();
            for piece in pieces {
                match piece {
                    Piece::Text(text) => out.push_str(text),
                    Piece::Path(path) => {
                        let value = resolve_path(path, ctx)?;
                        out.push_str(&canonical_string(&value));
                    }
                }
            }
            Ok(Value::String(out))
        }
    }
}

/// Canonical encoding for placeholder values inside mixed templates:
/// strings without surrounding quotes, everything else as compact JSON.
pub fn canonical_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn resolve_path(path: &PathExpr, ctx: &ResolveContext<'_>) -> Result<Value, ResolveError> {
    match path.root {
        Root::Input => walk(ctx.input, &path.segments, Root::Input.as_str().to_string()),

        Root::Env => match path.segments.split_first() {
            None => Ok(Value::Object(
                ctx.env
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            )),
            Some((Segment::Field(name), rest)) => {
                let rendered = format!("env.{name}");
                let value = ctx
                    .env
                    .get(name)
                    .ok_or_else(|| ResolveError::MissingField {
                        path: rendered.clone(),
                    })?;
                // Env values are plain strings; anything deeper is absent.
                if let Some(extra) = rest.first() {
                    return Err(ResolveError::MissingField {
                        path: append(&rendered, extra),
                    });
                }
                Ok(Value::String(value.clone()))
            }
            Some((Segment::Index(i), _)) => Err(ResolveError::MissingField {
                path: format!("env[{i}]"),
            }),
        },

        Root::Tasks => {
            let mut segments = path.segments.iter();
            let Some(Segment::Field(id)) = segments.next() else {
                return Err(ResolveError::MissingField {
                    path: "tasks".to_string(),
                });
            };
            let rendered = format!("tasks.{id}");
            let output = ctx
                .outputs
                .get(id)
                .ok_or_else(|| ResolveError::MissingField {
                    path: rendered.clone(),
                })?;
            match segments.next() {
                Some(Segment::Field(field)) if field == "output" => {}
                _ => {
                    return Err(ResolveError::MissingField {
                        path: format!("{rendered}.output"),
                    })
                }
            }
            walk(
                output,
                &path.segments[2..],
                format!("{rendered}.output"),
            )
        }
    }
}

fn walk(value: &Value, segments: &[Segment], mut rendered: String) -> Result<Value, ResolveError> {
    let mut current = value;
    for segment in segments {
        if current.is_null() {
            return Err(ResolveError::NullIntermediate { path: rendered });
        }
        rendered = append(&rendered, segment);
        current = match segment {
            Segment::Field(name) => current.as_object().and_then(|map| map.get(name)),
            Segment::Index(i) => current.as_array().and_then(|items| items.get(*i)),
        }
        .ok_or_else(|| ResolveError::MissingField {
            path: rendered.clone(),
        })?;
    }
    Ok(current.clone())
}

fn append(rendered: &str, segment: &Segment) -> String {
    match segment {
        Segment::Field(name) => format!("{rendered}.{name}"),
        Segment::Index(i) => format!("{rendered}[{i}]"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx<'a>(
        input: &'a Value,
        env: &'a BTreeMap<String, String>,
        outputs: &'a BTreeMap<String, Value>,
    ) -> ResolveContext<'a> {
        ResolveContext {
            input,
            env,
            outputs,
        }
    }

    #[test]
    fn test_pure_path_preserves_type() {
        let input = json!({ "n": 7, "flags": [true, false] });
        let env = BTreeMap::new();
        let outputs = BTreeMap::new();
        let c = ctx(&input, &env, &outputs);

        let t = Template::parse_str("{{input.n}}").unwrap();
        assert_eq!(resolve(&t, &c).unwrap(), json!(7));

        let t = Template::parse_str("{{input.flags[1]}}").unwrap();
        assert_eq!(resolve(&t, &c).unwrap(), json!(false));
    }

    #[test]
    fn test_mixed_template_stringifies_canonically() {
        let input = json!({ "n": 7, "ok": true, "name": "ada", "nil": null });
        let env = BTreeMap::new();
        let outputs = BTreeMap::new();
        let c = ctx(&input, &env, &outputs);

        let t = Template::parse_str(
            "n={{input.n}} ok={{input.ok}} name={{input.name}} nil={{input.nil}}",
        )
        .unwrap();
        assert_eq!(
            resolve(&t, &c).unwrap(),
            json!("n=7 ok=true name=ada nil=null")
        );
    }

    #[test]
    fn test_task_output_resolution() {
        let input = json!({});
        let env = BTreeMap::new();
        let mut outputs = BTreeMap::new();
        outputs.insert("geo".to_string(), json!({ "lat": 52.5, "tags": ["a"] }));
        let c = ctx(&input, &env, &outputs);

        let t = Template::parse_str("{{tasks.geo.output.lat}}").unwrap();
        assert_eq!(resolve(&t, &c).unwrap(), json!(52.5));

        let t = Template::parse_str("{{tasks.geo.output.tags[0]}}").unwrap();
        assert_eq!(resolve(&t, &c).unwrap(), json!("a"));
    }

    #[test]
    fn test_env_lookup() {
        let input = json!({});
        let mut env = BTreeMap::new();
        env.insert("REGION".to_string(), "eu-west".to_string());
        let outputs = BTreeMap::new();
        let c = ctx(&input, &env, &outputs);

        let t = Template::parse_str("{{env.REGION}}").unwrap();
        assert_eq!(resolve(&t, &c).unwrap(), json!("eu-west"));

        let t = Template::parse_str("{{env.MISSING}}").unwrap();
        assert_eq!(
            resolve(&t, &c).unwrap_err(),
            ResolveError::MissingField {
                path: "env.MISSING".to_string()
            }
        );
    }

    #[test]
    fn test_missing_field_and_out_of_bounds() {
        let input = json!({ "items": [1] });
        let env = BTreeMap::new();
        let outputs = BTreeMap::new();
        let c = ctx(&input, &env, &outputs);

        let t = Template::parse_str("{{input.ghost}}").unwrap();
        assert!(matches!(
            resolve(&t, &c),
            Err(ResolveError::MissingField { path }) if path == "input.ghost"
        ));

        let t = Template::parse_str("{{input.items[9]}}").unwrap();
        assert!(matches!(
            resolve(&t, &c),
            Err(ResolveError::MissingField { path }) if path == "input.items[9]"
        ));
    }

    #[test]
    fn test_null_intermediate_is_error() {
        let input = json!({ "user": null });
        let env = BTreeMap::new();
        let outputs = BTreeMap::new();
        let c = ctx(&input, &env, &outputs);

        let t = Template::parse_str("{{input.user.name}}").unwrap();
        assert!(matches!(
            resolve(&t, &c),
            Err(ResolveError::NullIntermediate { path }) if path == "input.user"
        ));
    }

    #[test]
    fn test_unknown_invocation_output() {
        let input = json!({});
        let env = BTreeMap::new();
        let outputs = BTreeMap::new();
        let c = ctx(&input, &env, &outputs);

        let t = Template::parse_str("{{tasks.ghost.output.x}}").unwrap();
        assert!(matches!(
            resolve(&t, &c),
            Err(ResolveError::MissingField { path }) if path == "tasks.ghost"
        ));
    }
}
