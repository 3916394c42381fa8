//! Declarative schema descriptor embedded in Task and Workflow manifests
//!
//! A small subset of JSON Schema: primitive types, nested objects with
//! required-property lists, arrays with element schemas, string formats and
//! enums, numeric ranges. The engine parses this descriptor into its own
//! immutable model; this type is just the manifest-facing shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Raw schema descriptor as written in a manifest.
///
/// `type` defaults to `any` when absent. Which combinations of fields are
/// meaningful for which type (e.g. `items` only under `array`) is enforced
/// by the engine parser, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSpec {
    /// One of `object`, `array`, `string`, `number`, `integer`, `boolean`, `any`
    #[serde(rename = "type", default = "default_type")]
    pub kind: String,

    /// Property schemas for `object`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, SchemaSpec>,

    /// Property names that must be present; each must also appear in `properties`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,

    /// Element schema for `array`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<SchemaSpec>>,

    /// Allowed values for `string`
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enumeration: Option<Vec<String>>,

    /// Format hint for `string` (e.g. `email`, `uri`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Inclusive lower bound for `number`/`integer`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    /// Inclusive upper bound for `number`/`integer`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
}

fn default_type() -> String {
    "any".to_string()
}

impl Default for SchemaSpec {
    fn default() -> Self {
        Self {
            kind: default_type(),
            properties: BTreeMap::new(),
            required: Vec::new(),
            items: None,
            enumeration: None,
            format: None,
            minimum: None,
            maximum: None,
        }
    }
}

impl SchemaSpec {
    /// Shorthand for a typed leaf schema with no constraints.
    pub fn of_type(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// Shorthand for an object schema.
    pub fn object(
        properties: impl IntoIterator<Item = (String, SchemaSpec)>,
        required: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            kind: "object".to_string(),
            properties: properties.into_iter().collect(),
            required: required.into_iter().collect(),
            ..Self::default()
        }
    }
}
