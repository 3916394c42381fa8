//! Workflow resource — a composition of task invocations

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::option_duration_str;
use crate::schema::SchemaSpec;
use crate::task::RetrySpec;

/// A Workflow resource as declared in the cluster.
///
/// `tasks` is an ordered sequence of invocations; execution order is
/// derived from the data dependencies between their bindings, not from
/// this order. `output` maps result names to template expressions resolved
/// after the final wave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Opaque version handle from the cluster; compiled plans are cached
    /// per (name, namespace, resourceVersion)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    pub input_schema: SchemaSpec,

    pub tasks: Vec<Invocation>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output: BTreeMap<String, String>,
}

/// A single use of a task within a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    /// Unique within the workflow; referenced by sibling templates as
    /// `{{tasks.<id>.output...}}`
    pub id: String,

    /// Name of the Task resource to invoke
    pub task_ref: String,

    /// Property name to template-expression-or-literal
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input: BTreeMap<String, serde_json::Value>,

    /// Per-attempt timeout override for this invocation
    #[serde(default, with = "option_duration_str", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    /// Retry override for this invocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_manifest_round_trip() {
        let json = serde_json::json!({
            "name": "enrich-user",
            "resourceVersion": "41233",
            "inputSchema": {
                "type": "object",
                "properties": { "email": { "type": "string" } },
                "required": ["email"]
            },
            "tasks": [
                {
                    "id": "lookup",
                    "taskRef": "user-lookup",
                    "input": { "email": "{{input.email}}" }
                },
                {
                    "id": "score",
                    "taskRef": "risk-score",
                    "input": { "userId": "{{tasks.lookup.output.id}}", "weight": 3 },
                    "timeout": "500ms"
                }
            ],
            "output": { "risk": "{{tasks.score.output.value}}" }
        });

        let workflow: WorkflowDefinition = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(workflow.tasks.len(), 2);
        assert_eq!(workflow.tasks[1].timeout, Some(Duration::from_millis(500)));
        assert_eq!(
            workflow.tasks[1].input["weight"],
            serde_json::json!(3)
        );

        let back = serde_json::to_value(&workflow).unwrap();
        assert_eq!(back, json);
    }
}
