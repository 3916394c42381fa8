//! Compile-time workflow validation
//!
//! A staged pass over a Workflow definition: structural checks, binding
//! checks, template parsing, type-compatibility checks, graph construction,
//! and output-projection checks. Every stage reports all of its findings;
//! a later stage is skipped only where its inputs are undefined (e.g. no
//! compatibility check against a task that failed to resolve).
//!
//! The product is a [`CompiledPlan`]: immutable, shareable across
//! concurrent executions, and the only input the orchestrator needs
//! besides runtime data.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use flowgate_contracts::{RetrySpec, TaskDefinition, WorkflowDefinition};

use crate::error::{suggest, Diagnostic, ValidationErrors, Violation, ViolationKind};
use crate::graph;
use crate::registry::TaskRegistry;
use crate::retry::RetryPolicy;
use crate::schema::{compatible, Schema};
use crate::template::{Root, Segment, Template};

const MAX_SUGGESTIONS: usize = 3;

/// A task definition with its schemas parsed and http templates pre-parsed
#[derive(Debug)]
pub struct CompiledTask {
    pub definition: Arc<TaskDefinition>,
    pub input_schema: Schema,
    pub output_schema: Schema,
    pub url: Template,
    pub headers: Vec<(String, Template)>,
    pub body: Option<Template>,
}

/// One invocation of the plan, with bindings pre-parsed and retry/timeout
/// merged (invocation override, then task, then engine default)
#[derive(Debug)]
pub struct ResolvedInvocation {
    pub id: String,
    pub task: Arc<CompiledTask>,
    pub bindings: BTreeMap<String, Template>,
    pub retry: RetryPolicy,
    /// Per-attempt budget
    pub timeout: Option<Duration>,
}

/// The immutable artifact produced by successful validation
#[derive(Debug)]
pub struct CompiledPlan {
    pub workflow_name: String,
    pub namespace: Option<String>,
    pub input_schema: Schema,
    pub invocations: BTreeMap<String, ResolvedInvocation>,
    /// Waves in execution order; together they cover every invocation
    /// exactly once, and every dependency lives in an earlier wave
    pub waves: Vec<Vec<String>>,
    pub output: BTreeMap<String, Template>,
}

/// Validate a workflow against a registry snapshot.
///
/// Pure with respect to the registry snapshot: the same workflow and the
/// same registry contents always produce the same result.
pub fn compile(
    workflow: &WorkflowDefinition,
    registry: &dyn TaskRegistry,
    default_retry: &RetrySpec,
) -> Result<CompiledPlan, ValidationErrors> {
    let mut diags: Vec<Diagnostic> = Vec::new();

    // Stage 1: workflow input schema
    let input_schema = match Schema::parse(&workflow.input_schema) {
        Ok(schema) => Some(schema),
        Err(violations) => {
            diags.push(Diagnostic::SchemaInvalid {
                scope: "inputSchema".to_string(),
                violations,
            });
            None
        }
    };

    // Stage 2: structural checks and task resolution
    let mut occurrences: BTreeMap<&str, usize> = BTreeMap::new();
    for invocation in &workflow.tasks {
        *occurrences.entry(invocation.id.as_str()).or_default() += 1;
    }
    for (id, count) in &occurrences {
        if *count > 1 {
            diags.push(Diagnostic::DuplicateInvocationId {
                id: id.to_string(),
                occurrences: *count,
            });
        }
    }

    let mut invocations: BTreeMap<&str, &flowgate_contracts::Invocation> = BTreeMap::new();
    for invocation in &workflow.tasks {
        invocations.entry(invocation.id.as_str()).or_insert(invocation);
    }
    let invocation_ids: Vec<&str> = invocations.keys().copied().collect();

    // Compile each referenced task once; a failed compile is cached as None
    // so its diagnostics are not repeated per invocation.
    let mut tasks: BTreeMap<&str, Option<Arc<CompiledTask>>> = BTreeMap::new();
    for invocation in invocations.values() {
        let ref_name = invocation.task_ref.as_str();
        match registry.task(ref_name, workflow.namespace.as_deref()) {
            Some(definition) if !ref_name.is_empty() => {
                if !tasks.contains_key(ref_name) {
                    let entry = match compile_task(definition) {
                        Ok(task) => Some(task),
                        Err(task_diags) => {
                            diags.extend(task_diags);
                            None
                        }
                    };
                    tasks.insert(ref_name, entry);
                }
            }
            _ => {
                let names = registry.task_names();
                diags.push(Diagnostic::UnknownTaskRef {
                    invocation: invocation.id.clone(),
                    task_ref: invocation.task_ref.clone(),
                    suggestions: suggest(
                        ref_name,
                        names.iter().map(String::as_str),
                        MAX_SUGGESTIONS,
                    ),
                });
            }
        }
    }

    // Stage 3: binding coverage against the task's input schema
    for (id, invocation) in &invocations {
        let Some(task) = tasks.get(invocation.task_ref.as_str()).and_then(Option::as_ref)
        else {
            continue;
        };
        match &task.input_schema {
            Schema::Object {
                properties,
                required,
            } => {
                for property in invocation.input.keys() {
                    if !properties.contains_key(property) {
                        diags.push(Diagnostic::UnknownBinding {
                            invocation: id.to_string(),
                            property: property.clone(),
                            suggestions: suggest(
                                property,
                                properties.keys().map(String::as_str),
                                MAX_SUGGESTIONS,
                            ),
                        });
                    }
                }
                for property in required {
                    if !invocation.input.contains_key(property) {
                        diags.push(Diagnostic::MissingRequiredBinding {
                            invocation: id.to_string(),
                            property: property.clone(),
                        });
                    }
                }
            }
            Schema::Any => {}
            other => diags.push(Diagnostic::SchemaInvalid {
                scope: format!("task '{}' inputSchema", task.definition.name),
                violations: vec![Violation::new(
                    "",
                    ViolationKind::TypeMismatch,
                    format!("task input schema must be an object, got {}", other.kind()),
                )],
            }),
        }
    }

    // Stage 4: template parsing for every binding
    let mut bindings: BTreeMap<&str, BTreeMap<String, Template>> = BTreeMap::new();
    for (id, invocation) in &invocations {
        let mut parsed = BTreeMap::new();
        for (property, value) in &invocation.input {
            match Template::parse_value(value) {
                Ok(template) => {
                    parsed.insert(property.clone(), template);
                }
                Err(e) => diags.push(Diagnostic::TemplateParseFailed {
                    template: e.template,
                    position: e.position,
                    reason: e.reason,
                }),
            }
        }
        bindings.insert(*id, parsed);
    }

    // Stage 5: type compatibility of each binding expression
    for (id, invocation) in &invocations {
        let Some(task) = tasks.get(invocation.task_ref.as_str()).and_then(Option::as_ref)
        else {
            continue;
        };
        let Schema::Object { properties, .. } = &task.input_schema else {
            continue;
        };
        let Some(parsed) = bindings.get(id) else {
            continue;
        };
        for (property, template) in parsed {
            let Some(consumer) = properties.get(property) else {
                continue;
            };
            let Some((expression, rendered)) = expression_schema(
                template,
                input_schema.as_ref(),
                &invocations,
                &tasks,
                id,
                property,
                consumer,
                &mut diags,
            ) else {
                continue;
            };
            for incompatibility in compatible(&expression, consumer) {
                let path = if incompatibility.path.is_empty() {
                    rendered.clone()
                } else {
                    format!("{rendered} (at {})", incompatibility.path)
                };
                diags.push(Diagnostic::BindingMismatch {
                    invocation: id.to_string(),
                    property: property.clone(),
                    expected: consumer.describe(),
                    got: expression.describe(),
                    path,
                });
            }
        }
    }

    // Stage 6: dependency graph and waves
    let mut deps: BTreeMap<String, BTreeSet<String>> = invocation_ids
        .iter()
        .map(|id| (id.to_string(), BTreeSet::new()))
        .collect();
    let mut unknown_refs: BTreeSet<(String, String)> = BTreeSet::new();
    for (id, parsed) in &bindings {
        for template in parsed.values() {
            for dep in template.task_dependencies() {
                if dep == *id || invocations.contains_key(dep) {
                    deps.get_mut(*id)
                        .expect("every invocation id is a deps key")
                        .insert(dep.to_string());
                } else if unknown_refs.insert((id.to_string(), dep.to_string())) {
                    diags.push(Diagnostic::UnknownInvocationRef {
                        invocation: id.to_string(),
                        reference: dep.to_string(),
                        suggestions: suggest(
                            dep,
                            invocation_ids.iter().copied(),
                            MAX_SUGGESTIONS,
                        ),
                    });
                }
            }
        }
    }
    let waves = match graph::build_waves(&deps) {
        Ok(waves) => waves,
        Err(path) => {
            diags.push(Diagnostic::CycleDetected { path });
            Vec::new()
        }
    };

    // Stage 7: output projection
    let mut output: BTreeMap<String, Template> = BTreeMap::new();
    for (name, source) in &workflow.output {
        match Template::parse_str(source) {
            Err(e) => diags.push(Diagnostic::TemplateParseFailed {
                template: e.template,
                position: e.position,
                reason: e.reason,
            }),
            Ok(template) => {
                for path in template.paths() {
                    if let Some(reason) =
                        projection_problem(path, input_schema.as_ref(), &invocations, &tasks)
                    {
                        diags.push(Diagnostic::InvalidProjection {
                            name: name.clone(),
                            reason,
                        });
                    }
                }
                output.insert(name.clone(), template);
            }
        }
    }

    if !diags.is_empty() {
        return Err(ValidationErrors { diagnostics: diags });
    }

    let input_schema = input_schema.expect("no diagnostics implies the input schema parsed");
    let invocations = invocations
        .into_iter()
        .map(|(id, invocation)| {
            let task = Arc::clone(
                tasks
                    .get(invocation.task_ref.as_str())
                    .and_then(Option::as_ref)
                    .expect("no diagnostics implies every taskRef resolved"),
            );
            let retry_spec = invocation
                .retry
                .as_ref()
                .or(task.definition.retry.as_ref())
                .unwrap_or(default_retry);
            let resolved = ResolvedInvocation {
                id: id.to_string(),
                bindings: bindings.remove(id).unwrap_or_default(),
                retry: RetryPolicy::from(retry_spec),
                timeout: invocation.timeout.or(task.definition.timeout),
                task,
            };
            (id.to_string(), resolved)
        })
        .collect();

    Ok(CompiledPlan {
        workflow_name: workflow.name.clone(),
        namespace: workflow.namespace.clone(),
        input_schema,
        invocations,
        waves,
        output,
    })
}

/// Derive the schema a binding expression yields, along with its rendering
/// for diagnostics. `None` means the check is skipped (missing inputs) or
/// a diagnostic was already pushed.
#[allow(clippy::too_many_arguments)]
fn expression_schema(
    template: &Template,
    input_schema: Option<&Schema>,
    invocations: &BTreeMap<&str, &flowgate_contracts::Invocation>,
    tasks: &BTreeMap<&str, Option<Arc<CompiledTask>>>,
    invocation_id: &str,
    property: &str,
    consumer: &Schema,
    diags: &mut Vec<Diagnostic>,
) -> Option<(Schema, String)> {
    let mismatch = |path: String, got: &str, diags: &mut Vec<Diagnostic>| {
        diags.push(Diagnostic::BindingMismatch {
            invocation: invocation_id.to_string(),
            property: property.to_string(),
            expected: consumer.describe(),
            got: got.to_string(),
            path,
        });
    };

    match template {
        Template::Literal(value) => Some((Schema::of_literal(value), "literal".to_string())),
        Template::Interpolated(_) => Some((
            Schema::String {
                format: None,
                enumeration: None,
            },
            template.to_string(),
        )),
        Template::Path(path) => {
            let rendered = path.to_string();
            match path.root {
                Root::Input => {
                    let schema = input_schema?;
                    match schema.walk(&path.segments) {
                        Some(found) => Some((found, rendered)),
                        None => {
                            mismatch(rendered, "nothing (path not in the workflow input schema)", diags);
                            None
                        }
                    }
                }
                Root::Env => {
                    if path.segments.len() == 1 {
                        Some((
                            Schema::String {
                                format: None,
                                enumeration: None,
                            },
                            rendered,
                        ))
                    } else {
                        mismatch(rendered, "nothing (env values are flat strings)", diags);
                        None
                    }
                }
                Root::Tasks => {
                    // Unknown producer ids are reported by the graph stage.
                    let producer_id = path.task_id()?;
                    let producer = invocations.get(producer_id)?;
                    let task = tasks.get(producer.task_ref.as_str())?.as_ref()?;
                    match path.segments.get(1) {
                        Some(Segment::Field(field)) if field == "output" => {}
                        _ => {
                            mismatch(
                                rendered,
                                "nothing (task references must go through '.output')",
                                diags,
                            );
                            return None;
                        }
                    }
                    match task.output_schema.walk(&path.segments[2..]) {
                        Some(found) => Some((found, rendered)),
                        None => {
                            mismatch(
                                rendered,
                                "nothing (path not in the producer's output schema)",
                                diags,
                            );
                            None
                        }
                    }
                }
            }
        }
    }
}

/// Check that a projection path can resolve in principle.
fn projection_problem(
    path: &crate::template::PathExpr,
    input_schema: Option<&Schema>,
    invocations: &BTreeMap<&str, &flowgate_contracts::Invocation>,
    tasks: &BTreeMap<&str, Option<Arc<CompiledTask>>>,
) -> Option<String> {
    match path.root {
        Root::Input => {
            let schema = input_schema?;
            if schema.walk(&path.segments).is_none() {
                return Some(format!(
                    "'{path}' does not resolve against the workflow input schema"
                ));
            }
            None
        }
        Root::Env => None,
        Root::Tasks => {
            let Some(producer_id) = path.task_id() else {
                return Some(format!("'{path}' does not name an invocation"));
            };
            let Some(producer) = invocations.get(producer_id) else {
                return Some(format!("'{path}' references unknown invocation '{producer_id}'"));
            };
            match path.segments.get(1) {
                Some(Segment::Field(field)) if field == "output" => {}
                _ => return Some(format!("'{path}' must go through '.output'")),
            }
            let Some(task) = tasks.get(producer.task_ref.as_str()).and_then(Option::as_ref)
            else {
                return None;
            };
            if task.output_schema.walk(&path.segments[2..]).is_none() {
                return Some(format!(
                    "'{path}' does not resolve against the output schema of '{producer_id}'"
                ));
            }
            None
        }
    }
}

/// Parse a task definition's schemas and http templates.
fn compile_task(definition: Arc<TaskDefinition>) -> Result<Arc<CompiledTask>, Vec<Diagnostic>> {
    let mut diags: Vec<Diagnostic> = Vec::new();
    let name = definition.name.as_str();

    let input_schema = match Schema::parse(&definition.input_schema) {
        Ok(schema) => Some(schema),
        Err(violations) => {
            diags.push(Diagnostic::SchemaInvalid {
                scope: format!("task '{name}' inputSchema"),
                violations,
            });
            None
        }
    };
    let output_schema = match Schema::parse(&definition.output_schema) {
        Ok(schema) => Some(schema),
        Err(violations) => {
            diags.push(Diagnostic::SchemaInvalid {
                scope: format!("task '{name}' outputSchema"),
                violations,
            });
            None
        }
    };

    let url = http_template(
        &definition.http.url,
        name,
        "http.url",
        input_schema.as_ref(),
        &mut diags,
    );
    let headers: Vec<(String, Option<Template>)> = definition
        .http
        .headers
        .iter()
        .map(|(header, value)| {
            (
                header.clone(),
                http_template(
                    value,
                    name,
                    &format!("http.headers['{header}']"),
                    input_schema.as_ref(),
                    &mut diags,
                ),
            )
        })
        .collect();
    let body = definition.http.body.as_ref().map(|body| {
        http_template(body, name, "http.body", input_schema.as_ref(), &mut diags)
    });

    if !diags.is_empty() {
        return Err(diags);
    }

    Ok(Arc::new(CompiledTask {
        input_schema: input_schema.expect("checked above"),
        output_schema: output_schema.expect("checked above"),
        url: url.expect("checked above"),
        headers: headers
            .into_iter()
            .map(|(header, template)| (header, template.expect("checked above")))
            .collect(),
        body: body.map(|template| template.expect("checked above")),
        definition,
    }))
}

/// Parse one task-level http template. Only `input.*` and `env.*` roots are
/// legal here, and `input.*` paths must resolve against the input schema.
fn http_template(
    source: &str,
    task_name: &str,
    location: &str,
    input_schema: Option<&Schema>,
    diags: &mut Vec<Diagnostic>,
) -> Option<Template> {
    let template = match Template::parse_str(source) {
        Ok(template) => template,
        Err(e) => {
            diags.push(Diagnostic::TemplateParseFailed {
                template: e.template,
                position: e.position,
                reason: format!("in task '{task_name}' {location}: {}", e.reason),
            });
            return None;
        }
    };

    let mut violations = Vec::new();
    for path in template.paths() {
        match path.root {
            Root::Tasks => diags.push(Diagnostic::TemplateParseFailed {
                template: source.to_string(),
                position: 0,
                reason: format!(
                    "in task '{task_name}' {location}: 'tasks' references are not \
                     available at task level"
                ),
            }),
            Root::Input => {
                if let Some(schema) = input_schema {
                    if schema.walk(&path.segments).is_none() {
                        violations.push(Violation::new(
                            path.to_string(),
                            ViolationKind::MissingRequired,
                            "placeholder does not resolve against the task input schema",
                        ));
                    }
                }
            }
            Root::Env => {}
        }
    }
    if !violations.is_empty() {
        diags.push(Diagnostic::SchemaInvalid {
            scope: format!("task '{task_name}' {location}"),
            violations,
        });
        return None;
    }

    Some(template)
}
