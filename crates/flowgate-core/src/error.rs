//! Error taxonomy for compilation and execution
//!
//! Compile-time problems are aggregated: every independent check reports
//! all of its findings, collected into [`ValidationErrors`]. Runtime
//! problems short-circuit: the first task failure in a wave aborts the
//! execution and is reported with its full causal chain.

use thiserror::Error;

/// A single schema violation, produced by validation or schema parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Field path within the offending value, e.g. `user.emails[2]`
    pub path: String,
    pub kind: ViolationKind,
    pub detail: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, kind: ViolationKind, detail: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}: {}", self.kind, self.detail)
        } else {
            write!(f, "{} at '{}': {}", self.kind, self.path, self.detail)
        }
    }
}

/// Closed set of schema violation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    TypeMismatch,
    MissingRequired,
    OutOfRange,
    EnumMismatch,
    FormatMismatch,
    ExtraPropertyInStrict,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ViolationKind::TypeMismatch => "type-mismatch",
            ViolationKind::MissingRequired => "missing-required",
            ViolationKind::OutOfRange => "out-of-range",
            ViolationKind::EnumMismatch => "enum-mismatch",
            ViolationKind::FormatMismatch => "format-mismatch",
            ViolationKind::ExtraPropertyInStrict => "extra-property-in-strict",
        };
        write!(f, "{s}")
    }
}

/// One compile-time finding against a workflow definition
#[derive(Debug, Clone, Error)]
pub enum Diagnostic {
    /// A schema descriptor failed to parse, or a compile-time value failed
    /// validation against one
    #[error("schema invalid in {scope}: {}", render_violations(.violations))]
    SchemaInvalid {
        /// Which schema, e.g. `inputSchema` or `task 'geocode' outputSchema`
        scope: String,
        violations: Vec<Violation>,
    },

    /// A template string failed to parse
    #[error("template parse failed at byte {position} of '{template}': {reason}")]
    TemplateParseFailed {
        template: String,
        position: usize,
        reason: String,
    },

    /// A binding expression's schema is not compatible with the consumer
    /// property's schema
    #[error(
        "binding '{property}' of invocation '{invocation}' expects {expected} but \
         '{path}' yields {got}"
    )]
    BindingMismatch {
        invocation: String,
        property: String,
        expected: String,
        got: String,
        /// The offending expression, e.g. `tasks.a.output.y`
        path: String,
    },

    /// `taskRef` did not resolve in the registry
    #[error(
        "invocation '{invocation}' references unknown task '{task_ref}'{}",
        render_suggestions(.suggestions)
    )]
    UnknownTaskRef {
        invocation: String,
        task_ref: String,
        suggestions: Vec<String>,
    },

    /// A template references a sibling invocation id that does not exist
    #[error(
        "invocation '{invocation}' references unknown invocation '{reference}'{}",
        render_suggestions(.suggestions)
    )]
    UnknownInvocationRef {
        invocation: String,
        reference: String,
        suggestions: Vec<String>,
    },

    /// Two or more invocations share an id
    #[error("duplicate invocation id '{id}' ({occurrences} occurrences)")]
    DuplicateInvocationId { id: String, occurrences: usize },

    /// A required input property of the referenced task has no binding
    #[error("invocation '{invocation}' is missing required binding '{property}'")]
    MissingRequiredBinding { invocation: String, property: String },

    /// A binding key is not a property of the referenced task's input schema
    #[error(
        "invocation '{invocation}' binds unknown property '{property}'{}",
        render_suggestions(.suggestions)
    )]
    UnknownBinding {
        invocation: String,
        property: String,
        suggestions: Vec<String>,
    },

    /// The invocation graph contains a cycle
    #[error("workflow graph contains a cycle: {}", .path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    /// An output-projection expression cannot resolve against the
    /// workflow's input schema and task outputs
    #[error("output projection '{name}' is invalid: {reason}")]
    InvalidProjection { name: String, reason: String },
}

fn render_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn render_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean {}?)", suggestions.join(", "))
    }
}

/// Aggregate of every diagnostic found during workflow validation
#[derive(Debug, Clone, Error)]
#[error(
    "workflow validation failed with {} diagnostic(s): {}",
    .diagnostics.len(),
    .diagnostics.iter().map(|d| d.to_string()).collect::<Vec<_>>().join("; ")
)]
pub struct ValidationErrors {
    pub diagnostics: Vec<Diagnostic>,
}

/// Why an execution was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelSource {
    /// The caller's cancellation signal fired
    Caller,
    /// The overall execution deadline elapsed
    Deadline,
    /// A sibling invocation in the same wave failed
    PeerFailure,
}

impl std::fmt::Display for CancelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelSource::Caller => write!(f, "caller"),
            CancelSource::Deadline => write!(f, "deadline"),
            CancelSource::PeerFailure => write!(f, "peer-failure"),
        }
    }
}

impl std::error::Error for CancelSource {}

/// Terminal cause of a failed task execution, after retries
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// Resolved input object failed the task's input schema
    #[error("task input is invalid: {}", render_violations(.violations))]
    InputInvalid { violations: Vec<Violation> },

    /// Response body failed the task's output schema (never retried)
    #[error("task output is invalid: {}", render_violations(.violations))]
    OutputInvalid { violations: Vec<Violation> },

    /// A template in the URL, headers, body, or bindings failed to resolve
    #[error("failed to materialize request: {reason}")]
    Materialize { reason: String },

    /// Transport-level failure from the HTTP client
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// Non-success HTTP status
    #[error("HTTP status {status}")]
    Status { status: u16 },

    /// A single attempt exceeded its deadline
    #[error("attempt timed out")]
    AttemptTimeout,

    /// The overall execution deadline left no budget for another attempt
    #[error("execution deadline exceeded")]
    DeadlineExceeded,

    /// 2xx response whose body is not valid JSON
    #[error("response body is not valid JSON: {reason}")]
    BodyNotJson { reason: String },

    /// The cancellation signal fired during the attempt
    #[error("cancelled")]
    Cancelled,
}

/// Runtime failure of a workflow execution.
///
/// No partial results accompany any of these; a failed execution returns
/// no outputs.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The runtime input object (or a task's resolved input) failed schema
    /// validation
    #[error("{scope} is invalid: {}", render_violations(.violations))]
    InputInvalid {
        /// `input` for the workflow input, `tasks.<id>.input` for a task's
        scope: String,
        violations: Vec<Violation>,
    },

    /// An invocation failed; peers in its wave were cancelled and later
    /// waves never started
    #[error(
        "invocation '{invocation}' failed in wave {wave} after {attempts} attempt(s): {cause}"
    )]
    TaskFailed {
        invocation: String,
        wave: usize,
        attempts: u32,
        last_status: Option<u16>,
        last_body_excerpt: Option<String>,
        #[source]
        cause: TaskError,
    },

    /// A task's 2xx response body failed its output schema
    #[error("output of invocation '{invocation}' is invalid: {}", render_violations(.violations))]
    OutputInvalid {
        invocation: String,
        violations: Vec<Violation>,
    },

    /// The final projection could not be resolved
    #[error("output projection '{name}' failed: {reason}")]
    OutputProjectionFailed { name: String, reason: String },

    /// The execution was cancelled before completing
    #[error("execution cancelled ({source})")]
    Cancelled { source: CancelSource },

    /// Constructor or per-call options were rejected
    #[error("configuration invalid: {field}: {reason}")]
    ConfigurationInvalid { field: &'static str, reason: String },

    /// The named workflow does not exist in the registry
    #[error("unknown workflow '{name}'")]
    UnknownWorkflow { name: String },

    /// The workflow failed compilation
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// Invariant violation inside the engine (e.g. a panicked invocation
    /// task)
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Up to `limit` candidates closest to `target` by edit distance, closest
/// first. Candidates further than half the target's length are dropped;
/// ties resolve lexicographically so diagnostics stay deterministic.
pub fn suggest<'a>(
    target: &str,
    candidates: impl IntoIterator<Item = &'a str>,
    limit: usize,
) -> Vec<String> {
    let cutoff = (target.len() / 2).max(1);
    let mut scored: Vec<(usize, &str)> = candidates
        .into_iter()
        .filter(|c| *c != target)
        .map(|c| (edit_distance(target, c), c))
        .filter(|(d, _)| *d <= cutoff)
        .collect();
    scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    scored
        .into_iter()
        .take(limit)
        .map(|(_, c)| c.to_string())
        .collect()
}

/// Levenshtein distance over unicode scalar values
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
