//! # Flowgate Core
//!
//! The compilation and execution engine for synchronous multi-step HTTP
//! workflows declared as cluster resources.
//!
//! ## Features
//!
//! - **Compile-time wiring checks**: schemas, bindings, and templates are
//!   type-checked against the registry before anything runs
//! - **Parallel waves**: independent invocations execute concurrently
//!   under a semaphore, in dependency order
//! - **Automatic retries**: per-task policies with exponential backoff and
//!   jitter, honoring server retry hints
//! - **Cooperative cancellation**: one token threads through every
//!   component; nothing outlives an execution
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                             │
//! │  (name resolution, compiled-plan cache, entry points)       │
//! └─────────────────────────────────────────────────────────────┘
//!               │ compile                      │ execute
//!               ▼                              ▼
//! ┌──────────────────────────┐   ┌─────────────────────────────┐
//! │       compile             │   │      WorkflowExecutor       │
//! │  (schemas, templates,     │   │  (waves, semaphore,         │
//! │   compatibility, waves)   │   │   cancellation, projection) │
//! └──────────────────────────┘   └─────────────────────────────┘
//!               │                              │
//!               ▼                              ▼
//! ┌──────────────────────────┐   ┌─────────────────────────────┐
//! │  TaskRegistry (consumed)  │   │  HTTP task executor         │
//! │  WorkflowRegistry         │   │  (retry, timeout, HttpClient│
//! │                           │   │   abstraction)              │
//! └──────────────────────────┘   └─────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use flowgate_core::prelude::*;
//!
//! let engine = Engine::new(tasks, workflows, http, ExecuteOptions::default())?;
//! let plan = engine.validate(&workflow)?;          // structured diagnostics
//! let output = engine
//!     .execute("enrich-user", None, input, env, cancel)
//!     .await?;
//! ```

pub mod compile;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod graph;
pub mod http;
pub mod registry;
pub mod retry;
pub mod schema;
pub mod task;
pub mod template;

// In-memory implementations for examples and testing
pub mod memory;

/// Prelude for common imports
pub mod prelude {
    pub use crate::compile::{compile, CompiledPlan, CompiledTask, ResolvedInvocation};
    pub use crate::config::ExecuteOptions;
    pub use crate::engine::Engine;
    pub use crate::error::{
        CancelSource, Diagnostic, ExecutionError, TaskError, ValidationErrors, Violation,
        ViolationKind,
    };
    pub use crate::executor::WorkflowExecutor;
    pub use crate::http::{HttpClient, HttpRequest, HttpResponse, TransportError};
    pub use crate::registry::{TaskRegistry, WorkflowRegistry};
    pub use crate::retry::{FixedJitter, JitterSource, RetryPolicy, ThreadRngJitter};
    pub use crate::schema::{compatible, validate, Schema};
    pub use crate::template::{Template, TemplateParseError};
}

// Re-exports for convenience
pub use compile::{compile, CompiledPlan, ResolvedInvocation};
pub use config::ExecuteOptions;
pub use engine::Engine;
pub use error::{
    CancelSource, Diagnostic, ExecutionError, TaskError, ValidationErrors, Violation,
    ViolationKind,
};
pub use executor::WorkflowExecutor;
pub use http::{HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient, TransportError};
pub use registry::{TaskRegistry, WorkflowRegistry};
pub use retry::{JitterSource, RetryPolicy};
pub use schema::Schema;
pub use template::Template;

// Resource definitions re-exported from the contracts crate
pub use flowgate_contracts::{
    HttpMethod, HttpSpec, Invocation, RetrySpec, SchemaSpec, TaskDefinition, WorkflowDefinition,
};
