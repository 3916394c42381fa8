// Public contracts for Flowgate resources
// This crate defines the Task and Workflow resource kinds exactly as they
// appear in cluster manifests, plus the schema descriptor and duration
// string formats they embed. No engine logic lives here.

pub mod duration;
pub mod schema;
pub mod task;
pub mod workflow;

pub use duration::{format_duration, parse_duration, DurationParseError};
pub use schema::SchemaSpec;
pub use task::{HttpMethod, HttpSpec, RetrySpec, TaskDefinition};
pub use workflow::{Invocation, WorkflowDefinition};
