//! Workflow Definition Module
//!
//! Data structures for declared step lists, the live run context and the
//! snapshots persisted between steps.
//!
//! # Structure
//!
//! - [`model`]: Step nodes, per-step config and the workflow definition
//! - [`parser`]: YAML parsing and loading
//! - [`validator`]: Structural validation
//! - [`context`]: Mutable run state shared across parallel branches
//! - [`interpolation`]: `{{expression}}` substitution
//! - [`state`]: Persisted step snapshots

pub mod context;
pub mod interpolation;
pub mod model;
pub mod parser;
pub mod state;
pub mod validator;

pub use context::{Role, RunContext, TranscriptEntry};
pub use interpolation::interpolate;
pub use model::{AssignmentTarget, StepConfig, StepNode, Workflow};
pub use parser::load_workflow;
pub use state::StateSnapshot;
