//! Stepwright - Step Execution Engine
//!
//! Runs declarative step lists against a target: shell commands,
//! natural-language prompts sent to a language model, and reusable
//! scripted units. Outputs accumulate in a shared run context, and a
//! snapshot is written after every named step so a run can be replayed
//! from any point.
//!
//! # Architecture
//!
//! - [`workflow`]: Step list model, parsing, run context and interpolation
//! - [`execution`]: Step resolution, execution and the run driver
//! - [`session`]: Snapshot persistence and replay
//! - [`monitoring`]: Step events and execution timeline
//! - [`resources`]: Target kind detection
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stepwright::execution::{CommandChatClient, WorkflowRunner};
//! use stepwright::session::{FileStateRepository, ReplayTarget, SessionManager};
//! use stepwright::load_workflow;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let workflow = load_workflow("review/workflow.yml")?;
//!     let client = Arc::new(CommandChatClient::new("./ask-model"));
//!     let repository = Arc::new(FileStateRepository::new(SessionManager::in_current_dir()));
//!
//!     let mut runner = WorkflowRunner::new(workflow, client, repository);
//!     runner.set_target("src/lib.rs");
//!
//!     // Resume from the snapshot taken before `summarize`
//!     let replay = ReplayTarget::parse("summarize")?;
//!     runner.run(Some(&replay))?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod execution;
pub mod monitoring;
pub mod resources;
pub mod session;
pub mod workflow;

// Re-export commonly used types
pub use error::{Result, WorkflowError};
pub use execution::{WorkflowExecutor, WorkflowRunner};
pub use workflow::model::{StepNode, Workflow};
pub use workflow::parser::load_workflow;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Stepwright";
