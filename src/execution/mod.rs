//! Step Execution Module
//!
//! Evaluates declared steps: resolves names to executables, runs shell
//! commands and model prompts, and fans out parallel groups.
//!
//! # Architecture
//!
//! - [`engine`]: Step-list evaluation and whole-run driver
//! - [`resolver`]: Maps step names to executables
//! - [`steps`]: Prompt, sidecar and scripted executables
//! - [`step`]: Shell command and glob helpers
//! - [`prompt_loader`]: Sidecar prompt discovery
//! - [`client`]: Language-model collaborator

pub mod client;
pub mod engine;
pub mod prompt_loader;
pub mod resolver;
pub mod step;
pub mod steps;

pub use client::{ChatClient, CommandChatClient};
pub use engine::{RunOutcome, WorkflowExecutor, WorkflowRunner};
pub use resolver::StepResolver;
pub use steps::StepExecutable;
