//! Workflow Data Model
//!
//! Core data structures representing a declared step list and the
//! per-step configuration table.
//!
//! # Example YAML Format
//!
//! ```yaml
//! name: review
//! model: anthropic:claude-3-7-sonnet
//! target: src/lib.rs
//! steps:
//!   - $(git diff --stat)
//!   - summary: summarize_changes
//!   - - lint_findings
//!     - test_findings
//!   - Write a short verdict for {{output.summary}}
//!
//! summarize_changes:
//!   print_response: true
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;

use crate::error::{Result, WorkflowError};

/// Model used when neither the step nor the workflow names one.
pub const DEFAULT_MODEL: &str = "anthropic:claude-3-7-sonnet";

/// One declared unit of work.
///
/// Built once from the raw YAML value so the executor dispatches on a
/// closed set of shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum StepNode {
    /// Inline shell command written `$(...)`.
    Command(String),
    /// Filesystem glob expanded to a newline-joined path list.
    Glob(String),
    /// Bare name resolved to a scripted unit, sidecar step or prompt.
    Named(String),
    /// Binds the result of `target` to `name` in the output mapping.
    Assignment {
        name: String,
        target: AssignmentTarget,
    },
    /// Children run concurrently; the group completes when all do.
    Parallel(Vec<StepNode>),
}

/// Right-hand side of an assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentTarget {
    /// A leaf step whose result is bound to the variable.
    Step(String),
    /// Structural grouping only: the nested steps run in order and
    /// nothing is bound at this level.
    Nested(Vec<StepNode>),
}

impl StepNode {
    /// Classifies a string step.
    pub fn from_text(text: &str) -> Self {
        if text.starts_with("$(") {
            Self::Command(text.to_string())
        } else if text.contains('*') && !text.trim().contains(char::is_whitespace) {
            Self::Glob(text.to_string())
        } else {
            Self::Named(text.to_string())
        }
    }

    /// Converts a raw YAML step value into a step node.
    ///
    /// Strings become leaves, single-key mappings become assignments and
    /// sequences become parallel groups. Anything else is rejected.
    pub fn from_yaml(value: &YamlValue) -> Result<Self> {
        match value {
            YamlValue::String(text) => Ok(Self::from_text(text)),
            YamlValue::Mapping(map) => {
                if map.len() != 1 {
                    return Err(WorkflowError::InvalidStep(format!(
                        "mapping steps must have exactly one key, found {}",
                        map.len()
                    )));
                }
                let Some((key, inner)) = map.iter().next() else {
                    return Err(WorkflowError::InvalidStep("empty mapping".to_string()));
                };
                let name = key
                    .as_str()
                    .ok_or_else(|| WorkflowError::InvalidStep(format!("{:?}", key)))?
                    .to_string();

                let target = match inner {
                    YamlValue::String(text) => AssignmentTarget::Step(text.clone()),
                    YamlValue::Mapping(_) => AssignmentTarget::Nested(vec![Self::from_yaml(inner)?]),
                    YamlValue::Sequence(items) => AssignmentTarget::Nested(
                        items.iter().map(Self::from_yaml).collect::<Result<_>>()?,
                    ),
                    other => return Err(WorkflowError::InvalidStep(format!("{:?}", other))),
                };

                Ok(Self::Assignment { name, target })
            }
            YamlValue::Sequence(items) => Ok(Self::Parallel(
                items.iter().map(Self::from_yaml).collect::<Result<_>>()?,
            )),
            other => Err(WorkflowError::InvalidStep(format!("{:?}", other))),
        }
    }

    /// Name used to address this node in replay requests.
    ///
    /// Leaves are addressed by their text and assignments by their
    /// variable name. Parallel groups have no single name.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Command(text) | Self::Glob(text) | Self::Named(text) => Some(text),
            Self::Assignment { name, .. } => Some(name),
            Self::Parallel(_) => None,
        }
    }

    /// Returns true if this node, or a direct child of a parallel group,
    /// is addressed by `target`.
    pub fn matches(&self, target: &str) -> bool {
        match self {
            Self::Parallel(children) => children.iter().any(|child| child.name() == Some(target)),
            _ => self.name() == Some(target),
        }
    }
}

/// Optional per-step overrides from the workflow's config table.
///
/// Only fields that are explicitly set are applied.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StepConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub print_response: Option<bool>,

    #[serde(default, rename = "loop", skip_serializing_if = "Option::is_none")]
    pub looping: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<IndexMap<String, serde_json::Value>>,
}

/// A complete workflow definition.
#[derive(Debug, Clone)]
pub struct Workflow {
    /// Workflow name (defaults to the file stem)
    pub name: String,

    /// Path to the workflow file
    pub path: PathBuf,

    /// Declared step list
    pub steps: Vec<StepNode>,

    /// Workflow-wide default model
    pub model: Option<String>,

    /// Target the workflow runs against
    pub target: Option<String>,

    /// Shell command whose output lines are each a target
    pub each: Option<String>,

    /// Tool names forwarded to the model client
    pub tools: Vec<String>,

    /// Session name for durable state (defaults to `name`)
    pub session_name: Option<String>,

    /// Whether snapshots are written after each step
    pub save_state: bool,

    /// Per-step config table keyed by step name
    pub step_configs: HashMap<String, StepConfig>,
}

impl Workflow {
    /// Creates a workflow from a list of steps, rooted at `path`.
    pub fn from_steps(path: impl Into<PathBuf>, steps: Vec<StepNode>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("workflow")
            .to_string();

        Self {
            name,
            path,
            steps,
            model: None,
            target: None,
            each: None,
            tools: Vec::new(),
            session_name: None,
            save_state: true,
            step_configs: HashMap::new(),
        }
    }

    /// Directory the workflow file lives in; step lookups start here.
    pub fn context_path(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Config table entry for a step, if any.
    pub fn step_config(&self, step_name: &str) -> Option<&StepConfig> {
        self.step_configs.get(step_name)
    }

    /// Session name used for durable state.
    pub fn session_name(&self) -> &str {
        self.session_name.as_deref().unwrap_or(&self.name)
    }

    /// Finds the position of a step in the declared list.
    ///
    /// Matches bare strings, assignment variable names, and membership
    /// inside a parallel group (returning the group's index).
    pub fn find_step_index(&self, target: &str) -> Option<usize> {
        find_step_index(&self.steps, target)
    }

    /// Returns the number of top-level steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the workflow has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Finds the top-level index of `target` in `steps`.
pub fn find_step_index(steps: &[StepNode], target: &str) -> Option<usize> {
    steps.iter().position(|step| step.matches(target))
}
