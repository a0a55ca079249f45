//! Run Context
//!
//! Mutable state threaded through one workflow run: the output mapping,
//! the model transcript and the finalized-output accumulator. Parallel
//! branches of the same run share one context, so every mutable part sits
//! behind its own lock.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::interpolation::Bindings;
use super::model::Workflow;
use super::state::StateSnapshot;
use crate::execution::client::ChatClient;
use crate::resources::{Resource, ResourceKind};

/// Step name to result, in completion order.
pub type OutputMap = IndexMap<String, Value>;

/// Speaker of a transcript turn.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            Self::User => f.write_str("user"),
            Self::Assistant => f.write_str("assistant"),
        }
    }
}

/// One role-tagged turn of the transcript.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
}

impl TranscriptEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// State owned by a single workflow run.
pub struct RunContext {
    workflow_name: String,
    workflow_path: PathBuf,
    context_path: PathBuf,
    target: Option<String>,
    resource: Option<Resource>,
    session_name: Option<String>,
    working_dir: Option<PathBuf>,
    tools: Vec<String>,
    client: Arc<dyn ChatClient>,
    session_timestamp: Mutex<Option<String>>,
    output: Mutex<OutputMap>,
    transcript: Mutex<Vec<TranscriptEntry>>,
    final_output: Mutex<Vec<String>>,
    executed: Mutex<Vec<String>>,
}

impl RunContext {
    /// Creates a fresh context for running `workflow` against `target`.
    ///
    /// Durable sessions are enabled unless the workflow disables them.
    pub fn new(workflow: &Workflow, target: Option<String>, client: Arc<dyn ChatClient>) -> Self {
        let resource = target
            .as_deref()
            .map(|t| Resource::for_target(Some(t)));
        let session_name = workflow
            .save_state
            .then(|| workflow.session_name().to_string());

        Self {
            workflow_name: workflow.name.clone(),
            workflow_path: workflow.path.clone(),
            context_path: workflow.context_path().to_path_buf(),
            target,
            resource,
            session_name,
            working_dir: None,
            tools: workflow.tools.clone(),
            client,
            session_timestamp: Mutex::new(None),
            output: Mutex::new(OutputMap::new()),
            transcript: Mutex::new(Vec::new()),
            final_output: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Sets the directory shell commands and scripts run in.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Overrides the session name (`None` disables durable sessions).
    pub fn with_session_name(mut self, name: Option<String>) -> Self {
        self.session_name = name;
        self
    }

    pub fn workflow_name(&self) -> &str {
        &self.workflow_name
    }

    /// Directory of the workflow file; step lookups start here.
    pub fn context_path(&self) -> &Path {
        &self.context_path
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn resource(&self) -> Option<&Resource> {
        self.resource.as_ref()
    }

    /// Kind tag for step events.
    pub fn resource_kind(&self) -> ResourceKind {
        self.resource
            .as_ref()
            .map(|r| r.kind)
            .unwrap_or(ResourceKind::None)
    }

    /// True when a structured resource is bound to the run.
    pub fn has_resource(&self) -> bool {
        self.resource_kind() != ResourceKind::None
    }

    pub fn session_name(&self) -> Option<&str> {
        self.session_name.as_deref()
    }

    /// Path hashed into the session identity: the target, or the
    /// workflow file for targetless runs.
    pub fn session_target(&self) -> String {
        self.target
            .clone()
            .unwrap_or_else(|| self.workflow_path.display().to_string())
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn tools(&self) -> &[String] {
        &self.tools
    }

    pub fn client(&self) -> &dyn ChatClient {
        self.client.as_ref()
    }

    pub fn session_timestamp(&self) -> Option<String> {
        self.session_timestamp.lock().clone()
    }

    pub fn set_session_timestamp(&self, timestamp: impl Into<String>) {
        *self.session_timestamp.lock() = Some(timestamp.into());
    }

    /// Returns the existing session timestamp or stores one from `mint`.
    pub fn session_timestamp_or_insert_with(&self, mint: impl FnOnce() -> String) -> String {
        self.session_timestamp.lock().get_or_insert_with(mint).clone()
    }

    /// Binds a result in the output mapping.
    ///
    /// A reused name overwrites the earlier value in its original position.
    pub fn set_output(&self, name: impl Into<String>, value: Value) {
        self.output.lock().insert(name.into(), value);
    }

    pub fn output_value(&self, name: &str) -> Option<Value> {
        self.output.lock().get(name).cloned()
    }

    /// Copy of the output mapping.
    pub fn output(&self) -> OutputMap {
        self.output.lock().clone()
    }

    pub fn push_transcript(&self, entry: TranscriptEntry) {
        self.transcript.lock().push(entry);
    }

    /// Copy of the transcript.
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript.lock().clone()
    }

    pub fn append_final_output(&self, block: impl Into<String>) {
        self.final_output.lock().push(block.into());
    }

    /// Copy of the accumulated output blocks.
    pub fn final_output_blocks(&self) -> Vec<String> {
        self.final_output.lock().clone()
    }

    /// Accumulated output blocks joined into the run's report.
    pub fn final_output(&self) -> String {
        self.final_output.lock().join("\n")
    }

    /// Records a resolved step in execution order.
    pub fn record_executed(&self, name: impl Into<String>) {
        self.executed.lock().push(name.into());
    }

    pub fn executed_steps(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    /// Replaces output, transcript, accumulator and execution order with
    /// the contents of a snapshot.
    pub fn restore(&self, snapshot: &StateSnapshot) {
        *self.output.lock() = snapshot.output.clone();
        *self.transcript.lock() = snapshot.transcript.clone();
        *self.final_output.lock() = snapshot.final_output.clone();
        *self.executed.lock() = snapshot.execution_order.clone();
    }

    /// Captures the current context as the snapshot for `step_name`.
    ///
    /// The sequence order is assigned by the snapshot writer.
    pub fn snapshot(&self, step_name: &str) -> StateSnapshot {
        StateSnapshot {
            step_name: step_name.to_string(),
            order: 0,
            transcript: self.transcript(),
            output: self.output(),
            final_output: self.final_output_blocks(),
            execution_order: self.executed_steps(),
        }
    }
}

impl Bindings for RunContext {
    fn binding(&self, name: &str) -> Option<Value> {
        match name {
            "output" => Some(Value::Object(self.output().into_iter().collect())),
            "file" | "target" => self.target.clone().map(Value::String),
            "workflow_name" | "name" => Some(Value::String(self.workflow_name.clone())),
            "session_name" => self.session_name.clone().map(Value::String),
            "session_timestamp" => self.session_timestamp().map(Value::String),
            "context_path" => Some(Value::String(self.context_path.display().to_string())),
            "final_output" => Some(Value::String(self.final_output())),
            "resource" => Some(json!({
                "kind": self.resource_kind().to_string(),
                "target": self.target.clone(),
            })),
            "transcript" => serde_json::to_value(self.transcript()).ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::client::UnconfiguredClient;
    use crate::workflow::interpolation::interpolate;
    use crate::workflow::model::StepNode;
    use std::thread;

    fn context() -> RunContext {
        let workflow = Workflow::from_steps(
            "/tmp/wf/workflow.yml",
            vec![StepNode::Named("a".to_string())],
        );
        RunContext::new(&workflow, None, Arc::new(UnconfiguredClient))
    }

    #[test]
    fn test_new_context_defaults() {
        let ctx = context();
        assert_eq!(ctx.workflow_name(), "workflow");
        assert_eq!(ctx.session_name(), Some("workflow"));
        assert_eq!(ctx.resource_kind(), ResourceKind::None);
        assert!(!ctx.has_resource());
        assert_eq!(ctx.session_target(), "/tmp/wf/workflow.yml");
        assert!(ctx.output().is_empty());
    }

    #[test]
    fn test_set_output_overwrites_in_place() {
        let ctx = context();
        ctx.set_output("a", json!(1));
        ctx.set_output("b", json!(2));
        ctx.set_output("a", json!(3));

        let keys: Vec<_> = ctx.output().keys().cloned().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(ctx.output_value("a"), Some(json!(3)));
    }

    #[test]
    fn test_final_output_joined() {
        let ctx = context();
        ctx.append_final_output("one");
        ctx.append_final_output("two");
        assert_eq!(ctx.final_output(), "one\ntwo");
    }

    #[test]
    fn test_snapshot_and_restore() {
        let ctx = context();
        ctx.set_output("a", json!("x"));
        ctx.push_transcript(TranscriptEntry::new(Role::User, "hi"));
        ctx.append_final_output("block");
        ctx.record_executed("a");

        let snapshot = ctx.snapshot("a");

        let fresh = context();
        fresh.restore(&snapshot);
        assert_eq!(fresh.output(), ctx.output());
        assert_eq!(fresh.transcript(), ctx.transcript());
        assert_eq!(fresh.final_output_blocks(), vec!["block"]);
        assert_eq!(fresh.executed_steps(), vec!["a"]);
    }

    #[test]
    fn test_session_timestamp_minted_once() {
        let ctx = context();
        let first = ctx.session_timestamp_or_insert_with(|| "20240101_000000_000".to_string());
        let second = ctx.session_timestamp_or_insert_with(|| "20990101_000000_000".to_string());
        assert_eq!(first, second);
    }

    #[test]
    fn test_concurrent_writes_not_lost() {
        let ctx = context();
        thread::scope(|s| {
            for i in 0..8 {
                let ctx = &ctx;
                s.spawn(move || ctx.set_output(format!("k{}", i), json!(i)));
            }
        });
        assert_eq!(ctx.output().len(), 8);
    }

    #[test]
    fn test_bindings_for_interpolation() {
        let ctx = context();
        ctx.set_output("summary", json!("done"));
        assert_eq!(
            interpolate("{{workflow_name}}: {{output.summary}} ({{resource.kind}})", &ctx),
            "workflow: done (none)"
        );
    }
}
