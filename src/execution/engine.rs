//! Workflow Execution Engine
//!
//! Walks a declared step list and evaluates each node:
//! - Shell commands and globs run inline
//! - Named steps go through the resolver and are snapshotted
//! - Assignments bind results to variables
//! - Parallel groups fan out to one OS thread per child
//!
//! [`WorkflowRunner`] drives whole runs on top of this: target
//! expansion, replay, the workflow system prompt and the final report.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use log::{debug, error, info, warn};
use serde_json::Value;

use super::client::ChatClient;
use super::prompt_loader::find_prompt_path;
use super::resolver::StepResolver;
use super::step::{expand_glob, run_command_step};
use crate::error::{Result, WorkflowError};
use crate::monitoring::{EventSink, LogSink, StepEvent};
use crate::session::{plan_replay, ReplayTarget, StateRepository};
use crate::workflow::context::{Role, RunContext, TranscriptEntry};
use crate::workflow::interpolation::{interpolate, value_to_text};
use crate::workflow::model::{AssignmentTarget, StepNode, Workflow};

/// Evaluates step nodes against one run context.
pub struct WorkflowExecutor {
    workflow: Arc<Workflow>,
    context: Arc<RunContext>,
    resolver: StepResolver,
    repository: Arc<dyn StateRepository>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl WorkflowExecutor {
    pub fn new(
        workflow: Arc<Workflow>,
        context: Arc<RunContext>,
        repository: Arc<dyn StateRepository>,
    ) -> Self {
        let resolver = StepResolver::new(Arc::clone(&workflow), Arc::clone(&context));
        Self {
            workflow,
            context,
            resolver,
            repository,
            sinks: vec![Arc::new(LogSink)],
        }
    }

    /// Adds a receiver for step events.
    pub fn add_event_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.context
    }

    /// Runs the workflow's step list, resuming at `replay` if given.
    ///
    /// Returns the finalized output, which is also saved to the session.
    pub fn run(&self, replay: Option<&ReplayTarget>) -> Result<String> {
        self.push_workflow_prompt()?;

        let start = match replay {
            Some(target) => plan_replay(
                &self.workflow.steps,
                target,
                &self.context,
                self.repository.as_ref(),
            )?,
            None => 0,
        };
        if start > 0 {
            info!("Skipping {} completed steps", start);
        }

        self.execute_steps(&self.workflow.steps[start..])?;

        let final_output = self.context.final_output();
        self.repository.save_final_output(&self.context, &final_output);
        Ok(final_output)
    }

    /// Executes nodes in declared order, stopping at the first failure.
    pub fn execute_steps(&self, steps: &[StepNode]) -> Result<()> {
        for step in steps {
            match step {
                StepNode::Command(text) | StepNode::Glob(text) | StepNode::Named(text) => {
                    let name = self.interpolate(text);
                    self.execute_step(&name)?;
                }
                StepNode::Assignment { name, target } => self.execute_assignment(name, target)?,
                StepNode::Parallel(children) => self.execute_parallel(children)?,
            }
        }
        Ok(())
    }

    /// Evaluates a single step by name and returns its result.
    pub fn execute_step(&self, name: &str) -> Result<Value> {
        let started = Instant::now();
        let resource_kind = self.context.resource_kind();
        self.emit(StepEvent::Started {
            step: name.to_string(),
            resource_kind,
        });

        match self.dispatch(name) {
            Ok(result) => {
                self.emit(StepEvent::Completed {
                    step: name.to_string(),
                    resource_kind,
                    elapsed: started.elapsed(),
                    result_size: value_to_text(&result).len(),
                });
                Ok(result)
            }
            Err(e) => {
                self.emit(StepEvent::Failed {
                    step: name.to_string(),
                    resource_kind,
                    elapsed: started.elapsed(),
                    error_kind: e.kind(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn dispatch(&self, name: &str) -> Result<Value> {
        if name.starts_with("$(") {
            let output = run_command_step(name, self.context.working_dir())?;
            self.context.push_transcript(TranscriptEntry::new(
                Role::User,
                format!(
                    "I just executed the following command: ```\n{}\n```\n\nHere is the output:\n\n```\n{}\n```",
                    name, output
                ),
            ));
            self.context
                .push_transcript(TranscriptEntry::new(Role::Assistant, "Noted, thank you."));

            let result = Value::String(output);
            self.context.set_output(name, result.clone());
            return Ok(result);
        }

        if name.contains('*') && !self.context.has_resource() {
            return Ok(Value::String(expand_glob(name, self.context.working_dir())));
        }

        let step = self.resolver.resolve(name)?;
        let result = step.execute()?;
        self.context.set_output(name, result.clone());
        self.context.record_executed(name);

        if self.context.session_name().is_some() {
            self.repository.save_snapshot(&self.context, name);
        }
        Ok(result)
    }

    fn execute_assignment(&self, name: &str, target: &AssignmentTarget) -> Result<()> {
        match target {
            AssignmentTarget::Nested(children) => self.execute_steps(children),
            AssignmentTarget::Step(command) => {
                let variable = self.interpolate(name);
                let command = self.interpolate(command);
                let result = self.execute_step(&command)?;
                self.context.set_output(variable, result);
                Ok(())
            }
        }
    }

    /// Runs each child on its own thread and joins them all.
    ///
    /// Every branch runs to completion; the first failure in declared
    /// order is returned.
    fn execute_parallel(&self, children: &[StepNode]) -> Result<()> {
        debug!("Starting parallel group of {} steps", children.len());

        thread::scope(|scope| {
            let handles: Vec<_> = children
                .iter()
                .map(|child| {
                    let handle = scope.spawn(move || self.execute_steps(std::slice::from_ref(child)));
                    (child, handle)
                })
                .collect();

            let mut first_error = None;
            for (child, handle) in handles {
                let label = child.name().unwrap_or("parallel group").to_string();
                let outcome = handle
                    .join()
                    .unwrap_or_else(|_| Err(WorkflowError::BranchPanicked(label.clone())));

                if let Err(e) = outcome {
                    if first_error.is_none() {
                        first_error = Some(e);
                    } else {
                        error!("Parallel branch '{}' also failed: {}", label, e);
                    }
                }
            }

            first_error.map_or(Ok(()), Err)
        })
    }

    /// Pushes the workflow-level prompt as the system turn, if one exists.
    fn push_workflow_prompt(&self) -> Result<()> {
        let Some(path) = find_prompt_path(
            self.context.context_path(),
            &self.workflow.name,
            self.context.target(),
        ) else {
            return Ok(());
        };

        debug!("Using workflow prompt {}", path.display());
        let prompt = fs::read_to_string(&path)?;
        self.context
            .push_transcript(TranscriptEntry::new(Role::System, self.interpolate(&prompt)));
        Ok(())
    }

    fn interpolate(&self, text: &str) -> String {
        interpolate(text, self.context.as_ref())
    }

    fn emit(&self, event: StepEvent) {
        for sink in &self.sinks {
            sink.emit(&event);
        }
    }
}

/// Result of running the workflow against one target.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub target: Option<String>,
    pub final_output: String,
}

/// Runs a workflow once per target.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use stepwright::execution::client::CommandChatClient;
/// use stepwright::execution::WorkflowRunner;
/// use stepwright::session::{FileStateRepository, SessionManager};
/// use stepwright::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("review/workflow.yml")?;
///     let client = Arc::new(CommandChatClient::new("./ask-model"));
///     let repository = Arc::new(FileStateRepository::new(SessionManager::in_current_dir()));
///
///     let runner = WorkflowRunner::new(workflow, client, repository);
///     for outcome in runner.run(None)? {
///         println!("{}", outcome.final_output);
///     }
///     Ok(())
/// }
/// ```
pub struct WorkflowRunner {
    workflow: Arc<Workflow>,
    client: Arc<dyn ChatClient>,
    repository: Arc<dyn StateRepository>,
    sinks: Vec<Arc<dyn EventSink>>,
    target: Option<String>,
    session_name: Option<String>,
    working_dir: Option<PathBuf>,
}

impl WorkflowRunner {
    pub fn new(
        workflow: Workflow,
        client: Arc<dyn ChatClient>,
        repository: Arc<dyn StateRepository>,
    ) -> Self {
        Self {
            workflow: Arc::new(workflow),
            client,
            repository,
            sinks: Vec::new(),
            target: None,
            session_name: None,
            working_dir: None,
        }
    }

    /// Overrides the workflow's declared target.
    pub fn set_target(&mut self, target: impl Into<String>) {
        self.target = Some(target.into());
    }

    /// Overrides the workflow's session name.
    pub fn set_session_name(&mut self, name: impl Into<String>) {
        self.session_name = Some(name.into());
    }

    /// Sets the directory shell commands run in.
    pub fn set_working_dir(&mut self, dir: impl Into<PathBuf>) {
        self.working_dir = Some(dir.into());
    }

    /// Adds a receiver for step events of every run.
    pub fn add_event_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Runs the workflow for every target, stopping at the first failure.
    pub fn run(&self, replay: Option<&ReplayTarget>) -> Result<Vec<RunOutcome>> {
        let targets = self.targets()?;
        if targets.is_empty() {
            warn!("No targets to run '{}' against", self.workflow.name);
        }

        let mut outcomes = Vec::with_capacity(targets.len());
        for target in targets {
            if let Some(t) = &target {
                info!("Running workflow for file: {}", t);
            }
            let final_output = self.run_target(target.clone(), replay)?;
            outcomes.push(RunOutcome {
                target,
                final_output,
            });
        }

        info!("Workflow '{}' complete", self.workflow.name);
        Ok(outcomes)
    }

    fn run_target(&self, target: Option<String>, replay: Option<&ReplayTarget>) -> Result<String> {
        let mut context = RunContext::new(&self.workflow, target, Arc::clone(&self.client));
        if let Some(dir) = &self.working_dir {
            context = context.with_working_dir(dir);
        }
        if let Some(name) = &self.session_name {
            if self.workflow.save_state {
                context = context.with_session_name(Some(name.clone()));
            }
        }

        let mut executor = WorkflowExecutor::new(
            Arc::clone(&self.workflow),
            Arc::new(context),
            Arc::clone(&self.repository),
        );
        for sink in &self.sinks {
            executor.add_event_sink(Arc::clone(sink));
        }

        executor.run(replay)
    }

    /// Expands the configured target into the list of run targets.
    ///
    /// `each` wins over any target; `$(...)` targets run through the
    /// shell and glob targets expand to their matches. Every non-empty
    /// line of the result is one target. No target at all yields a
    /// single targetless run.
    pub fn targets(&self) -> Result<Vec<Option<String>>> {
        let working_dir = self.working_dir.as_deref();

        if let Some(each) = &self.workflow.each {
            if self.target.is_some() {
                warn!("Overriding target with each parameter: {}", each);
            }
            let command = if each.starts_with("$(") {
                each.clone()
            } else {
                format!("$({})", each)
            };
            return Ok(lines(&run_command_step(&command, working_dir)?));
        }

        let Some(target) = self.target.as_ref().or(self.workflow.target.as_ref()) else {
            return Ok(vec![None]);
        };

        let processed = if target.starts_with("$(") {
            run_command_step(target, working_dir)?.trim().to_string()
        } else {
            target.clone()
        };

        if processed.contains('*') {
            let matches = expand_glob(&processed, working_dir);
            if !matches.is_empty() {
                return Ok(lines(&matches));
            }
        }

        Ok(lines(&processed))
    }
}

fn lines(text: &str) -> Vec<Option<String>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| Some(line.to_string()))
        .collect()
}

/// Writes the final report to `path`.
pub fn write_output_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}
