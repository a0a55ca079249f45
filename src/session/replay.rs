//! Replay Control
//!
//! Turns a `--replay` argument into a starting position in the step list,
//! restoring the run context from the snapshot taken before that step.

use std::fmt;
use std::str::FromStr;

use log::{info, warn};

use super::manager::is_valid_timestamp;
use super::repository::StateRepository;
use crate::error::{Result, WorkflowError};
use crate::workflow::context::RunContext;
use crate::workflow::model::{find_step_index, AssignmentTarget, StepNode};

/// A parsed `STEP` or `TIMESTAMP:STEP` replay request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayTarget {
    pub step: String,
    pub timestamp: Option<String>,
}

impl ReplayTarget {
    /// Parses a replay argument.
    ///
    /// The timestamp part, when present, must be `YYYYMMDD_HHMMSS_LLL`.
    /// A prefix before `:` that is not made of digits and underscores is
    /// part of the step name.
    pub fn parse(argument: &str) -> Result<Self> {
        match argument
            .split_once(':')
            .filter(|(prefix, _)| looks_like_timestamp(prefix))
        {
            Some((timestamp, step)) => {
                if !is_valid_timestamp(timestamp) {
                    return Err(WorkflowError::InvalidReplayTimestamp(timestamp.to_string()));
                }
                Ok(Self {
                    step: step.to_string(),
                    timestamp: Some(timestamp.to_string()),
                })
            }
            None => Ok(Self {
                step: argument.to_string(),
                timestamp: None,
            }),
        }
    }
}

fn looks_like_timestamp(prefix: &str) -> bool {
    !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit() || c == '_')
}

impl FromStr for ReplayTarget {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ReplayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.timestamp {
            Some(ts) => write!(f, "{}:{}", ts, self.step),
            None => f.write_str(&self.step),
        }
    }
}

/// Restores `context` for `target` and returns the index to resume from.
///
/// - Step not declared: warn and start from 0
/// - Snapshot found: restore it and start at the step's index
/// - No snapshot, unscoped or first step: warn and start from 0
/// - No snapshot for a scoped request past the first step: `ReplayNotFound`
pub fn plan_replay(
    steps: &[StepNode],
    target: &ReplayTarget,
    context: &RunContext,
    repository: &dyn StateRepository,
) -> Result<usize> {
    let Some(index) = find_step_index(steps, &target.step) else {
        warn!(
            "Replay step '{}' not found in workflow; running all steps",
            target.step
        );
        return Ok(0);
    };

    let timestamp = target.timestamp.as_deref();
    let mut snapshot = None;
    for name in snapshot_names(&steps[index], &target.step) {
        snapshot = repository.load_state_before_step(context, &name, timestamp)?;
        if snapshot.is_some() {
            break;
        }
    }

    match snapshot {
        Some(snapshot) => {
            context.restore(&snapshot);
            info!(
                "Restored state from '{}'; resuming at step {} ('{}')",
                snapshot.step_name, index, target.step
            );
            Ok(index)
        }
        None if index > 0 && timestamp.is_some() => Err(WorkflowError::ReplayNotFound {
            step: target.step.clone(),
            timestamp: target.timestamp.clone().unwrap_or_default(),
        }),
        None => {
            warn!(
                "No saved state before '{}'; running from the first step",
                target.step
            );
            Ok(0)
        }
    }
}

/// Names a step's snapshot may be filed under.
///
/// Assignments are snapshotted under the step they run, so both the
/// variable and the step name are tried.
fn snapshot_names(node: &StepNode, requested: &str) -> Vec<String> {
    let mut names = vec![requested.to_string()];
    if let StepNode::Assignment {
        name,
        target: AssignmentTarget::Step(step),
    } = node
    {
        if name == requested && step != requested {
            names.push(step.clone());
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::client::UnconfiguredClient;
    use crate::session::manager::SessionManager;
    use crate::session::repository::FileStateRepository;
    use crate::workflow::model::Workflow;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn steps() -> Vec<StepNode> {
        vec![
            StepNode::Named("step1".to_string()),
            StepNode::Assignment {
                name: "var1".to_string(),
                target: AssignmentTarget::Step("step2".to_string()),
            },
            StepNode::Parallel(vec![
                StepNode::Named("step3".to_string()),
                StepNode::Named("step4".to_string()),
            ]),
        ]
    }

    #[test]
    fn test_parse_plain_step() {
        let target = ReplayTarget::parse("step2").unwrap();
        assert_eq!(target.step, "step2");
        assert!(target.timestamp.is_none());
    }

    #[test]
    fn test_parse_scoped_step() {
        let target: ReplayTarget = "20240101_120000_000:step2".parse().unwrap();
        assert_eq!(target.timestamp.as_deref(), Some("20240101_120000_000"));
        assert_eq!(target.step, "step2");
        assert_eq!(target.to_string(), "20240101_120000_000:step2");
    }

    #[test]
    fn test_malformed_timestamp_rejected() {
        let err = ReplayTarget::parse("20230101:step2").unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidReplayTimestamp(ref ts) if ts == "20230101"));
        assert!(ReplayTarget::parse("2023_01_01:step2").is_err());
    }

    #[test]
    fn test_colon_in_step_name_is_not_a_timestamp() {
        let target = ReplayTarget::parse("Summarize: the diff").unwrap();
        assert_eq!(target.step, "Summarize: the diff");
        assert!(target.timestamp.is_none());

        let scoped = ReplayTarget::parse("20240101_120000_000:Summarize: the diff").unwrap();
        assert_eq!(scoped.timestamp.as_deref(), Some("20240101_120000_000"));
        assert_eq!(scoped.step, "Summarize: the diff");
        assert_eq!(ReplayTarget::parse(":x").unwrap().step, ":x");
    }

    struct Fixture {
        _root: tempfile::TempDir,
        repo: FileStateRepository,
        workflow: Workflow,
    }

    fn fixture() -> Fixture {
        let root = tempdir().unwrap();
        let repo = FileStateRepository::new(SessionManager::new(root.path()));
        let workflow = Workflow::from_steps(root.path().join("wf/workflow.yml"), steps());
        Fixture {
            _root: root,
            repo,
            workflow,
        }
    }

    fn context(workflow: &Workflow) -> RunContext {
        RunContext::new(workflow, None, Arc::new(UnconfiguredClient))
    }

    fn record(fx: &Fixture, ctx: &RunContext, names: &[&str]) {
        for name in names {
            ctx.set_output(*name, json!(name));
            ctx.record_executed(*name);
            fx.repo.save_snapshot(ctx, name);
        }
    }

    #[test]
    fn test_unknown_step_runs_everything() {
        let fx = fixture();
        let ctx = context(&fx.workflow);
        let target = ReplayTarget::parse("nonexistent").unwrap();
        assert_eq!(plan_replay(&fx.workflow.steps, &target, &ctx, &fx.repo).unwrap(), 0);
    }

    #[test]
    fn test_first_step_has_no_prior_state() {
        let fx = fixture();
        record(&fx, &context(&fx.workflow), &["step1", "step2"]);

        let ctx = context(&fx.workflow);
        let target = ReplayTarget::parse("step1").unwrap();
        assert_eq!(plan_replay(&fx.workflow.steps, &target, &ctx, &fx.repo).unwrap(), 0);
        assert!(ctx.output().is_empty());
    }

    #[test]
    fn test_restores_and_resumes_at_parallel_group() {
        let fx = fixture();
        record(&fx, &context(&fx.workflow), &["step1", "step2", "step3", "step4"]);

        let ctx = context(&fx.workflow);
        let target = ReplayTarget::parse("step3").unwrap();
        assert_eq!(plan_replay(&fx.workflow.steps, &target, &ctx, &fx.repo).unwrap(), 2);
        assert_eq!(ctx.executed_steps(), vec!["step1", "step2"]);
    }

    #[test]
    fn test_assignment_variable_uses_step_snapshot() {
        let fx = fixture();
        record(&fx, &context(&fx.workflow), &["step1", "step2"]);

        let ctx = context(&fx.workflow);
        let target = ReplayTarget::parse("var1").unwrap();
        assert_eq!(plan_replay(&fx.workflow.steps, &target, &ctx, &fx.repo).unwrap(), 1);
        assert_eq!(ctx.output_value("step1"), Some(json!("step1")));
    }

    #[test]
    fn test_scoped_replay_missing_state_is_not_found() {
        let fx = fixture();
        let ctx = context(&fx.workflow);
        let target = ReplayTarget::parse("20240101_000000_000:step3").unwrap();

        let err = plan_replay(&fx.workflow.steps, &target, &ctx, &fx.repo).unwrap_err();
        assert_eq!(err.kind(), "replay_not_found");
    }

    #[test]
    fn test_unscoped_replay_missing_state_runs_from_top() {
        let fx = fixture();
        let ctx = context(&fx.workflow);
        let target = ReplayTarget::parse("step3").unwrap();
        assert_eq!(plan_replay(&fx.workflow.steps, &target, &ctx, &fx.repo).unwrap(), 0);
    }
}
