//! Workflow Validation
//!
//! Structural checks performed once at load time:
//! - Workflow is not empty
//! - Step names and assignment variables are not blank
//! - Parallel groups are not empty
//! - Inline commands are closed

use log::{debug, info, warn};

use super::model::{AssignmentTarget, StepNode, Workflow};
use crate::error::{Result, WorkflowError};

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyWorkflow,
    EmptyStepName,
    EmptyVariableName,
    EmptyParallelGroup,
    UnclosedCommand(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyWorkflow => write!(f, "Workflow has no steps"),
            Self::EmptyStepName => write!(f, "Step has empty or whitespace-only name"),
            Self::EmptyVariableName => write!(f, "Assignment has empty variable name"),
            Self::EmptyParallelGroup => write!(f, "Parallel group has no steps"),
            Self::UnclosedCommand(cmd) => write!(f, "Missing closing parentheses: {}", cmd),
        }
    }
}

/// Validates a single node, recursing into groups.
fn validate_node(node: &StepNode, errors: &mut Vec<ValidationError>) {
    match node {
        StepNode::Command(text) => {
            if !text.trim_end().ends_with(')') {
                errors.push(ValidationError::UnclosedCommand(text.clone()));
            }
        }
        StepNode::Glob(text) | StepNode::Named(text) => {
            if text.trim().is_empty() {
                errors.push(ValidationError::EmptyStepName);
            }
        }
        StepNode::Assignment { name, target } => {
            if name.trim().is_empty() {
                errors.push(ValidationError::EmptyVariableName);
            }
            match target {
                AssignmentTarget::Step(text) => validate_node(&StepNode::from_text(text), errors),
                AssignmentTarget::Nested(children) => {
                    for child in children {
                        validate_node(child, errors);
                    }
                }
            }
        }
        StepNode::Parallel(children) => {
            if children.is_empty() {
                errors.push(ValidationError::EmptyParallelGroup);
            }
            for child in children {
                validate_node(child, errors);
            }
        }
    }
}

/// Validates the entire workflow structure.
pub fn validate_workflow(workflow: &Workflow) -> Result<()> {
    info!("Validating workflow with {} steps", workflow.steps.len());

    let errors = quick_validate(workflow);
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(WorkflowError::Validation(messages.join("\n")));
    }

    for name in workflow.step_configs.keys() {
        if workflow.find_step_index(name).is_none() && !declared_anywhere(&workflow.steps, name) {
            warn!("Config for '{}' does not match any declared step", name);
        }
    }

    debug!("Workflow '{}' validated", workflow.name);
    Ok(())
}

/// Returns every structural problem found, without failing.
pub fn quick_validate(workflow: &Workflow) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if workflow.steps.is_empty() {
        errors.push(ValidationError::EmptyWorkflow);
        return errors;
    }

    for step in &workflow.steps {
        validate_node(step, &mut errors);
    }

    errors
}

/// Searches nested groups and assignment targets for a step name.
fn declared_anywhere(steps: &[StepNode], name: &str) -> bool {
    steps.iter().any(|step| match step {
        StepNode::Command(text) | StepNode::Glob(text) | StepNode::Named(text) => text == name,
        StepNode::Assignment { name: var, target } => {
            var == name
                || match target {
                    AssignmentTarget::Step(text) => text == name,
                    AssignmentTarget::Nested(children) => declared_anywhere(children, name),
                }
        }
        StepNode::Parallel(children) => declared_anywhere(children, name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow(steps: Vec<StepNode>) -> Workflow {
        Workflow::from_steps("/tmp/wf/workflow.yml", steps)
    }

    #[test]
    fn test_valid_workflow() {
        let wf = workflow(vec![
            StepNode::Named("step1".to_string()),
            StepNode::Command("$(echo hi)".to_string()),
            StepNode::Parallel(vec![
                StepNode::Named("a".to_string()),
                StepNode::Named("b".to_string()),
            ]),
        ]);
        assert!(validate_workflow(&wf).is_ok());
    }

    #[test]
    fn test_empty_workflow() {
        let wf = workflow(vec![]);
        let errors = quick_validate(&wf);
        assert_eq!(errors, vec![ValidationError::EmptyWorkflow]);
        assert!(validate_workflow(&wf).is_err());
    }

    #[test]
    fn test_unclosed_command() {
        let wf = workflow(vec![StepNode::Command("$(echo hi".to_string())]);
        let errors = quick_validate(&wf);
        assert!(matches!(errors[0], ValidationError::UnclosedCommand(_)));
    }

    #[test]
    fn test_unclosed_command_in_assignment() {
        let wf = workflow(vec![StepNode::Assignment {
            name: "files".to_string(),
            target: AssignmentTarget::Step("$(ls".to_string()),
        }]);
        assert!(validate_workflow(&wf).is_err());
    }

    #[test]
    fn test_empty_parallel() {
        let wf = workflow(vec![StepNode::Parallel(vec![])]);
        let errors = quick_validate(&wf);
        assert_eq!(errors, vec![ValidationError::EmptyParallelGroup]);
    }

    #[test]
    fn test_parallel_inside_parallel_allowed() {
        let wf = workflow(vec![StepNode::Parallel(vec![
            StepNode::Parallel(vec![
                StepNode::Named("a".to_string()),
                StepNode::Named("b".to_string()),
            ]),
            StepNode::Named("c".to_string()),
        ])]);
        assert!(quick_validate(&wf).is_empty());
        assert!(validate_workflow(&wf).is_ok());
    }

    #[test]
    fn test_blank_names() {
        let wf = workflow(vec![
            StepNode::Named("  ".to_string()),
            StepNode::Assignment {
                name: "".to_string(),
                target: AssignmentTarget::Step("step".to_string()),
            },
        ]);
        let errors = quick_validate(&wf);
        assert!(errors.contains(&ValidationError::EmptyStepName));
        assert!(errors.contains(&ValidationError::EmptyVariableName));
    }

    #[test]
    fn test_declared_anywhere_nested() {
        let steps = vec![StepNode::Assignment {
            name: "group".to_string(),
            target: AssignmentTarget::Nested(vec![StepNode::Named("inner".to_string())]),
        }];
        assert!(declared_anywhere(&steps, "inner"));
        assert!(!declared_anywhere(&steps, "missing"));
    }

    #[test]
    fn test_validation_error_display() {
        assert_eq!(ValidationError::EmptyWorkflow.to_string(), "Workflow has no steps");
        assert!(ValidationError::UnclosedCommand("$(ls".to_string())
            .to_string()
            .contains("$(ls"));
    }
}
