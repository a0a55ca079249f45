//! Workflow Parser
//!
//! Handles loading and parsing workflow definitions from YAML files.
//! Raw step values are converted to [`StepNode`]s once here, so nothing
//! downstream inspects YAML shapes.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::Deserialize;
use serde_yaml::Value as YamlValue;

use super::model::{StepConfig, StepNode, Workflow};
use super::validator::validate_workflow;
use crate::error::{Result, WorkflowError};

/// Top-level YAML layout before step conversion.
#[derive(Deserialize, Debug)]
struct RawWorkflow {
    #[serde(default)]
    name: Option<String>,

    #[serde(default)]
    steps: Vec<YamlValue>,

    #[serde(default)]
    model: Option<String>,

    #[serde(default)]
    target: Option<String>,

    #[serde(default)]
    each: Option<String>,

    #[serde(default)]
    tools: Vec<String>,

    #[serde(default)]
    session_name: Option<String>,

    #[serde(default = "default_save_state")]
    save_state: bool,

    /// Everything else; mapping values are per-step config entries
    #[serde(flatten)]
    extra: IndexMap<String, YamlValue>,
}

fn default_save_state() -> bool {
    true
}

/// Loads a workflow from a YAML file.
///
/// This function:
/// 1. Reads and parses the YAML file
/// 2. Converts every declared step into a [`StepNode`]
/// 3. Collects the per-step config table
/// 4. Validates the workflow structure
///
/// # Example
///
/// ```rust,no_run
/// use stepwright::workflow::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("workflows/review/workflow.yml")?;
///     println!("Loaded {} steps", workflow.steps.len());
///     Ok(())
/// }
/// ```
pub fn load_workflow(path: impl AsRef<Path>) -> Result<Workflow> {
    let path = path.as_ref();
    info!("Loading configuration from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|e| {
        WorkflowError::Validation(format!(
            "Failed to read workflow file '{}': {}. Check that the file exists and is readable.",
            path.display(),
            e
        ))
    })?;

    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    let workflow = parse_workflow(&yaml_content, path)?;

    info!(
        "Parsed workflow '{}': {} steps, {} step configs",
        workflow.name,
        workflow.steps.len(),
        workflow.step_configs.len()
    );

    Ok(workflow)
}

/// Parses workflow YAML that was read from `path`.
pub fn parse_workflow(yaml_content: &str, path: &Path) -> Result<Workflow> {
    let raw: RawWorkflow = serde_yaml::from_str(yaml_content)?;

    let steps = raw
        .steps
        .iter()
        .map(StepNode::from_yaml)
        .collect::<Result<Vec<_>>>()?;

    let mut workflow = Workflow::from_steps(path, steps);
    if let Some(name) = raw.name {
        workflow.name = name;
    }
    workflow.model = raw.model;
    workflow.target = raw.target;
    workflow.each = raw.each;
    workflow.tools = raw.tools;
    workflow.session_name = raw.session_name;
    workflow.save_state = raw.save_state;
    workflow.step_configs = collect_step_configs(raw.extra);

    validate_workflow(&workflow)?;

    Ok(workflow)
}

/// Builds the per-step config table from the remaining top-level keys.
fn collect_step_configs(extra: IndexMap<String, YamlValue>) -> HashMap<String, StepConfig> {
    let mut configs = HashMap::new();

    for (key, value) in extra {
        if !value.is_mapping() {
            debug!("Ignoring top-level key '{}'", key);
            continue;
        }
        match serde_yaml::from_value::<StepConfig>(value) {
            Ok(config) => {
                debug!("Step config for '{}': {:?}", key, config);
                configs.insert(key, config);
            }
            Err(e) => warn!("Ignoring invalid config for step '{}': {}", key, e),
        }
    }

    configs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::AssignmentTarget;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
name: grading
model: gpt-4o-mini
tools:
  - read_file
steps:
  - $(cat README.md)
  - summary: summarize
  - - lint
    - tests: run_tests

summarize:
  print_response: true
  loop: false

run_tests:
  model: gpt-4o
"#;

    #[test]
    fn test_parse_workflow() {
        let workflow = parse_workflow(SAMPLE, Path::new("/tmp/grading/workflow.yml")).unwrap();

        assert_eq!(workflow.name, "grading");
        assert_eq!(workflow.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(workflow.tools, vec!["read_file"]);
        assert_eq!(workflow.steps.len(), 3);
        assert_eq!(
            workflow.steps[1],
            StepNode::Assignment {
                name: "summary".to_string(),
                target: AssignmentTarget::Step("summarize".to_string()),
            }
        );

        let summarize = workflow.step_config("summarize").unwrap();
        assert_eq!(summarize.print_response, Some(true));
        assert_eq!(summarize.looping, Some(false));
        assert_eq!(
            workflow.step_config("run_tests").unwrap().model.as_deref(),
            Some("gpt-4o")
        );
    }

    #[test]
    fn test_name_defaults_to_file_stem() {
        let workflow = parse_workflow("steps:\n  - hello\n", Path::new("/tmp/wf/review.yml")).unwrap();
        assert_eq!(workflow.name, "review");
        assert!(workflow.save_state);
    }

    #[test]
    fn test_save_state_flag() {
        let workflow = parse_workflow(
            "save_state: false\nsteps:\n  - hello\n",
            Path::new("/tmp/wf/review.yml"),
        )
        .unwrap();
        assert!(!workflow.save_state);
    }

    #[test]
    fn test_unknown_step_shape_rejected() {
        let result = parse_workflow("steps:\n  - 12\n", Path::new("/tmp/wf.yml"));
        assert!(matches!(result, Err(WorkflowError::InvalidStep(_))));
    }

    #[test]
    fn test_load_workflow_file_not_found() {
        let result = load_workflow("/nonexistent/path/workflow.yml");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_workflow_valid_yaml() {
        let temp_dir = tempdir().unwrap();
        let workflow_path = temp_dir.path().join("workflow.yml");
        std::fs::write(&workflow_path, SAMPLE).unwrap();

        let workflow = load_workflow(&workflow_path).unwrap();
        assert_eq!(workflow.context_path(), temp_dir.path());
        assert_eq!(workflow.find_step_index("tests"), Some(2));
    }

    #[test]
    fn test_load_workflow_invalid_yaml() {
        let temp_dir = tempdir().unwrap();
        let workflow_path = temp_dir.path().join("bad.yml");
        std::fs::write(&workflow_path, "this is not valid yaml: [[[").unwrap();

        assert!(load_workflow(&workflow_path).is_err());
    }
}
