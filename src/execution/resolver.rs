//! Step Resolution
//!
//! Maps a step name to the executable that satisfies it. The first rule
//! that matches wins:
//!
//! 1. A name containing whitespace is an inline prompt
//! 2. `<workflow dir>/<name>.sh` is a scripted unit
//! 3. `<workflow dir>/../shared/<name>.sh` is a shared scripted unit
//! 4. A `<name>` directory in the workflow dir, or failing that in
//!    `shared/`, is a sidecar-prompt step
//!
//! Anything else is a resolution error.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use super::step::script_path;
use super::steps::{PromptStep, ScriptStep, SidecarStep, StepExecutable};
use crate::error::{Result, WorkflowError};
use crate::workflow::context::RunContext;
use crate::workflow::model::{Workflow, DEFAULT_MODEL};

/// Directory shared steps live in, relative to the workflow directory.
const SHARED_DIR: &str = "../shared";

/// Where a step name was found.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Prompt,
    Script(PathBuf),
    Sidecar(PathBuf),
}

/// Resolves step names for one run.
pub struct StepResolver {
    workflow: Arc<Workflow>,
    context: Arc<RunContext>,
}

impl StepResolver {
    pub fn new(workflow: Arc<Workflow>, context: Arc<RunContext>) -> Self {
        Self { workflow, context }
    }

    /// Finds what `name` maps to without building it.
    ///
    /// Returned paths are the directories the step's assets resolve
    /// against.
    pub fn locate(&self, name: &str) -> Result<Resolution> {
        if name.contains(char::is_whitespace) {
            return Ok(Resolution::Prompt);
        }

        let local = self.context.context_path().to_path_buf();
        let shared = local.join(SHARED_DIR);

        for dir in [&local, &shared] {
            if script_path(dir, name).is_file() {
                return Ok(Resolution::Script(dir.clone()));
            }
        }

        for dir in [&local, &shared] {
            let step_dir = dir.join(name);
            if step_dir.is_dir() {
                return Ok(Resolution::Sidecar(step_dir));
            }
        }

        Err(WorkflowError::Resolution {
            step: name.to_string(),
            path: normalize(&shared.join(name)).display().to_string(),
        })
    }

    /// Builds the executable for `name` with config overrides applied.
    pub fn resolve(&self, name: &str) -> Result<Box<dyn StepExecutable>> {
        let resolution = self.locate(name)?;
        debug!("Resolved step '{}' to {:?}", name, resolution);

        let context = Arc::clone(&self.context);
        let mut step: Box<dyn StepExecutable> = match resolution {
            Resolution::Prompt => Box::new(PromptStep::new(context, name)),
            Resolution::Script(dir) => Box::new(ScriptStep::new(context, name, dir)),
            Resolution::Sidecar(dir) => Box::new(SidecarStep::new(context, name, dir)),
        };

        let settings = step.settings_mut();
        settings.model = self
            .workflow
            .step_config(name)
            .and_then(|c| c.model.clone())
            .or_else(|| self.workflow.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        if let Some(config) = self.workflow.step_config(name) {
            settings.apply(config);
        }

        Ok(step)
    }
}

/// Collapses `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::client::UnconfiguredClient;
    use crate::workflow::model::{StepConfig, StepNode};
    use std::fs;
    use tempfile::tempdir;

    struct Fixture {
        _root: tempfile::TempDir,
        workflow_dir: PathBuf,
        shared_dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let root = tempdir().unwrap();
        let workflow_dir = root.path().join("review");
        let shared_dir = root.path().join("shared");
        fs::create_dir_all(&workflow_dir).unwrap();
        fs::create_dir_all(&shared_dir).unwrap();
        Fixture {
            _root: root,
            workflow_dir,
            shared_dir,
        }
    }

    fn resolver(dir: &Path, configure: impl FnOnce(&mut Workflow)) -> StepResolver {
        let mut workflow = Workflow::from_steps(
            dir.join("workflow.yml"),
            vec![StepNode::Named("a".to_string())],
        );
        configure(&mut workflow);
        let context = Arc::new(RunContext::new(&workflow, None, Arc::new(UnconfiguredClient)));
        StepResolver::new(Arc::new(workflow), context)
    }

    #[test]
    fn test_whitespace_is_prompt() {
        let fx = fixture();
        let r = resolver(&fx.workflow_dir, |_| {});
        assert_eq!(r.locate("Explain the diff").unwrap(), Resolution::Prompt);
    }

    #[test]
    fn test_local_script_wins_over_shared() {
        let fx = fixture();
        fs::write(fx.workflow_dir.join("lint.sh"), "echo local").unwrap();
        fs::write(fx.shared_dir.join("lint.sh"), "echo shared").unwrap();

        let r = resolver(&fx.workflow_dir, |_| {});
        assert_eq!(r.locate("lint").unwrap(), Resolution::Script(fx.workflow_dir.clone()));
    }

    #[test]
    fn test_shared_script() {
        let fx = fixture();
        fs::write(fx.shared_dir.join("lint.sh"), "echo shared").unwrap();

        let r = resolver(&fx.workflow_dir, |_| {});
        match r.locate("lint").unwrap() {
            Resolution::Script(dir) => assert!(script_path(&dir, "lint").is_file()),
            other => panic!("unexpected resolution: {:?}", other),
        }
    }

    #[test]
    fn test_script_preferred_over_directory() {
        let fx = fixture();
        fs::create_dir(fx.workflow_dir.join("lint")).unwrap();
        fs::write(fx.shared_dir.join("lint.sh"), "echo shared").unwrap();

        let r = resolver(&fx.workflow_dir, |_| {});
        assert!(matches!(r.locate("lint").unwrap(), Resolution::Script(_)));
    }

    #[test]
    fn test_sidecar_directories() {
        let fx = fixture();
        fs::create_dir(fx.shared_dir.join("summarize")).unwrap();
        let r = resolver(&fx.workflow_dir, |_| {});
        match r.locate("summarize").unwrap() {
            Resolution::Sidecar(dir) => assert!(dir.ends_with("summarize")),
            other => panic!("unexpected resolution: {:?}", other),
        }

        fs::create_dir(fx.workflow_dir.join("summarize")).unwrap();
        assert_eq!(
            r.locate("summarize").unwrap(),
            Resolution::Sidecar(fx.workflow_dir.join("summarize"))
        );
    }

    #[test]
    fn test_missing_step_names_expected_path() {
        let fx = fixture();
        let r = resolver(&fx.workflow_dir, |_| {});
        let err = r.locate("ghost").unwrap_err();
        assert_eq!(err.kind(), "resolution");
        assert!(err
            .to_string()
            .contains(&fx.shared_dir.join("ghost").display().to_string()));
    }

    #[test]
    fn test_model_fallback_chain() {
        let fx = fixture();
        fs::create_dir(fx.workflow_dir.join("a")).unwrap();
        fs::create_dir(fx.workflow_dir.join("b")).unwrap();

        let r = resolver(&fx.workflow_dir, |_| {});
        assert_eq!(r.resolve("a").unwrap().settings().model, DEFAULT_MODEL);

        let r = resolver(&fx.workflow_dir, |w| {
            w.model = Some("workflow-model".to_string());
            w.step_configs.insert(
                "b".to_string(),
                StepConfig {
                    model: Some("step-model".to_string()),
                    print_response: Some(true),
                    ..StepConfig::default()
                },
            );
        });
        assert_eq!(r.resolve("a").unwrap().settings().model, "workflow-model");

        let b = r.resolve("b").unwrap();
        assert_eq!(b.settings().model, "step-model");
        assert!(b.settings().print_response);
        assert!(b.settings().looping);
    }
}
