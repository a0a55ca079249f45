//! Step Executables
//!
//! Every resolved step implements [`StepExecutable`]. Three kinds exist:
//!
//! - [`PromptStep`]: a literal natural-language prompt
//! - [`SidecarStep`]: a step directory holding a prompt file and an
//!   optional `output.txt` template
//! - [`ScriptStep`]: a `<name>.sh` scripted unit run through bash
//!
//! All three are built from the owning run context, the step name and
//! the directory their assets are resolved against.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use log::{debug, info};
use serde_json::Value;

use super::client::ChatRequest;
use super::prompt_loader::load_prompt;
use super::step::{execute_with_bash, script_path};
use crate::error::{Result, WorkflowError};
use crate::workflow::context::{Role, RunContext, TranscriptEntry};
use crate::workflow::interpolation::{interpolate, Layered};
use crate::workflow::model::{StepConfig, DEFAULT_MODEL};

/// Template rendered after a sidecar step's model call.
const OUTPUT_TEMPLATE: &str = "output.txt";

/// Settings applied to an executable after resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSettings {
    pub model: String,
    pub print_response: bool,
    pub looping: bool,
    pub json: bool,
    pub params: IndexMap<String, Value>,
}

impl Default for StepSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            print_response: false,
            looping: true,
            json: false,
            params: IndexMap::new(),
        }
    }
}

impl StepSettings {
    /// Applies the explicitly set fields of a config table entry.
    pub fn apply(&mut self, config: &StepConfig) {
        if let Some(model) = &config.model {
            self.model = model.clone();
        }
        if let Some(print_response) = config.print_response {
            self.print_response = print_response;
        }
        if let Some(looping) = config.looping {
            self.looping = looping;
        }
        if let Some(json) = config.json {
            self.json = json;
        }
        if let Some(params) = &config.params {
            self.params = params.clone();
        }
    }
}

/// A resolved, runnable step.
pub trait StepExecutable: Send {
    /// Name the step was resolved from.
    fn name(&self) -> &str;

    fn settings(&self) -> &StepSettings;

    fn settings_mut(&mut self) -> &mut StepSettings;

    /// Runs the step and returns its result.
    fn execute(&self) -> Result<Value>;
}

/// Sends the transcript to the model and records the reply.
fn chat_completion(
    context: &RunContext,
    step: &str,
    settings: &StepSettings,
    looping: bool,
    print_response: bool,
) -> Result<Value> {
    let request = ChatRequest {
        model: settings.model.clone(),
        transcript: context.transcript(),
        loop_until_stop: looping,
        json: settings.json,
        params: settings.params.clone(),
        tools: context.tools().to_vec(),
    };

    let text = context.client().chat_completion(&request)?.into_text();
    context.push_transcript(TranscriptEntry::new(Role::Assistant, text.clone()));

    if print_response {
        context.append_final_output(text.clone());
    }

    if settings.json {
        serde_json::from_str(&text)
            .map_err(|e| WorkflowError::execution(step, format!("response is not valid JSON: {}", e)))
    } else {
        Ok(Value::String(text))
    }
}

/// Inline prompt whose text is the step name itself.
///
/// Always runs without looping and always prints its response.
pub struct PromptStep {
    context: Arc<RunContext>,
    name: String,
    settings: StepSettings,
}

impl PromptStep {
    pub fn new(context: Arc<RunContext>, name: impl Into<String>) -> Self {
        Self {
            context,
            name: name.into(),
            settings: StepSettings::default(),
        }
    }
}

impl StepExecutable for PromptStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &StepSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut StepSettings {
        &mut self.settings
    }

    fn execute(&self) -> Result<Value> {
        self.context
            .push_transcript(TranscriptEntry::new(Role::User, self.name.clone()));
        chat_completion(&self.context, &self.name, &self.settings, false, true)
    }
}

/// Step driven by a prompt file in its own directory.
pub struct SidecarStep {
    context: Arc<RunContext>,
    name: String,
    dir: PathBuf,
    settings: StepSettings,
}

impl SidecarStep {
    pub fn new(context: Arc<RunContext>, name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            context,
            name: name.into(),
            dir: dir.into(),
            settings: StepSettings::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Renders `output.txt` with the response bound, if the template exists.
    fn process_output(&self, response: &Value) -> Result<()> {
        let template_path = self.dir.join(OUTPUT_TEMPLATE);
        if !template_path.is_file() {
            return Ok(());
        }

        let template = fs::read_to_string(&template_path)?;
        let bindings = Layered::new(self.context.as_ref()).with("response", response.clone());
        self.context.append_final_output(interpolate(&template, &bindings));
        Ok(())
    }
}

impl StepExecutable for SidecarStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &StepSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut StepSettings {
        &mut self.settings
    }

    fn execute(&self) -> Result<Value> {
        let prompt = load_prompt(&self.dir, &self.name, self.context.target())?.ok_or_else(|| {
            WorkflowError::execution(
                &self.name,
                format!("no prompt file found in {}", self.dir.display()),
            )
        })?;

        let prompt = interpolate(&prompt, self.context.as_ref());
        self.context
            .push_transcript(TranscriptEntry::new(Role::User, prompt));

        let response = chat_completion(
            &self.context,
            &self.name,
            &self.settings,
            self.settings.looping,
            self.settings.print_response,
        )?;
        self.process_output(&response)?;
        Ok(response)
    }
}

/// `<name>.sh` unit run through bash in its own directory.
///
/// The run context reaches the script through `STEPWRIGHT_*`
/// environment variables; stdout is the step result.
pub struct ScriptStep {
    context: Arc<RunContext>,
    name: String,
    dir: PathBuf,
    settings: StepSettings,
}

impl ScriptStep {
    pub fn new(context: Arc<RunContext>, name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            context,
            name: name.into(),
            dir: dir.into(),
            settings: StepSettings::default(),
        }
    }

    pub fn script(&self) -> PathBuf {
        script_path(&self.dir, &self.name)
    }

    fn environment(&self) -> Result<HashMap<String, String>> {
        let mut env = HashMap::new();
        env.insert("STEPWRIGHT_STEP".to_string(), self.name.clone());
        env.insert(
            "STEPWRIGHT_TARGET".to_string(),
            self.context.target().unwrap_or_default().to_string(),
        );
        env.insert(
            "STEPWRIGHT_CONTEXT_DIR".to_string(),
            self.dir.display().to_string(),
        );
        env.insert("STEPWRIGHT_MODEL".to_string(), self.settings.model.clone());
        env.insert(
            "STEPWRIGHT_OUTPUT".to_string(),
            serde_json::to_string(&self.context.output())?,
        );
        Ok(env)
    }
}

impl StepExecutable for ScriptStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &StepSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut StepSettings {
        &mut self.settings
    }

    fn execute(&self) -> Result<Value> {
        let script = self.script();
        info!("Running script {}", script.display());

        let output = execute_with_bash(&script, Some(&self.dir), &self.environment()?)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorkflowError::execution(
                &self.name,
                format!(
                    "script exited with code {:?}: {}",
                    output.status.code(),
                    stderr.trim()
                ),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let text = stdout.strip_suffix('\n').unwrap_or(stdout.as_str()).to_string();
        debug!("Script '{}' produced {} bytes", self.name, text.len());

        if self.settings.print_response {
            self.context.append_final_output(text.clone());
        }

        if self.settings.json {
            serde_json::from_str(&text).map_err(|e| {
                WorkflowError::execution(&self.name, format!("output is not valid JSON: {}", e))
            })
        } else {
            Ok(Value::String(text))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::execution::client::{ChatClient, ChatResponse};
    use crate::workflow::model::{StepNode, Workflow};
    use parking_lot::Mutex;
    use serde_json::json;
    use tempfile::tempdir;

    /// Replies with queued responses and records every request.
    #[derive(Default)]
    pub(crate) struct ScriptedClient {
        replies: Mutex<Vec<ChatResponse>>,
        pub(crate) requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedClient {
        pub(crate) fn with_replies(replies: Vec<&str>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .rev()
                        .map(|r| ChatResponse::Text(r.to_string()))
                        .collect(),
                ),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl ChatClient for ScriptedClient {
        fn chat_completion(&self, request: &ChatRequest) -> Result<ChatResponse> {
            self.requests.lock().push(request.clone());
            Ok(self
                .replies
                .lock()
                .pop()
                .unwrap_or_else(|| ChatResponse::Text("ok".to_string())))
        }
    }

    fn context_in(dir: &Path, client: Arc<ScriptedClient>) -> Arc<RunContext> {
        let workflow = Workflow::from_steps(
            dir.join("workflow.yml"),
            vec![StepNode::Named("a".to_string())],
        );
        Arc::new(RunContext::new(&workflow, Some("src/app.rs".to_string()), client))
    }

    #[test]
    fn test_settings_apply_only_set_fields() {
        let mut settings = StepSettings::default();
        settings.apply(&StepConfig {
            json: Some(true),
            ..StepConfig::default()
        });
        assert!(settings.json);
        assert!(settings.looping);
        assert_eq!(settings.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_prompt_step_prints_and_never_loops() {
        let dir = tempdir().unwrap();
        let client = Arc::new(ScriptedClient::with_replies(vec!["looks fine"]));
        let ctx = context_in(dir.path(), client.clone());

        let mut step = PromptStep::new(ctx.clone(), "Review this code");
        step.settings_mut().looping = true;
        let result = step.execute().unwrap();

        assert_eq!(result, json!("looks fine"));
        assert_eq!(ctx.final_output(), "looks fine");
        assert_eq!(ctx.transcript().len(), 2);
        assert!(!client.requests.lock()[0].loop_until_stop);
    }

    #[test]
    fn test_sidecar_step_renders_prompt_and_output() {
        let dir = tempdir().unwrap();
        let step_dir = dir.path().join("summarize");
        fs::create_dir(&step_dir).unwrap();
        fs::write(step_dir.join("prompt.md"), "Summarize {{file}}").unwrap();
        fs::write(step_dir.join("output.txt"), "Summary: {{response}}").unwrap();

        let client = Arc::new(ScriptedClient::with_replies(vec!["short"]));
        let ctx = context_in(dir.path(), client.clone());

        let step = SidecarStep::new(ctx.clone(), "summarize", &step_dir);
        assert_eq!(step.execute().unwrap(), json!("short"));

        assert_eq!(ctx.transcript()[0].content, "Summarize src/app.rs");
        assert_eq!(ctx.final_output(), "Summary: short");
    }

    #[test]
    fn test_sidecar_step_json_mode() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("prompt.md"), "Give JSON").unwrap();

        let client = Arc::new(ScriptedClient::with_replies(vec![r#"{"score": 4}"#, "not json"]));
        let ctx = context_in(dir.path(), client);

        let mut step = SidecarStep::new(ctx.clone(), "grade", dir.path());
        step.settings_mut().json = true;
        assert_eq!(step.execute().unwrap(), json!({"score": 4}));

        let err = step.execute().unwrap_err();
        assert_eq!(err.kind(), "execution");
    }

    #[test]
    fn test_sidecar_step_missing_prompt() {
        let dir = tempdir().unwrap();
        let ctx = context_in(dir.path(), Arc::new(ScriptedClient::default()));
        let step = SidecarStep::new(ctx, "empty", dir.path());
        assert!(step.execute().is_err());
    }

    #[test]
    fn test_script_step_sees_context() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("report.sh"),
            "echo \"$STEPWRIGHT_STEP on $STEPWRIGHT_TARGET\"\n",
        )
        .unwrap();
        let ctx = context_in(dir.path(), Arc::new(ScriptedClient::default()));

        let mut step = ScriptStep::new(ctx.clone(), "report", dir.path());
        step.settings_mut().print_response = true;
        assert_eq!(step.execute().unwrap(), json!("report on src/app.rs"));
        assert_eq!(ctx.final_output(), "report on src/app.rs");
    }

    #[test]
    fn test_script_step_failure() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("broken.sh"), "echo oops >&2\nexit 1\n").unwrap();
        let ctx = context_in(dir.path(), Arc::new(ScriptedClient::default()));

        let err = ScriptStep::new(ctx, "broken", dir.path()).execute().unwrap_err();
        assert_eq!(err.kind(), "execution");
        assert!(err.to_string().contains("oops"));
    }

    #[test]
    fn test_script_step_json_output() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("count.sh"), "echo '{\"n\": 2}'\n").unwrap();
        let ctx = context_in(dir.path(), Arc::new(ScriptedClient::default()));

        let mut step = ScriptStep::new(ctx, "count", dir.path());
        step.settings_mut().json = true;
        assert_eq!(step.execute().unwrap(), json!({"n": 2}));
    }
}
