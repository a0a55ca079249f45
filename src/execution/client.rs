//! Language-Model Client
//!
//! Prompt-driven steps talk to a language model through [`ChatClient`].
//! The crate ships [`CommandChatClient`], which hands each request to an
//! external command, so the engine itself carries no provider SDK.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, WorkflowError};
use crate::workflow::context::TranscriptEntry;

/// A chat-completion request.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub transcript: Vec<TranscriptEntry>,
    /// Keep calling until the model stops (tool-use loops)
    pub loop_until_stop: bool,
    /// Ask for a JSON response
    pub json: bool,
    pub params: IndexMap<String, Value>,
    /// Tool names the client may dispatch
    pub tools: Vec<String>,
}

/// A chat-completion reply.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ChatResponse {
    Text(String),
    /// Looping replies: one fragment per model turn
    Fragments(Vec<String>),
}

impl ChatResponse {
    /// Collapses the reply to text, joining fragments with newlines after
    /// dropping blank ones.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Fragments(parts) => parts
                .into_iter()
                .filter(|p| !p.trim().is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Synchronous chat-completion collaborator.
pub trait ChatClient: Send + Sync {
    fn chat_completion(&self, request: &ChatRequest) -> Result<ChatResponse>;
}

/// Client that fails every request; used when no model is configured.
pub struct UnconfiguredClient;

impl ChatClient for UnconfiguredClient {
    fn chat_completion(&self, request: &ChatRequest) -> Result<ChatResponse> {
        Err(WorkflowError::Model(format!(
            "no model client configured for '{}'. Pass --model-command or set STEPWRIGHT_MODEL_COMMAND",
            request.model
        )))
    }
}

/// Client that runs a shell command per request.
///
/// The request is written to the command's stdin as JSON. Stdout is read
/// back as a JSON string or array of strings, falling back to raw text.
pub struct CommandChatClient {
    command: String,
    working_dir: Option<PathBuf>,
}

impl CommandChatClient {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl ChatClient for CommandChatClient {
    fn chat_completion(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let payload = serde_json::to_vec(request)?;
        debug!(
            "Sending {} transcript entries to '{}' (model: {})",
            request.transcript.len(),
            self.command,
            request.model
        );

        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| WorkflowError::Model(format!("failed to start '{}': {}", self.command, e)))?;
        if let Some(mut stdin) = child.stdin.take() {
            // Commands that ignore stdin may exit before reading it
            if let Err(e) = stdin.write_all(&payload) {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
            }
        }
        let output = child.wait_with_output()?;

        if !output.status.success() {
            return Err(WorkflowError::Model(format!(
                "'{}' exited with {:?}: {}",
                self.command,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        Ok(serde_json::from_str(&stdout).unwrap_or(ChatResponse::Text(stdout)))
    }
}
