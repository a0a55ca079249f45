//! Shell and Glob Step Execution
//!
//! Handles the leaf steps that never reach the resolver:
//! - `$(command)` wrappers run through bash with stdout captured
//! - Glob patterns expanded against the filesystem
//!
//! Also runs scripted-unit files for the resolver's script steps.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use log::{debug, error, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, WorkflowError};

static COMMAND_WRAPPER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\$\((.*)\)$").expect("constant regex pattern is valid"));

/// Returns the inner command of a `$(...)` wrapper.
pub fn extract_command(step: &str) -> Result<&str> {
    COMMAND_WRAPPER
        .captures(step.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| WorkflowError::Command {
            command: step.to_string(),
            message: "Missing closing parentheses".to_string(),
        })
}

/// Runs a `$(...)` step and returns its raw stdout.
///
/// The output is captured whatever the exit status; a non-zero exit is
/// only logged.
pub fn run_command_step(step: &str, working_dir: Option<&Path>) -> Result<String> {
    let command = extract_command(step)?;

    let mut cmd = Command::new("bash");
    cmd.arg("-c").arg(command);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
        debug!("Executing in directory: {}", dir.display());
    }

    let output = cmd.output().map_err(|e| WorkflowError::Command {
        command: command.to_string(),
        message: e.to_string(),
    })?;

    if !output.status.success() {
        warn!(
            "Command '{}' exited with code {:?}",
            command,
            output.status.code()
        );
        log_stderr(&output);
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Expands a glob pattern into a newline-joined list of matches.
///
/// Relative patterns are matched against `working_dir` when given and the
/// matches are reported relative to it.
pub fn expand_glob(pattern: &str, working_dir: Option<&Path>) -> String {
    let full_pattern = match working_dir {
        Some(dir) if !Path::new(pattern).is_absolute() => dir.join(pattern).to_string_lossy().into_owned(),
        _ => pattern.to_string(),
    };

    let paths = match glob::glob(&full_pattern) {
        Ok(paths) => paths,
        Err(e) => {
            warn!("Invalid glob pattern '{}': {}", pattern, e.msg);
            return String::new();
        }
    };

    paths
        .filter_map(|result| result.ok())
        .map(|path| match working_dir {
            Some(dir) => path
                .strip_prefix(dir)
                .map(Path::to_path_buf)
                .unwrap_or(path),
            None => path,
        })
        .map(|path| path.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Executes a script file directly with bash.
pub fn execute_with_bash(
    script_path: &Path,
    working_dir: Option<&Path>,
    env: &HashMap<String, String>,
) -> Result<Output> {
    let mut cmd = Command::new("bash");
    cmd.arg(script_path).envs(env);

    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
        debug!("Executing {} in directory: {}", script_path.display(), dir.display());
    }

    Ok(cmd.output()?)
}

/// Path of a scripted unit named `step_name` inside `dir`.
pub fn script_path(dir: &Path, step_name: &str) -> PathBuf {
    dir.join(format!("{}.sh", step_name))
}

fn log_stderr(output: &Output) {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        error!("stderr:\n{}", stderr);
    }
}
