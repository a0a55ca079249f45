//! Stepwright CLI Entry Point
//!
//! Provides command-line interface for workflow execution.
//!
//! # Usage
//!
//! ```bash
//! # Run a workflow against its declared target
//! stepwright review/workflow.yml
//!
//! # Run against a specific file, answering prompts with a local command
//! stepwright review/workflow.yml --target src/lib.rs --model-command ./ask-model
//!
//! # Resume the latest session from the snapshot before `summarize`
//! stepwright review/workflow.yml --replay summarize
//!
//! # Resume a specific session
//! stepwright review/workflow.yml --replay 20240501_101500_123:summarize
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use log::{error, info};

use stepwright::execution::client::{ChatClient, CommandChatClient, UnconfiguredClient};
use stepwright::execution::engine::write_output_file;
use stepwright::execution::WorkflowRunner;
use stepwright::monitoring::ExecutionTimeline;
use stepwright::session::{FileStateRepository, ReplayTarget, SessionManager};
use stepwright::workflow::parser::load_workflow;
use stepwright::{APP_NAME, VERSION};

/// Environment variable consulted when `--model-command` is not given.
const MODEL_COMMAND_ENV: &str = "STEPWRIGHT_MODEL_COMMAND";

/// Command-line configuration parsed from arguments.
#[derive(Debug, Default)]
struct Config {
    workflow_path: Option<String>,
    target: Option<String>,
    replay: Option<String>,
    output: Option<PathBuf>,
    session_name: Option<String>,
    model_command: Option<String>,
    working_dir: Option<PathBuf>,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    eprintln!();
    eprintln!("{} v{}", APP_NAME.bold(), VERSION);
    eprintln!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: stepwright [OPTIONS] <WORKFLOW_FILE>");
    println!();
    println!("Arguments:");
    println!("  <WORKFLOW_FILE>        Path to workflow YAML file");
    println!();
    println!("Options:");
    println!("  --target T             Run against T instead of the declared target");
    println!("  --replay [TS:]STEP     Resume from the snapshot taken before STEP");
    println!("  --output PATH          Write the final output to PATH");
    println!("  --session-name NAME    Override the session name");
    println!("  --model-command CMD    Shell command answering model requests");
    println!("                         (default: ${})", MODEL_COMMAND_ENV);
    println!("  --working-dir PATH     Directory shell steps run in");
    println!("  --verbose              Enable debug logging and print a timeline");
    println!("  --help                 Show this help message");
    println!("  --version              Show version information");
    println!();
    println!("Examples:");
    println!("  stepwright review/workflow.yml --target src/lib.rs");
    println!("  stepwright review/workflow.yml --replay summarize");
    println!("  stepwright review/workflow.yml --replay 20240501_101500_123:summarize");
}

/// Returns the value following an option, advancing the cursor.
fn option_value(args: &[String], i: &mut usize, option: &str) -> Result<String, String> {
    *i += 1;
    args.get(*i)
        .cloned()
        .ok_or_else(|| format!("{} requires a value", option))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--target" | "-t" => {
                config.target = Some(option_value(args, &mut i, arg)?);
            }
            "--replay" | "-r" => {
                config.replay = Some(option_value(args, &mut i, arg)?);
            }
            "--output" | "-o" => {
                config.output = Some(PathBuf::from(option_value(args, &mut i, arg)?));
            }
            "--session-name" => {
                config.session_name = Some(option_value(args, &mut i, arg)?);
            }
            "--model-command" => {
                config.model_command = Some(option_value(args, &mut i, arg)?);
            }
            "--working-dir" => {
                config.working_dir = Some(PathBuf::from(option_value(args, &mut i, arg)?));
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if config.workflow_path.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.workflow_path = Some(arg.clone());
            }
        }
        i += 1;
    }

    if config.workflow_path.is_none() {
        return Err("Missing <WORKFLOW_FILE>".to_string());
    }

    Ok(config)
}

/// Validates the working directory.
fn check_working_directory(dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !dir.exists() {
        return Err(format!("Working directory does not exist: {}", dir.display()).into());
    }
    if !dir.is_dir() {
        return Err(format!("Path is not a directory: {}", dir.display()).into());
    }
    info!("Working directory: {}", dir.display());
    Ok(())
}

/// Builds the model client from the flag or the environment.
fn model_client(command: Option<String>, working_dir: Option<&PathBuf>) -> Arc<dyn ChatClient> {
    match command.or_else(|| env::var(MODEL_COMMAND_ENV).ok()) {
        Some(command) => {
            let mut client = CommandChatClient::new(command);
            if let Some(dir) = working_dir {
                client = client.with_working_dir(dir);
            }
            Arc::new(client)
        }
        None => Arc::new(UnconfiguredClient),
    }
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    // Replay arguments are validated before anything touches the disk
    let replay = config
        .replay
        .as_deref()
        .map(ReplayTarget::parse)
        .transpose()?;

    setup_logging(config.verbose);
    print_banner();

    if let Some(dir) = &config.working_dir {
        check_working_directory(dir)?;
    }

    let workflow_path = config.workflow_path.unwrap_or_default();
    info!("Loading workflow: {}", workflow_path);
    let workflow = load_workflow(&workflow_path).map_err(|e| {
        error!("Failed to load workflow: {}", e);
        format!("Could not load workflow from '{}': {}", workflow_path, e)
    })?;

    info!(
        "Workflow loaded: {} ({} steps)",
        workflow.name,
        workflow.len()
    );

    let client = model_client(config.model_command, config.working_dir.as_ref());
    let repository = Arc::new(FileStateRepository::new(SessionManager::in_current_dir()));
    let timeline = Arc::new(ExecutionTimeline::new());

    let mut runner = WorkflowRunner::new(workflow, client, repository);
    if let Some(target) = config.target {
        runner.set_target(target);
    }
    if let Some(name) = config.session_name {
        runner.set_session_name(name);
    }
    if let Some(dir) = config.working_dir {
        runner.set_working_dir(dir);
    }
    runner.add_event_sink(timeline.clone());

    if let Some(target) = &replay {
        info!("Replaying from: {}", target);
    }

    let outcomes = runner.run(replay.as_ref())?;
    let report = outcomes
        .iter()
        .map(|o| o.final_output.as_str())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    eprintln!("{}", "Workflow complete".green().bold());
    if config.verbose {
        eprintln!("{}", timeline.gantt_chart());
    }

    match config.output {
        Some(path) => {
            write_output_file(&path, &report)?;
            println!("Results saved to {}", path.display());
        }
        None => println!("{}", report),
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("stepwright")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_parse_full_arguments() {
        let config = parse_arguments(&args(&[
            "wf.yml",
            "--target",
            "src/lib.rs",
            "--replay",
            "summarize",
            "--output",
            "out.txt",
            "--session-name",
            "nightly",
            "--model-command",
            "./ask",
            "--verbose",
        ]))
        .unwrap();

        assert_eq!(config.workflow_path.as_deref(), Some("wf.yml"));
        assert_eq!(config.target.as_deref(), Some("src/lib.rs"));
        assert_eq!(config.replay.as_deref(), Some("summarize"));
        assert_eq!(config.output, Some(PathBuf::from("out.txt")));
        assert_eq!(config.session_name.as_deref(), Some("nightly"));
        assert_eq!(config.model_command.as_deref(), Some("./ask"));
        assert!(config.verbose);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_arguments(&args(&[])).is_err());
        assert!(parse_arguments(&args(&["wf.yml", "--target"])).is_err());
        assert!(parse_arguments(&args(&["wf.yml", "--bogus"])).is_err());
        assert!(parse_arguments(&args(&["a.yml", "b.yml"])).is_err());
    }
}
