//! Snapshot Persistence
//!
//! Writes one JSON snapshot per completed step and reads them back for
//! replay. Snapshot files are named `step_NNN_<step>.json`, so listing a
//! session directory by sequence number yields execution order.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use super::manager::{new_timestamp, SessionManager};
use crate::error::Result;
use crate::workflow::context::RunContext;
use crate::workflow::state::StateSnapshot;

/// Name of the run report inside a session timestamp directory.
pub const FINAL_OUTPUT_FILE: &str = "final_output.txt";

/// Durable storage for run snapshots.
pub trait StateRepository: Send + Sync {
    /// Persists the context as of the end of `step_name`.
    ///
    /// Failures are logged and never reach the caller.
    fn save_snapshot(&self, context: &RunContext, step_name: &str);

    /// Loads the snapshot taken immediately before `step_name`.
    ///
    /// `Ok(None)` means no session, no matching step, or the step was
    /// the first one recorded.
    fn load_state_before_step(
        &self,
        context: &RunContext,
        step_name: &str,
        timestamp: Option<&str>,
    ) -> Result<Option<StateSnapshot>>;

    /// Writes the run report; returns the path on success.
    fn save_final_output(&self, context: &RunContext, content: &str) -> Option<PathBuf>;
}

/// Filesystem-backed [`StateRepository`].
pub struct FileStateRepository {
    sessions: SessionManager,
    write_lock: Mutex<()>,
}

impl FileStateRepository {
    pub fn new(sessions: SessionManager) -> Self {
        Self {
            sessions,
            write_lock: Mutex::new(()),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Directory of the context's current run attempt, minting a
    /// timestamp if the run has none yet.
    fn current_session_dir(&self, context: &RunContext, session_name: &str) -> Result<PathBuf> {
        let timestamp = context.session_timestamp_or_insert_with(new_timestamp);
        self.sessions
            .ensure_session_directory(session_name, &context.session_target(), &timestamp)
    }

    fn write_snapshot(&self, context: &RunContext, session_name: &str, step_name: &str) -> Result<PathBuf> {
        let _guard = self.write_lock.lock();

        let session_dir = self.current_session_dir(context, session_name)?;
        let mut snapshot = context.snapshot(step_name);
        snapshot.order = find_step_files(&session_dir)?.len();

        let path = session_dir.join(snapshot_file_name(snapshot.order, step_name));
        fs::write(&path, serde_json::to_string_pretty(&snapshot)?)?;
        Ok(path)
    }

    /// Copies the snapshots a replay resumes from into a fresh run attempt.
    fn copy_to_new_session(
        &self,
        context: &RunContext,
        session_name: &str,
        source_dir: &Path,
        files: &[PathBuf],
    ) -> Result<()> {
        let _guard = self.write_lock.lock();

        let timestamp = new_timestamp();
        context.set_session_timestamp(timestamp.clone());
        let target_dir =
            self.sessions
                .ensure_session_directory(session_name, &context.session_target(), &timestamp)?;
        if target_dir == source_dir {
            return Ok(());
        }

        for file in files {
            if let Some(name) = file.file_name() {
                fs::copy(file, target_dir.join(name))?;
            }
        }
        debug!("Copied {} snapshots into {}", files.len(), target_dir.display());
        Ok(())
    }
}

impl StateRepository for FileStateRepository {
    fn save_snapshot(&self, context: &RunContext, step_name: &str) {
        let Some(session_name) = context.session_name() else {
            return;
        };

        match self.write_snapshot(context, session_name, step_name) {
            Ok(path) => debug!("Saved state for step {} to {}", step_name, path.display()),
            Err(e) => error!("Failed to save state for step {}: {}", step_name, e),
        }
    }

    fn load_state_before_step(
        &self,
        context: &RunContext,
        step_name: &str,
        timestamp: Option<&str>,
    ) -> Result<Option<StateSnapshot>> {
        let Some(session_name) = context.session_name() else {
            return Ok(None);
        };

        let Some(session_dir) =
            self.sessions
                .find_session_directory(session_name, &context.session_target(), timestamp)
        else {
            warn!("No session found for {}", session_name);
            return Ok(None);
        };

        let step_files = find_step_files(&session_dir)?;
        let Some(index) = find_step_before(&step_files, step_name) else {
            warn!("No state before step {} (it may be the first step)", step_name);
            return Ok(None);
        };

        let state_file = &step_files[index];
        let snapshot: StateSnapshot = serde_json::from_str(&fs::read_to_string(state_file)?)?;
        info!(
            "Found state from step: {} (will replay from here to {})",
            snapshot.step_name, step_name
        );

        if timestamp.is_none() && context.session_timestamp().is_none() {
            self.copy_to_new_session(context, session_name, &session_dir, &step_files[..=index])?;
        }

        Ok(Some(snapshot))
    }

    fn save_final_output(&self, context: &RunContext, content: &str) -> Option<PathBuf> {
        if content.is_empty() {
            return None;
        }
        let session_name = context.session_name()?;

        let result = self.current_session_dir(context, session_name).and_then(|dir| {
            let path = dir.join(FINAL_OUTPUT_FILE);
            fs::write(&path, content)?;
            Ok(path)
        });

        match result {
            Ok(path) => {
                info!("Final output saved to: {}", path.display());
                Some(path)
            }
            Err(e) => {
                error!("Failed to save final output: {}", e);
                None
            }
        }
    }
}

/// `step_NNN_<name>.json`, with path separators in `name` percent-encoded.
pub fn snapshot_file_name(order: usize, step_name: &str) -> String {
    format!("step_{:03}_{}.json", order, file_safe(step_name))
}

fn file_safe(step_name: &str) -> String {
    let mut encoded = String::with_capacity(step_name.len());
    for c in step_name.chars() {
        match c {
            '%' => encoded.push_str("%25"),
            '/' => encoded.push_str("%2F"),
            '\\' => encoded.push_str("%5C"),
            c => encoded.push(c),
        }
    }
    encoded
}

/// Snapshot files in `dir`, ordered by sequence number.
pub fn find_step_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<(usize, PathBuf)> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?;
            let order = parse_order(name)?;
            Some((order, path))
        })
        .collect();

    files.sort_by_key(|(order, _)| *order);
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

fn parse_order(file_name: &str) -> Option<usize> {
    parse_file_name(file_name).map(|(order, _)| order)
}

/// Splits `step_NNN_<name>.json` into its order and encoded step name.
fn parse_file_name(file_name: &str) -> Option<(usize, &str)> {
    let rest = file_name.strip_prefix("step_")?.strip_suffix(".json")?;
    let (digits, name) = rest.split_once('_')?;
    Some((digits.parse().ok()?, name))
}

/// Index of the snapshot preceding the one recorded for `step_name`.
///
/// `None` if the step was never recorded or was recorded first.
pub fn find_step_before(step_files: &[PathBuf], step_name: &str) -> Option<usize> {
    let encoded = file_safe(step_name);
    let index = step_files.iter().position(|path| {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_file_name)
            .is_some_and(|(_, name)| name == encoded)
    })?;
    index.checked_sub(1)
}
