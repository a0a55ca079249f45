//! Session Directories
//!
//! Maps a session name and a target to a directory under
//! `.stepwright/sessions/` and manages the timestamped run attempts
//! inside it:
//!
//! ```text
//! .stepwright/sessions/<session>/<target basename>_<md5 prefix>/
//!     .gitignore
//!     20240501_101500_123/
//!         step_000_analyze.json
//!         final_output.txt
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::debug;
use md5::{Digest, Md5};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;

/// Directory holding all tool state inside the project root.
pub const STATE_DIR: &str = ".stepwright";

static TIMESTAMP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{8}_\d{6}_\d{3}$").expect("constant regex pattern is valid"));

/// Returns true if `value` is a `YYYYMMDD_HHMMSS_LLL` session timestamp.
pub fn is_valid_timestamp(value: &str) -> bool {
    TIMESTAMP.is_match(value)
}

/// Mints a session timestamp for the current UTC time.
pub fn new_timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}

/// Lowercase, underscore-separated form of `value` safe for directory names.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_separator = false;

    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.push(c.to_ascii_lowercase());
        } else if c == '_' {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.push('_');
        } else {
            pending_separator = true;
        }
    }

    slug.trim_matches('_').to_string()
}

/// Resolves session directories relative to a project root.
#[derive(Debug, Clone)]
pub struct SessionManager {
    root: PathBuf,
}

impl SessionManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Manager rooted at the process working directory.
    pub fn in_current_dir() -> Self {
        Self::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory grouping every run attempt of one session and target.
    pub fn workflow_directory(&self, session_name: &str, target: &str) -> PathBuf {
        let digest = format!("{:x}", Md5::digest(target.as_bytes()));
        let basename = Path::new(target)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(target);

        self.root
            .join(STATE_DIR)
            .join("sessions")
            .join(slugify(session_name))
            .join(format!("{}_{}", slugify(basename), &digest[..8]))
    }

    /// Creates (if needed) and returns the directory for one run attempt.
    pub fn ensure_session_directory(
        &self,
        session_name: &str,
        target: &str,
        timestamp: &str,
    ) -> Result<PathBuf> {
        let workflow_dir = self.workflow_directory(session_name, target);
        fs::create_dir_all(&workflow_dir)?;

        let gitignore = workflow_dir.join(".gitignore");
        if !gitignore.exists() {
            fs::write(&gitignore, "*")?;
        }

        let session_dir = workflow_dir.join(timestamp);
        fs::create_dir_all(&session_dir)?;
        Ok(session_dir)
    }

    /// Finds an existing run attempt: the given timestamp exactly, or the
    /// most recent one.
    pub fn find_session_directory(
        &self,
        session_name: &str,
        target: &str,
        timestamp: Option<&str>,
    ) -> Option<PathBuf> {
        let workflow_dir = self.workflow_directory(session_name, target);
        if !workflow_dir.is_dir() {
            debug!("No session directory at {}", workflow_dir.display());
            return None;
        }

        match timestamp {
            Some(ts) => {
                let dir = workflow_dir.join(ts);
                dir.is_dir().then_some(dir)
            }
            None => self.latest_session(&workflow_dir),
        }
    }

    fn latest_session(&self, workflow_dir: &Path) -> Option<PathBuf> {
        let mut sessions: Vec<String> = fs::read_dir(workflow_dir)
            .ok()?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| is_valid_timestamp(name))
            .collect();

        sessions.sort();
        sessions.pop().map(|name| workflow_dir.join(name))
    }
}
