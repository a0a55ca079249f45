//! Target Resources
//!
//! A workflow may run against a file, a directory, a URL, an API
//! endpoint, or nothing at all. The engine only needs the resource kind
//! for tagging step events, so detection here is deliberately shallow.

use std::fmt;
use std::path::Path;

use serde_json::Value;

/// Kind of target a workflow run is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    File,
    Directory,
    Url,
    Api,
    Command,
    None,
    Unknown,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Url => "url",
            Self::Api => "api",
            Self::Command => "command",
            Self::None => "none",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A detected workflow target.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub target: Option<String>,
    pub kind: ResourceKind,
}

impl Resource {
    /// Builds a resource for `target`, detecting its kind.
    pub fn for_target(target: Option<&str>) -> Self {
        Self {
            target: target.map(str::to_string),
            kind: detect_kind(target),
        }
    }

    /// Display name used in logs.
    pub fn name(&self) -> &str {
        self.target.as_deref().unwrap_or("Unnamed Resource")
    }
}

/// Determines the resource kind for a target string.
pub fn detect_kind(target: Option<&str>) -> ResourceKind {
    let Some(target) = target.map(str::trim).filter(|t| !t.is_empty()) else {
        return ResourceKind::None;
    };

    if target.starts_with("$(") && target.ends_with(')') {
        return ResourceKind::Command;
    }

    if ["http://", "https://", "ftp://"]
        .iter()
        .any(|scheme| target.starts_with(scheme))
    {
        return ResourceKind::Url;
    }

    let path = Path::new(target);
    if path.is_dir() {
        return ResourceKind::Directory;
    }

    if target.contains('*') || target.contains('?') {
        let matches: Vec<_> = glob::glob(target)
            .map(|paths| paths.filter_map(|p| p.ok()).collect())
            .unwrap_or_default();
        if matches.is_empty() {
            return ResourceKind::None;
        }
        if matches.iter().all(|p| p.is_dir()) {
            return ResourceKind::Directory;
        }
        return ResourceKind::File;
    }

    if path.exists() {
        return ResourceKind::File;
    }

    // Fetch-style API config: {"url": ..., "options": ...}
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(target) {
        if map.contains_key("url") && map.contains_key("options") {
            return ResourceKind::Api;
        }
    }

    ResourceKind::File
}
