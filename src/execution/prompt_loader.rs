//! Sidecar Prompt Discovery
//!
//! Finds the prompt file that sits next to a step (or workflow) and
//! specializes it by the target's file extension.
//!
//! For a step named `lint` run against `src/app.ts`, candidates are tried
//! in this order:
//!
//! 1. `lint.ts.md`, then `prompt.ts.md`
//! 2. combined forms such as `lint.ts+tsx.md` or `prompt.js+ts.md`
//! 3. `lint.md`, then `prompt.md`

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::Result;

/// Reads the sidecar prompt for `name` in `dir`, if one exists.
pub fn load_prompt(dir: &Path, name: &str, target: Option<&str>) -> Result<Option<String>> {
    match find_prompt_path(dir, name, target) {
        Some(path) => {
            debug!("Loading prompt for '{}' from {}", name, path.display());
            Ok(Some(fs::read_to_string(path)?))
        }
        None => {
            warn!("Prompt file for {} not found in {}", name, dir.display());
            Ok(None)
        }
    }
}

/// Locates the most specific prompt file for `name` in `dir`.
pub fn find_prompt_path(dir: &Path, name: &str, target: Option<&str>) -> Option<PathBuf> {
    let extensions = target.map(target_extensions).unwrap_or_default();

    for ext in &extensions {
        for base in [name, "prompt"] {
            let path = dir.join(format!("{}.{}.md", base, ext));
            if path.is_file() {
                return Some(path);
            }
        }
    }

    if !extensions.is_empty() {
        if let Some(path) = find_combined(dir, name, &extensions) {
            return Some(path);
        }
    }

    [format!("{}.md", name), "prompt.md".to_string()]
        .into_iter()
        .map(|file| dir.join(file))
        .find(|path| path.is_file())
}

/// Extensions a target is specialized by.
///
/// `app.ts` yields `["ts"]`; a prompt-style name like `notes.ts+tsx.md`
/// yields `["ts", "tsx"]`.
pub fn target_extensions(target: &str) -> Vec<String> {
    let basename = Path::new(target)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(target);

    if let Some(without_md) = basename.strip_suffix(".md") {
        if basename.matches('.').count() > 1 {
            return without_md
                .split_once('.')
                .map(|(_, exts)| exts.split('+').map(str::to_string).collect())
                .unwrap_or_default();
        }
    }

    Path::new(basename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| vec![e.to_string()])
        .unwrap_or_default()
}

fn find_combined(dir: &Path, name: &str, extensions: &[String]) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    for base in [name, "prompt"] {
        let pattern = dir.join(format!("{}.*+*.md", glob::Pattern::escape(base)));
        if let Ok(paths) = glob::glob(&pattern.to_string_lossy()) {
            candidates.extend(paths.filter_map(|p| p.ok()));
        }
    }

    candidates.into_iter().find(|path| {
        let stem = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(".md"))
            .unwrap_or_default();
        stem.split_once('.')
            .map(|(_, exts)| exts.split('+').any(|e| extensions.iter().any(|x| x == e)))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(dir: &Path, file: &str) {
        fs::write(dir.join(file), file).unwrap();
    }

    #[test]
    fn test_target_extensions() {
        assert_eq!(target_extensions("src/app.ts"), vec!["ts"]);
        assert_eq!(target_extensions("notes.ts+tsx.md"), vec!["ts", "tsx"]);
        assert_eq!(target_extensions("README.md"), vec!["md"]);
        assert!(target_extensions("Makefile").is_empty());
    }

    #[test]
    fn test_specialized_prompt_preferred() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "lint.ts.md");
        touch(dir.path(), "prompt.md");

        let path = find_prompt_path(dir.path(), "lint", Some("app.ts")).unwrap();
        assert!(path.ends_with("lint.ts.md"));
    }

    #[test]
    fn test_combined_prompt() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "prompt.js+tsx.md");
        touch(dir.path(), "lint.md");

        let path = find_prompt_path(dir.path(), "lint", Some("view.tsx")).unwrap();
        assert!(path.ends_with("prompt.js+tsx.md"));
    }

    #[test]
    fn test_general_fallbacks() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "prompt.md");
        let path = find_prompt_path(dir.path(), "lint", Some("app.rb")).unwrap();
        assert!(path.ends_with("prompt.md"));

        touch(dir.path(), "lint.md");
        let path = find_prompt_path(dir.path(), "lint", None).unwrap();
        assert!(path.ends_with("lint.md"));
    }

    #[test]
    fn test_load_prompt_missing() {
        let dir = tempdir().unwrap();
        assert!(load_prompt(dir.path(), "lint", None).unwrap().is_none());
    }

    #[test]
    fn test_load_prompt_contents() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("prompt.md"), "Review {{file}}").unwrap();
        assert_eq!(
            load_prompt(dir.path(), "lint", None).unwrap().as_deref(),
            Some("Review {{file}}")
        );
    }
}
