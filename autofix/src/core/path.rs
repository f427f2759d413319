//! Lexical checks on model-supplied repository paths.
//!
//! These checks need no filesystem access; `io::apply_edits` adds the checks
//! that do (canonical containment, symlinks).

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

/// Top-level directories no edit may touch.
pub const PROTECTED_DIRS: [&str; 2] = [".git", ".autofix"];

/// Validate a repository-relative path and return it in normalized form
/// (no `.` components).
pub fn normalize_relative(candidate: &str) -> Result<PathBuf, String> {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return Err("path is empty".to_string());
    }
    let path = Path::new(trimmed);
    if path.is_absolute() || trimmed.starts_with('/') || trimmed.starts_with('\\') {
        return Err("absolute paths are not allowed".to_string());
    }

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err("parent traversal is not allowed".to_string()),
            Component::RootDir | Component::Prefix(_) => {
                return Err("absolute paths are not allowed".to_string());
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err("path names the repository root".to_string());
    }

    if let Some(Component::Normal(first)) = normalized.components().next()
        && PROTECTED_DIRS.iter().any(|dir| first == *dir)
    {
        return Err(format!("{} is a protected directory", first.to_string_lossy()));
    }
    Ok(normalized)
}

/// Case-insensitive extension membership. Paths without an extension fail.
pub fn extension_allowed(path: &Path, allowed: &BTreeSet<String>) -> bool {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    allowed
        .iter()
        .any(|candidate| candidate.trim_start_matches('.').eq_ignore_ascii_case(&ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow(exts: &[&str]) -> BTreeSet<String> {
        exts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn relative_path_is_normalized() {
        assert_eq!(
            normalize_relative("./src/./main.rs"),
            Ok(PathBuf::from("src/main.rs"))
        );
    }

    #[test]
    fn parent_traversal_is_rejected() {
        assert!(normalize_relative("../outside.rs").is_err());
        assert!(normalize_relative("src/../../outside.rs").is_err());
    }

    #[test]
    fn absolute_path_is_rejected() {
        assert!(normalize_relative("/etc/passwd").is_err());
    }

    #[test]
    fn protected_dirs_are_rejected() {
        assert!(normalize_relative(".git/config").is_err());
        assert!(normalize_relative("./.autofix/config.toml").is_err());
        assert!(normalize_relative("docs/.git-notes.md").is_ok());
    }

    #[test]
    fn dot_only_path_is_rejected() {
        assert!(normalize_relative(".").is_err());
        assert!(normalize_relative("  ").is_err());
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        let allowed = allow(&["java", ".kt"]);
        assert!(extension_allowed(Path::new("A.JAVA"), &allowed));
        assert!(extension_allowed(Path::new("b/c.kt"), &allowed));
        assert!(!extension_allowed(Path::new("Makefile"), &allowed));
        assert!(!extension_allowed(Path::new("run.sh"), &allowed));
    }
}
