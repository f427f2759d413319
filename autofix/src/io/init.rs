//! `.autofix/` layout and `autofix init` scaffolding.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::io::config::{AutofixConfig, write_config};
use crate::io::git::Git;

const EXCLUDE_ENTRY: &str = "/.autofix/";

/// Canonical paths within `.autofix/` for a repository root.
#[derive(Debug, Clone)]
pub struct AutofixPaths {
    pub root: PathBuf,
    pub autofix_dir: PathBuf,
    pub config_path: PathBuf,
    pub runs_dir: PathBuf,
}

impl AutofixPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let autofix_dir = root.join(".autofix");
        Self {
            root,
            config_path: autofix_dir.join("config.toml"),
            runs_dir: autofix_dir.join("runs"),
            autofix_dir,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Overwrite an existing config file.
    pub force: bool,
}

/// Write the default config and keep `.autofix/` out of commits.
///
/// Fails if the config already exists unless `options.force` is set.
pub fn init_autofix(git: &Git, options: &InitOptions) -> Result<AutofixPaths> {
    let paths = AutofixPaths::new(git.workdir());
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "autofix init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }
    write_config(&paths.config_path, &AutofixConfig::default())?;
    fs::create_dir_all(&paths.runs_dir)
        .with_context(|| format!("create directory {}", paths.runs_dir.display()))?;
    ensure_excluded(git)?;
    Ok(paths)
}

/// Add `.autofix/` to `.git/info/exclude` once.
pub fn ensure_excluded(git: &Git) -> Result<()> {
    let exclude = git.git_path("info/exclude")?;
    let existing = match fs::read_to_string(&exclude) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err).with_context(|| format!("read {}", exclude.display())),
    };
    if existing.lines().any(|line| is_autofix_entry(line.trim())) {
        return Ok(());
    }
    if let Some(parent) = exclude.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(EXCLUDE_ENTRY);
    updated.push('\n');
    debug!(path = %exclude.display(), "excluding .autofix/");
    fs::write(&exclude, updated).with_context(|| format!("write {}", exclude.display()))
}

fn is_autofix_entry(line: &str) -> bool {
    matches!(line, "/.autofix/" | ".autofix/" | "/.autofix" | ".autofix")
}
