//! Repair configuration stored under `.autofix/config.toml`.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::error::FatalError;
use crate::core::types::EditFormat;
use crate::io::git::Identity;

/// Repair configuration (TOML).
///
/// Edited by humans; every field has a default so a partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AutofixConfig {
    /// Fix cycles allowed after the first failing build.
    pub max_fix_attempts: u32,

    /// Hard cap on model invocations for a whole run.
    pub max_model_calls: u32,

    /// Run the build once before the change to capture pre-existing failures.
    pub run_baseline: bool,

    /// Edit representation requested from the model.
    pub edit_format: EditFormat,

    /// File extensions structured edits may write (without the dot).
    pub allowed_extensions: BTreeSet<String>,

    pub build_timeout_secs: u64,
    pub model_timeout_secs: u64,

    /// Truncate captured build/model output beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Upper bound for one rendered user prompt.
    pub prompt_budget_bytes: usize,

    pub build: BuildConfig,
    pub model: ModelConfig,
    pub context: ContextConfig,
    pub git: GitConfig,
    pub handoff: HandoffConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildConfig {
    /// Build/test command, e.g. `["./gradlew","build"]`.
    pub command: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: vec!["./gradlew".to_string(), "build".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Transport command. `{model}`, `{effort}` and `{output}` are substituted
    /// in each argument; prompts are written to stdin.
    pub command: Vec<String>,
    pub primary: String,
    pub fallback: Option<String>,
    pub lenient_effort: String,
    pub strict_effort: String,
    /// Environment variables that must be set before a run starts.
    pub required_env: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            command: [
                "codex",
                "exec",
                "--model",
                "{model}",
                "-c",
                "model_reasoning_effort={effort}",
                "--output-last-message",
                "{output}",
                "-",
            ]
            .map(str::to_string)
            .to_vec(),
            primary: "gpt-5-mini".to_string(),
            fallback: Some("gpt-5".to_string()),
            lenient_effort: "low".to_string(),
            strict_effort: "high".to_string(),
            required_env: vec!["OPENAI_API_KEY".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContextConfig {
    /// Bytes sampled from the start of each file.
    pub per_file_bytes: usize,
    /// Directory names skipped anywhere in the tree.
    pub skip_dirs: Vec<String>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            per_file_bytes: 8000,
            skip_dirs: [".git", ".autofix", ".gradle", "build", "target", "node_modules"]
                .map(str::to_string)
                .to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct GitConfig {
    /// Committer name; the repository's own identity is used when unset.
    pub author_name: Option<String>,
    pub author_email: Option<String>,
}

impl GitConfig {
    /// Identity for commits, present only when both fields are set.
    pub fn identity(&self) -> Option<Identity> {
        match (&self.author_name, &self.author_email) {
            (Some(name), Some(email)) if !name.trim().is_empty() && !email.trim().is_empty() => {
                Some(Identity {
                    name: name.clone(),
                    email: email.clone(),
                })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct HandoffConfig {
    /// Command run in the repository root after a green build. Empty disables.
    pub command: Vec<String>,
}

impl Default for AutofixConfig {
    fn default() -> Self {
        Self {
            max_fix_attempts: 3,
            max_model_calls: 12,
            run_baseline: true,
            edit_format: EditFormat::Edits,
            allowed_extensions: [
                "java",
                "kt",
                "kts",
                "gradle",
                "xml",
                "properties",
                "yml",
                "yaml",
                "json",
                "toml",
                "md",
                "txt",
                "rs",
            ]
            .map(str::to_string)
            .into_iter()
            .collect(),
            build_timeout_secs: 20 * 60,
            model_timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
            prompt_budget_bytes: 120_000,
            build: BuildConfig::default(),
            model: ModelConfig::default(),
            context: ContextConfig::default(),
            git: GitConfig::default(),
            handoff: HandoffConfig::default(),
        }
    }
}

impl AutofixConfig {
    pub fn validate(&self) -> Result<(), FatalError> {
        let invalid = |msg: &str| Err(FatalError::InvalidConfig(msg.to_string()));
        if self.build_timeout_secs == 0 {
            return invalid("build_timeout_secs must be > 0");
        }
        if self.model_timeout_secs == 0 {
            return invalid("model_timeout_secs must be > 0");
        }
        if self.output_limit_bytes == 0 {
            return invalid("output_limit_bytes must be > 0");
        }
        if self.prompt_budget_bytes == 0 {
            return invalid("prompt_budget_bytes must be > 0");
        }
        if self.context.per_file_bytes == 0 {
            return invalid("context.per_file_bytes must be > 0");
        }
        if is_blank_command(&self.build.command) {
            return invalid("build.command must be a non-empty array");
        }
        if is_blank_command(&self.model.command) {
            return invalid("model.command must be a non-empty array");
        }
        if self.model.primary.trim().is_empty() {
            return invalid("model.primary must be set");
        }
        if self.allowed_extensions.is_empty() {
            return invalid("allowed_extensions must not be empty");
        }
        if self.git.author_name.is_some() != self.git.author_email.is_some() {
            return invalid("git.author_name and git.author_email must be set together");
        }
        Ok(())
    }
}

fn is_blank_command(command: &[String]) -> bool {
    command.first().is_none_or(|program| program.trim().is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AutofixConfig::default()`.
pub fn load_config(path: &Path) -> Result<AutofixConfig> {
    if !path.exists() {
        let cfg = AutofixConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AutofixConfig = toml::from_str(&contents)
        .map_err(|err| FatalError::InvalidConfig(format!("{}: {err}", path.display())))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AutofixConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
