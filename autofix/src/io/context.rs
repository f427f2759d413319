//! Repository context for prompts: a file index plus bounded source samples.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::core::path::extension_allowed;
use crate::core::text::truncate_to_boundary;

#[derive(Debug, Clone)]
pub struct ContextOptions<'a> {
    pub allowed_extensions: &'a BTreeSet<String>,
    /// Directory names skipped at any depth.
    pub skip_dirs: &'a [String],
    pub per_file_bytes: usize,
    /// Upper bound for all samples together.
    pub total_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSample {
    pub path: String,
    pub content: String,
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepoContext {
    /// Relative paths of every eligible file, sorted.
    pub index: Vec<String>,
    /// Samples in priority order.
    pub samples: Vec<FileSample>,
}

/// Walk `root` and collect the index and samples.
///
/// Files whose relative path appears in `focus` (typically build output) are
/// sampled first, then files whose name appears, then the rest in path order.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn collect_context(
    root: &Path,
    options: &ContextOptions<'_>,
    focus: Option<&str>,
) -> Result<RepoContext> {
    let mut index = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !options
                    .skip_dirs
                    .iter()
                    .any(|skip| entry.file_name() == skip.as_str())
        });
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        if !extension_allowed(rel, options.allowed_extensions) {
            continue;
        }
        index.push(rel.to_string_lossy().replace('\\', "/"));
    }

    let mut ordered: Vec<&String> = index.iter().collect();
    if let Some(focus) = focus {
        ordered.sort_by_key(|path| focus_rank(path, focus));
    }

    let mut samples = Vec::new();
    let mut used = 0usize;
    for rel in ordered {
        if used >= options.total_bytes {
            break;
        }
        let path = root.join(rel);
        let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        let Ok(text) = String::from_utf8(bytes) else {
            debug!(path = %rel, "skipping non-utf8 file");
            continue;
        };
        let limit = options.per_file_bytes.min(options.total_bytes - used);
        let content = truncate_to_boundary(&text, limit).to_string();
        used += content.len();
        samples.push(FileSample {
            path: rel.clone(),
            truncated: content.len() < text.len(),
            content,
        });
    }

    debug!(files = index.len(), samples = samples.len(), bytes = used, "context collected");
    Ok(RepoContext { index, samples })
}

fn focus_rank(rel: &str, focus: &str) -> u8 {
    if focus.contains(rel) {
        return 0;
    }
    let name = rel.rsplit('/').next().unwrap_or(rel);
    if focus.contains(name) { 1 } else { 2 }
}
