//! Line-level preview of a whole-file replacement.
//!
//! Informational only: the preview is logged, never used to decide whether an
//! edit succeeded.

use std::fmt;

/// Comparison is skipped above this many line pairs.
const MAX_LCS_CELLS: usize = 4_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewLine {
    Context(String),
    Added(String),
    Removed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangePreview {
    pub added: usize,
    pub removed: usize,
    /// Changed lines with up to `context` surrounding lines; empty when the
    /// files were too large to compare line by line.
    pub lines: Vec<PreviewLine>,
}

impl ChangePreview {
    pub fn is_unchanged(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

impl fmt::Display for ChangePreview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "+{} -{}", self.added, self.removed)?;
        for line in &self.lines {
            match line {
                PreviewLine::Context(text) => writeln!(f, "  {text}")?,
                PreviewLine::Added(text) => writeln!(f, "+ {text}")?,
                PreviewLine::Removed(text) => writeln!(f, "- {text}")?,
            }
        }
        Ok(())
    }
}

/// Build a preview of replacing `old` with `new`, keeping at most
/// `max_lines` preview lines.
pub fn preview_replacement(old: &str, new: &str, max_lines: usize) -> ChangePreview {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    if old_lines.len().saturating_mul(new_lines.len()) > MAX_LCS_CELLS {
        return ChangePreview {
            added: new_lines.len(),
            removed: old_lines.len(),
            lines: Vec::new(),
        };
    }

    let script = edit_script(&old_lines, &new_lines);
    let added = script
        .iter()
        .filter(|line| matches!(line, PreviewLine::Added(_)))
        .count();
    let removed = script
        .iter()
        .filter(|line| matches!(line, PreviewLine::Removed(_)))
        .count();

    ChangePreview {
        added,
        removed,
        lines: trim_context(script, 1, max_lines),
    }
}

/// Longest-common-subsequence edit script between two line slices.
fn edit_script(old: &[&str], new: &[&str]) -> Vec<PreviewLine> {
    let (n, m) = (old.len(), new.len());
    let mut table = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if old[i] == new[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut script = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            script.push(PreviewLine::Context(old[i].to_string()));
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            script.push(PreviewLine::Removed(old[i].to_string()));
            i += 1;
        } else {
            script.push(PreviewLine::Added(new[j].to_string()));
            j += 1;
        }
    }
    script.extend(old[i..].iter().map(|l| PreviewLine::Removed(l.to_string())));
    script.extend(new[j..].iter().map(|l| PreviewLine::Added(l.to_string())));
    script
}

/// Keep changed lines plus `context` neighbours, capped at `max_lines`.
fn trim_context(script: Vec<PreviewLine>, context: usize, max_lines: usize) -> Vec<PreviewLine> {
    let changed: Vec<usize> = script
        .iter()
        .enumerate()
        .filter(|(_, line)| !matches!(line, PreviewLine::Context(_)))
        .map(|(idx, _)| idx)
        .collect();

    script
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| {
            changed
                .iter()
                .any(|c| idx.abs_diff(*c) <= context)
        })
        .map(|(_, line)| line)
        .take(max_lines)
        .collect()
}
