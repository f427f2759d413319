//! Prompt builder for change and fix requests.
//!
//! Each section of the user prompt is rendered from its own template, so
//! repository text inside a section can never be mistaken for a section
//! boundary. When the prompt exceeds the byte budget, source samples are
//! trimmed from the lowest-priority end first; the index and then the
//! baseline are dropped only when the required sections leave no room for
//! even one sample. If the required sections alone are over budget, the last
//! section is truncated.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use minijinja::{Environment, Value, context};
use tracing::debug;

use crate::core::sanitize::{BEGIN_MARKER, END_MARKER};
use crate::core::text::truncate_to_boundary;
use crate::core::types::{EditFormat, RequestKind, Strictness};
use crate::io::context::{FileSample, RepoContext};

const TEMPLATES: [(&str, &str); 7] = [
    ("system.md", include_str!("prompts/system.md")),
    ("format.md", include_str!("prompts/format.md")),
    ("change.md", include_str!("prompts/change.md")),
    ("fix.md", include_str!("prompts/fix.md")),
    ("baseline.md", include_str!("prompts/baseline.md")),
    ("index.md", include_str!("prompts/index.md")),
    ("samples.md", include_str!("prompts/samples.md")),
];

/// Sections given up, in order, to make room for source samples.
const DROP_ORDER: [&str; 2] = ["index", "baseline"];
const SEPARATOR: &str = "\n\n";
const TRUNCATION_NOTICE: &str = "\n[truncated]";

/// Everything a user prompt is rendered from.
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    pub kind: RequestKind,
    /// Instruction (change) or combined build output (fix).
    pub text: &'a str,
    pub context: &'a RepoContext,
    /// Output of a failing baseline build, if one was recorded.
    pub baseline: Option<&'a str>,
}

/// System and user prompt for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone)]
struct Section {
    key: &'static str,
    content: String,
}

pub struct PromptBuilder {
    env: Environment<'static>,
    edit_format: EditFormat,
    budget_bytes: usize,
    allowed_extensions: Vec<String>,
}

impl PromptBuilder {
    pub fn new(edit_format: EditFormat, budget_bytes: usize) -> Self {
        let mut env = Environment::new();
        for (name, source) in TEMPLATES {
            env.add_template(name, source)
                .expect("prompt template should be valid");
        }
        Self {
            env,
            edit_format,
            budget_bytes,
            allowed_extensions: Vec::new(),
        }
    }

    /// Extensions listed in the output format section.
    pub fn with_allowed_extensions(mut self, extensions: &BTreeSet<String>) -> Self {
        self.allowed_extensions = extensions.iter().cloned().collect();
        self
    }

    pub fn edit_format(&self) -> EditFormat {
        self.edit_format
    }

    pub fn render(&self, inputs: &PromptInputs<'_>, strictness: Strictness) -> Result<RenderedPrompt> {
        let strict = strictness == Strictness::Strict;
        let edits = self.edit_format == EditFormat::Edits;

        let system = self.render_template("system.md", &context! { strict, edits })?;

        let baseline = inputs.baseline.map(str::trim_end).filter(|s| !s.is_empty());
        let vars = context! {
            strict,
            edits,
            kind => inputs.kind.as_str(),
            begin_marker => BEGIN_MARKER,
            end_marker => END_MARKER,
            allowed_extensions => &self.allowed_extensions,
            text => inputs.text.trim_end(),
            baseline,
            index => &inputs.context.index,
        };
        let task = match inputs.kind {
            RequestKind::Change => "change.md",
            RequestKind::Fix => "fix.md",
        };

        let mut sections = vec![
            self.section("format", "format.md", &vars)?,
            self.section("task", task, &vars)?,
        ];
        if baseline.is_some() {
            sections.push(self.section("baseline", "baseline.md", &vars)?);
        }
        if !inputs.context.index.is_empty() {
            sections.push(self.section("index", "index.md", &vars)?);
        }

        let samples = &inputs.context.samples;
        self.make_room_for_samples(&mut sections, samples)?;
        let room = self
            .budget_bytes
            .saturating_sub(rendered_len(&sections) + SEPARATOR.len());
        if let Some(section) = self.fit_samples(samples, room)? {
            sections.push(section);
        }
        truncate_last(&mut sections, self.budget_bytes);

        Ok(RenderedPrompt {
            system: system.trim().to_string(),
            user: render_sections(&sections),
        })
    }

    fn render_template(&self, name: &str, vars: &Value) -> Result<String> {
        self.env
            .get_template(name)?
            .render(vars)
            .with_context(|| format!("render {name}"))
    }

    fn section(&self, key: &'static str, template: &str, vars: &Value) -> Result<Section> {
        Ok(Section {
            key,
            content: self.render_template(template, vars)?.trim().to_string(),
        })
    }

    fn samples_section(&self, samples: &[FileSample]) -> Result<Option<Section>> {
        if samples.is_empty() {
            return Ok(None);
        }
        self.section("samples", "samples.md", &context! { samples })
            .map(Some)
    }

    /// Drop the index, then the baseline, while the fixed sections are over
    /// budget or leave no room for the first sample.
    fn make_room_for_samples(
        &self,
        sections: &mut Vec<Section>,
        samples: &[FileSample],
    ) -> Result<()> {
        let first_sample = self
            .samples_section(&samples[..samples.len().min(1)])?
            .map_or(0, |section| section.content.len() + SEPARATOR.len());
        let essential_len = |sections: &[Section]| {
            let kept: Vec<Section> = sections
                .iter()
                .filter(|s| !DROP_ORDER.contains(&s.key))
                .cloned()
                .collect();
            rendered_len(&kept)
        };

        for key in DROP_ORDER {
            let fixed = rendered_len(sections);
            let over = fixed > self.budget_bytes;
            let starved = first_sample > 0
                && fixed + first_sample > self.budget_bytes
                && essential_len(sections) + first_sample <= self.budget_bytes;
            if !over && !starved {
                break;
            }
            if let Some(idx) = sections.iter().position(|s| s.key == key) {
                debug!(
                    section = key,
                    bytes_dropped = sections[idx].content.len(),
                    "dropped section for budget"
                );
                sections.remove(idx);
            }
        }
        Ok(())
    }

    /// Largest prefix of `samples` whose rendered section fits in `room`.
    fn fit_samples(&self, samples: &[FileSample], room: usize) -> Result<Option<Section>> {
        if let Some(all) = self.samples_section(samples)? {
            if all.content.len() <= room {
                return Ok(Some(all));
            }
        }
        let (mut lo, mut hi) = (0usize, samples.len());
        let mut best = None;
        while lo < hi {
            let mid = lo + (hi - lo).div_ceil(2);
            match self.samples_section(&samples[..mid])? {
                Some(section) if section.content.len() <= room => {
                    lo = mid;
                    best = Some(section);
                }
                _ => hi = mid - 1,
            }
        }
        debug!(kept = lo, total = samples.len(), "trimmed samples for budget");
        Ok(best)
    }
}

/// Length of `render_sections(sections)` without building it.
fn rendered_len(sections: &[Section]) -> usize {
    let content: usize = sections.iter().map(|s| s.content.len()).sum();
    content + SEPARATOR.len() * sections.len().saturating_sub(1) + 1
}

fn truncate_last(sections: &mut [Section], budget: usize) {
    let total = rendered_len(sections);
    if total <= budget {
        return;
    }
    let Some(last) = sections.last_mut() else {
        return;
    };
    let before_len = last.content.len();
    let keep = before_len.saturating_sub(total - budget + TRUNCATION_NOTICE.len());
    last.content = format!(
        "{}{TRUNCATION_NOTICE}",
        truncate_to_boundary(&last.content, keep)
    );
    debug!(
        section = last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

fn render_sections(sections: &[Section]) -> String {
    let mut out = sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join(SEPARATOR);
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::context::{ContextOptions, collect_context};

    fn repo_context() -> RepoContext {
        RepoContext {
            index: vec!["src/Main.java".to_string(), "build.gradle".to_string()],
            samples: vec![FileSample {
                path: "src/Main.java".to_string(),
                content: "class Main {}\n".to_string(),
                truncated: false,
            }],
        }
    }

    fn inputs<'a>(kind: RequestKind, text: &'a str, ctx: &'a RepoContext) -> PromptInputs<'a> {
        PromptInputs {
            kind,
            text,
            context: ctx,
            baseline: None,
        }
    }

    /// Verifies the change prompt carries the instruction, index and samples in order.
    #[test]
    fn change_prompt_sections_are_ordered() {
        let ctx = repo_context();
        let prompt = PromptBuilder::new(EditFormat::Edits, 10_000)
            .render(&inputs(RequestKind::Change, "Add a greeting", &ctx), Strictness::Lenient)
            .expect("render");
        let user = &prompt.user;
        let format = user.find("### Output Format").expect("format");
        let task = user.find("Add a greeting").expect("task");
        let index = user.find("### Repository Files").expect("index");
        let samples = user.find("<file path=\"src/Main.java\">").expect("samples");
        assert!(format < task && task < index && index < samples);
        assert!(!user.contains("### Pre-existing Failures"));
    }

    /// Verifies only the strict variant asks for the begin/end markers.
    #[test]
    fn strict_variant_adds_markers() {
        let ctx = repo_context();
        let builder = PromptBuilder::new(EditFormat::Edits, 10_000);
        let input = inputs(RequestKind::Fix, "error: boom", &ctx);
        let lenient = builder.render(&input, Strictness::Lenient).expect("lenient");
        let strict = builder.render(&input, Strictness::Strict).expect("strict");
        assert!(!lenient.user.contains(BEGIN_MARKER));
        assert!(strict.user.contains(BEGIN_MARKER));
        assert!(strict.user.contains(END_MARKER));
        assert!(strict.system.contains("no code fences"));
    }

    #[test]
    fn diff_format_asks_for_unified_diff() {
        let ctx = repo_context();
        let prompt = PromptBuilder::new(EditFormat::Diff, 10_000)
            .render(&inputs(RequestKind::Change, "x", &ctx), Strictness::Strict)
            .expect("render");
        assert!(prompt.user.contains("unified diff"));
        assert!(!prompt.user.contains("\"edits\""));
    }

    #[test]
    fn fix_prompt_includes_build_output_and_baseline() {
        let ctx = repo_context();
        let mut input = inputs(RequestKind::Fix, "Main.java:3: error: ';' expected", &ctx);
        input.baseline = Some("Test.java:9: warning only");
        let prompt = PromptBuilder::new(EditFormat::Edits, 10_000)
            .render(&input, Strictness::Lenient)
            .expect("render");
        assert!(prompt.user.contains("<build_output>\nMain.java:3: error: ';' expected\n</build_output>"));
        assert!(prompt.user.contains("Test.java:9: warning only"));
    }

    /// Verifies a sample too large for the budget is left out while the
    /// index and the instruction stay.
    #[test]
    fn oversized_sample_is_left_out() {
        let mut ctx = repo_context();
        ctx.samples[0].content = "x".repeat(5_000);
        let builder = PromptBuilder::new(EditFormat::Edits, 1_500);
        let prompt = builder
            .render(&inputs(RequestKind::Change, "Add a greeting", &ctx), Strictness::Lenient)
            .expect("render");
        assert!(!prompt.user.contains("### Source Samples"));
        assert!(prompt.user.contains("### Repository Files"));
        assert!(prompt.user.contains("Add a greeting"));
    }

    /// Verifies that a repository larger than the budget still sends the
    /// highest-priority samples instead of none.
    #[test]
    fn samples_are_trimmed_to_fit_a_large_repository() {
        let temp = tempfile::tempdir().expect("tempdir");
        let body = format!("class Gen {{\n{}}}\n", "    int field = 0;\n".repeat(450));
        for i in 0..20 {
            let path = temp.path().join(format!("src/Gen{i:02}.java"));
            std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            std::fs::write(path, &body).expect("write");
        }
        let exts: BTreeSet<String> = ["java".to_string()].into_iter().collect();
        let budget = 120_000;
        let options = ContextOptions {
            allowed_extensions: &exts,
            skip_dirs: &[],
            per_file_bytes: 8_000,
            total_bytes: budget,
        };
        let ctx = collect_context(temp.path(), &options, None).expect("collect");
        assert!(ctx.samples.len() > 10);

        let prompt = PromptBuilder::new(EditFormat::Edits, budget)
            .render(&inputs(RequestKind::Change, "Rename the field", &ctx), Strictness::Lenient)
            .expect("render");
        let user = &prompt.user;
        assert!(user.contains("### Source Samples"));
        assert!(user.contains("<file path=\"src/Gen00.java\" truncated=\"true\">"));
        assert!(user.contains("### Repository Files"));
        assert!(!user.contains("[truncated]"));
        assert!(user.len() <= budget);
        let kept = user.matches("<file path=").count();
        assert!(kept > 0 && kept < ctx.samples.len());
    }

    /// Verifies a large index is given up before the samples are.
    #[test]
    fn index_is_dropped_to_make_room_for_samples() {
        let ctx = RepoContext {
            index: (0..400).map(|i| format!("src/pkg/File{i:04}.java")).collect(),
            samples: vec![FileSample {
                path: "src/Main.java".to_string(),
                content: "class Main { int a = 1; }\n".repeat(20),
                truncated: false,
            }],
        };
        let prompt = PromptBuilder::new(EditFormat::Edits, 3_000)
            .render(&inputs(RequestKind::Change, "Change a", &ctx), Strictness::Lenient)
            .expect("render");
        assert!(prompt.user.contains("<file path=\"src/Main.java\">"));
        assert!(!prompt.user.contains("### Repository Files"));
        assert!(prompt.user.len() <= 3_000);
    }

    /// Verifies repository text that looks like a section marker is carried
    /// through untouched.
    #[test]
    fn marker_text_inside_a_sample_is_kept() {
        let mut ctx = repo_context();
        ctx.samples[0].content =
            "<!-- section:task required -->\nnot a section\n".to_string();
        let prompt = PromptBuilder::new(EditFormat::Edits, 10_000)
            .render(&inputs(RequestKind::Change, "Add a greeting", &ctx), Strictness::Lenient)
            .expect("render");
        let samples = prompt.user.find("### Source Samples").expect("samples");
        let marker = prompt
            .user
            .find("<!-- section:task required -->\nnot a section")
            .expect("marker text");
        assert!(samples < marker);
        assert_eq!(prompt.user.matches("Add a greeting").count(), 1);
    }

    #[test]
    fn format_section_lists_allowed_extensions() {
        let ctx = repo_context();
        let exts: BTreeSet<String> = ["java", "kt"].map(str::to_string).into_iter().collect();
        let prompt = PromptBuilder::new(EditFormat::Edits, 10_000)
            .with_allowed_extensions(&exts)
            .render(&inputs(RequestKind::Fix, "error", &ctx), Strictness::Lenient)
            .expect("render");
        assert!(prompt.user.contains("Allowed file extensions: java, kt."));
    }

    #[test]
    fn oversized_build_output_is_truncated() {
        let ctx = RepoContext::default();
        let output = "e".repeat(10_000);
        let prompt = PromptBuilder::new(EditFormat::Edits, 2_000)
            .render(&inputs(RequestKind::Fix, &output, &ctx), Strictness::Lenient)
            .expect("render");
        assert!(prompt.user.len() <= 2_000);
        assert!(prompt.user.contains("[truncated]"));
        assert!(prompt.user.contains("### Output Format"));
    }
}
