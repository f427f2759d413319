//! Repair Control Loop.
//!
//! ```text
//! Init -> Baseline -> ChangePending -> Building -> Green
//!                                        |  ^
//!                                        v  |
//!                                     FixPending      (cap exceeded -> Failed)
//! ```
//!
//! `Init` is [`crate::start::prepare_run`]. Every cycle starts with a
//! consistency check; any cycle that does not end in a commit ends with a
//! forced restore, so the tree is always at the last good commit when the
//! next cycle begins. `Failed` performs no rollback.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::ModelCallBudget;
use crate::core::error::RequestError;
use crate::core::escalation::EscalationOrder;
use crate::core::types::{ApplyOutcome, BuildResult, EditPayload, RequestKind};
use crate::io::apply_edits::{apply_file_edits, relative_paths};
use crate::io::apply_patch::apply_unified_diff;
use crate::io::config::AutofixConfig;
use crate::io::context::{ContextOptions, collect_context};
use crate::io::handoff::run_handoff;
use crate::io::oracle::BuildOracle;
use crate::io::prompt::{PromptBuilder, PromptInputs};
use crate::io::run_log::CycleLog;
use crate::io::transport::ModelTransport;
use crate::request::RequestController;
use crate::start::PreparedRun;

pub const CHANGE_COMMIT_MESSAGE: &str = "autofix: apply change";

pub fn fix_commit_message(attempt: u32) -> String {
    format!("autofix: fix attempt {attempt}")
}

/// Progress reported to the caller while the loop runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairEvent {
    /// The build was already failing before any change.
    BaselineFailed { build: BuildResult },
    /// The change cycle produced nothing usable; the tree was restored and
    /// the change is requested once more with the escalation order rotated.
    ChangeRetried { reason: String },
    ChangeCommitted { commit: String, files: usize },
    /// A failing build, reported before the fix attempt it triggers.
    BuildFailed { attempt: u32, build: BuildResult },
    FixCommitted {
        attempt: u32,
        commit: String,
        files: usize,
    },
    /// The fix cycle produced nothing usable; the tree was restored and the
    /// escalation order rotated.
    FixDiscarded { attempt: u32, reason: String },
    HandoffFailed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Terminal {
    Green,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairOutcome {
    pub run_id: String,
    pub terminal: Terminal,
    /// Fix cycles started (failing builds beyond the cap are not counted).
    pub fix_attempts: u32,
    pub model_calls: u32,
    /// Short SHAs of commits created by the loop, oldest first.
    pub commits: Vec<String>,
    pub handoff_ran: bool,
}

impl RepairOutcome {
    pub fn is_green(&self) -> bool {
        self.terminal == Terminal::Green
    }
}

/// How one change or fix cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CycleResult {
    Committed { commit: String, files: usize },
    Discarded { reason: String },
    BudgetExhausted(RequestError),
}

struct RepairLoop<'a, T: ModelTransport, O: BuildOracle> {
    run: &'a PreparedRun,
    config: &'a AutofixConfig,
    controller: RequestController<'a, T>,
    oracle: &'a O,
    budget: ModelCallBudget,
    order: EscalationOrder,
    baseline: Option<String>,
    commits: Vec<String>,
}

/// Drive the loop to `Green` or `Failed`.
///
/// `instruction` is the change request; `None` skips straight to building
/// (repair an already failing tree). The outer `Err` means an environment
/// failure (git, filesystem, a collaborator that could not run at all).
#[instrument(skip_all, fields(run_id = run.run_log.run_id()))]
pub fn run_repair<T, O, F>(
    run: &PreparedRun,
    config: &AutofixConfig,
    instruction: Option<&str>,
    transport: &T,
    oracle: &O,
    mut on_event: F,
) -> Result<RepairOutcome>
where
    T: ModelTransport,
    O: BuildOracle,
    F: FnMut(&RepairEvent),
{
    let prompts = PromptBuilder::new(config.edit_format, config.prompt_budget_bytes)
        .with_allowed_extensions(&config.allowed_extensions);
    let mut state = RepairLoop {
        run,
        config,
        controller: RequestController::new(transport, &prompts, &config.model),
        oracle,
        budget: ModelCallBudget::new(config.max_model_calls),
        order: EscalationOrder::new(config.model.primary.clone(), config.model.fallback.clone()),
        baseline: None,
        commits: Vec::new(),
    };

    if config.run_baseline {
        state.run_baseline(&mut on_event)?;
    }

    if let Some(instruction) = instruction {
        let mut result = state.change_cycle("change", instruction)?;
        if let CycleResult::Discarded { reason } = &result {
            if state.order.fallback().is_some() {
                warn!(reason = %reason, "change discarded, retrying with the other model first");
                on_event(&RepairEvent::ChangeRetried {
                    reason: reason.clone(),
                });
                state.order.rotate();
                result = state.change_cycle("change-retry", instruction)?;
            }
        }
        match result {
            CycleResult::Committed { commit, files } => {
                on_event(&RepairEvent::ChangeCommitted { commit, files });
            }
            CycleResult::Discarded { reason } => {
                return state.finish(0, failed(format!("change not applied: {reason}")));
            }
            CycleResult::BudgetExhausted(err) => {
                return state.finish(0, failed(err.to_string()));
            }
        }
    }

    let mut fix_attempts = 0u32;
    loop {
        let build = state.oracle.run_build()?;
        if build.success() {
            info!(fix_attempts, "build is green");
            let mut cycle = run.run_log.cycle("final")?;
            cycle.write_build(&build)?;
            cycle.flush()?;
            let mut outcome = state.finish(fix_attempts, Terminal::Green)?;
            outcome.handoff_ran = state.handoff(&mut on_event);
            run.run_log.write_summary(&outcome)?;
            return Ok(outcome);
        }

        if fix_attempts >= config.max_fix_attempts {
            warn!(fix_attempts, "fix attempts exhausted");
            let mut cycle = run.run_log.cycle("final")?;
            cycle.write_build(&build)?;
            cycle.flush()?;
            return state.finish(
                fix_attempts,
                failed(format!(
                    "build still failing after {fix_attempts} fix attempt(s)"
                )),
            );
        }
        fix_attempts += 1;
        on_event(&RepairEvent::BuildFailed {
            attempt: fix_attempts,
            build: build.clone(),
        });

        match state.fix_cycle(fix_attempts, &build)? {
            CycleResult::Committed { commit, files } => {
                on_event(&RepairEvent::FixCommitted {
                    attempt: fix_attempts,
                    commit,
                    files,
                });
            }
            CycleResult::Discarded { reason } => {
                state.order.rotate();
                on_event(&RepairEvent::FixDiscarded {
                    attempt: fix_attempts,
                    reason,
                });
            }
            CycleResult::BudgetExhausted(err) => {
                return state.finish(fix_attempts, failed(err.to_string()));
            }
        }
    }
}

fn failed(reason: String) -> Terminal {
    Terminal::Failed { reason }
}

impl<T: ModelTransport, O: BuildOracle> RepairLoop<'_, T, O> {
    fn root(&self) -> &Path {
        self.run.git.workdir()
    }

    fn run_baseline<F: FnMut(&RepairEvent)>(&mut self, on_event: &mut F) -> Result<()> {
        let build = self.oracle.run_build()?;
        let mut cycle = self.run.run_log.cycle("baseline")?;
        cycle.write_build(&build)?;
        cycle.flush()?;
        if !build.success() {
            info!("baseline build is failing");
            self.baseline = Some(build.combined_output());
            on_event(&RepairEvent::BaselineFailed { build });
        }
        Ok(())
    }

    fn change_cycle(&mut self, name: &str, instruction: &str) -> Result<CycleResult> {
        let mut cycle = self.run.run_log.cycle(name)?;
        let result = self.cycle(
            RequestKind::Change,
            instruction,
            CHANGE_COMMIT_MESSAGE,
            &mut cycle,
        );
        cycle.flush()?;
        result
    }

    fn fix_cycle(&mut self, attempt: u32, build: &BuildResult) -> Result<CycleResult> {
        let mut cycle = self.run.run_log.cycle(&format!("fix-{attempt}"))?;
        cycle.write_build(build)?;
        let result = self.cycle(
            RequestKind::Fix,
            &build.combined_output(),
            &fix_commit_message(attempt),
            &mut cycle,
        );
        cycle.flush()?;
        result
    }

    /// Request, apply and commit. Anything short of a commit leaves the tree
    /// at HEAD.
    fn cycle(
        &mut self,
        kind: RequestKind,
        text: &str,
        commit_message: &str,
        log: &mut CycleLog,
    ) -> Result<CycleResult> {
        log.meta.kind = Some(kind);
        let guardian = &self.run.guardian;
        guardian.restore_clean_state()?;

        let options = ContextOptions {
            allowed_extensions: &self.config.allowed_extensions,
            skip_dirs: &self.config.context.skip_dirs,
            per_file_bytes: self.config.context.per_file_bytes,
            total_bytes: self.config.prompt_budget_bytes,
        };
        let focus = (kind == RequestKind::Fix).then_some(text);
        let repo_context = collect_context(self.root(), &options, focus)?;
        let inputs = PromptInputs {
            kind,
            text,
            context: &repo_context,
            baseline: self.baseline.as_deref(),
        };

        let outcome = self
            .controller
            .request(&inputs, &self.order, self.budget, Some(&*log))?;
        self.budget = outcome.budget;
        log.meta.attempts = outcome.attempts;
        let obtained = match outcome.result {
            Ok(obtained) => obtained,
            Err(err @ RequestError::BudgetExhausted { .. }) => {
                return Ok(CycleResult::BudgetExhausted(err));
            }
            Err(err) => {
                return Ok(CycleResult::Discarded {
                    reason: err.to_string(),
                });
            }
        };

        let applied = match obtained.payload {
            EditPayload::FileReplacementSet(edits) => {
                match apply_file_edits(self.root(), &edits, &self.config.allowed_extensions) {
                    Ok(applied) => {
                        let files = relative_paths(self.root(), &applied.changed_paths)?;
                        debug!(files = ?files, "edits applied");
                        Ok(files.len())
                    }
                    Err(err) => Err(err.to_string()),
                }
            }
            EditPayload::UnifiedDiff(diff) => {
                let outcome = apply_unified_diff(&self.run.git, guardian, &diff)?;
                match &outcome {
                    ApplyOutcome::Applied {
                        changed_paths,
                        partial: false,
                        ..
                    } => Ok(changed_paths.len()),
                    other => Err(other.to_string()),
                }
            }
        };
        let files = match applied {
            Ok(files) => {
                log.meta.apply = Some(format!("applied ({files} file(s))"));
                files
            }
            Err(reason) => {
                warn!(reason = %reason, "apply failed, restoring");
                log.meta.apply = Some(reason.clone());
                guardian.force_restore()?;
                return Ok(CycleResult::Discarded { reason });
            }
        };

        match self.commit(commit_message) {
            Ok(Some(commit)) => {
                log.meta.commit = Some(commit.clone());
                self.commits.push(commit.clone());
                Ok(CycleResult::Committed { commit, files })
            }
            Ok(None) => {
                guardian.force_restore()?;
                Ok(CycleResult::Discarded {
                    reason: "payload produced no changes".to_string(),
                })
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "commit failed, restoring");
                guardian.force_restore()?;
                Ok(CycleResult::Discarded {
                    reason: format!("commit failed: {err:#}"),
                })
            }
        }
    }

    fn commit(&self, message: &str) -> Result<Option<String>> {
        let git = &self.run.git;
        git.add_all()?;
        if !git.commit_staged(message)? {
            return Ok(None);
        }
        Ok(Some(git.head_short_sha(8)?))
    }

    /// Run the handoff hook. Failures are reported, never fatal.
    fn handoff<F: FnMut(&RepairEvent)>(&self, on_event: &mut F) -> bool {
        let handoff = &self.config.handoff;
        match run_handoff(
            &handoff.command,
            self.root(),
            Duration::from_secs(self.config.build_timeout_secs),
            self.config.output_limit_bytes,
        ) {
            Ok(ran) => ran,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "handoff failed");
                on_event(&RepairEvent::HandoffFailed {
                    reason: format!("{err:#}"),
                });
                false
            }
        }
    }

    fn finish(&self, fix_attempts: u32, terminal: Terminal) -> Result<RepairOutcome> {
        let outcome = RepairOutcome {
            run_id: self.run.run_log.run_id().to_string(),
            terminal,
            fix_attempts,
            model_calls: self.budget.used(),
            commits: self.commits.clone(),
            handoff_ran: false,
        };
        self.run.run_log.write_summary(&outcome)?;
        info!(terminal = ?outcome.terminal, model_calls = outcome.model_calls, "repair finished");
        Ok(outcome)
    }
}
