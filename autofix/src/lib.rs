//! Autonomous build-repair agent.
//!
//! Given a change request, `autofix` asks a model for repository edits,
//! applies them, runs the build, and feeds failures back to the model until
//! the build is green or the retry budget runs out. The architecture keeps a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (sanitizing model output, path
//!   rules, budgets, escalation order). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (git, filesystem, subprocesses,
//!   prompts, run artifacts). Collaborators sit behind traits so tests can
//!   script them.
//!
//! Orchestration modules ([`start`], [`request`], [`repair`]) compose the two
//! into the repair loop behind the CLI.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod repair;
pub mod request;
pub mod start;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
