//! Side-effecting adapters: filesystem, git, subprocesses.

pub mod apply_edits;
pub mod apply_patch;
pub mod config;
pub mod context;
pub mod git;
pub mod guardian;
pub mod handoff;
pub mod init;
pub mod oracle;
pub mod process;
pub mod prompt;
pub mod run_log;
pub mod transport;
