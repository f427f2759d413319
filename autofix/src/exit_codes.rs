//! Stable exit codes for `autofix` commands.

/// Command succeeded; for `run`/`fix` the build finished green.
pub const OK: i32 = 0;
/// Fatal precondition, configuration or environment error. Nothing was attempted
/// or the run could not continue.
pub const FATAL: i32 = 1;
/// The repair loop ended `Failed`; the last commit is left in place for review.
pub const FAILED: i32 = 2;
