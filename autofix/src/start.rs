//! Run initialization: preconditions and the checkpoint commit.
//!
//! Before the repair loop touches anything, the root must be a git work tree,
//! required credentials must be present, and all pre-existing work must be
//! captured in a checkpoint commit so every later reset has something to land
//! on. Leftover reject artifacts are deleted first so they never land in the
//! checkpoint; the user's edits are only discarded when the index holds
//! conflicts, which cannot be committed.

use std::path::Path;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::error::FatalError;
use crate::io::config::AutofixConfig;
use crate::io::git::Git;
use crate::io::guardian::ConsistencyGuardian;
use crate::io::init::{AutofixPaths, ensure_excluded};
use crate::io::run_log::RunLog;

pub const CHECKPOINT_MESSAGE: &str = "autofix: checkpoint before run";

/// Everything the repair loop needs once preconditions hold.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub git: Git,
    pub guardian: ConsistencyGuardian,
    pub paths: AutofixPaths,
    pub run_log: RunLog,
    /// True when a checkpoint commit was created.
    pub checkpointed: bool,
    /// True when conflicts or reject artifacts from a previous run were
    /// cleared.
    pub restored: bool,
}

#[instrument(skip_all, fields(root = %root.display()))]
pub fn prepare_run(root: &Path, config: &AutofixConfig) -> Result<PreparedRun> {
    let git = Git::new(root).with_identity(config.git.identity());
    if !root.is_dir() || !git.is_work_tree()? {
        return Err(FatalError::NotARepository(root.to_path_buf()).into());
    }
    check_credentials(&config.model.required_env)?;
    ensure_excluded(&git)?;

    let guardian = ConsistencyGuardian::new(git.clone());
    let leftovers = guardian.inspect()?;
    if leftovers.has_conflicts() {
        warn!(
            unmerged = leftovers.unmerged_paths.len(),
            "conflicts from a previous run, uncommitted edits will be discarded"
        );
    }
    let restored = guardian.restore_clean_state()?;

    git.add_all()?;
    let checkpointed = git.commit_staged(CHECKPOINT_MESSAGE)?;
    if checkpointed {
        info!("checkpoint commit created");
    }
    if !git.has_head()? {
        return Err(FatalError::NoCommits.into());
    }

    let paths = AutofixPaths::new(root);
    let run_log = RunLog::create(&paths, &git.head_short_sha(8)?)?;
    debug!(run_id = run_log.run_id(), "run prepared");
    Ok(PreparedRun {
        git,
        guardian,
        paths,
        run_log,
        checkpointed,
        restored,
    })
}

fn check_credentials(required: &[String]) -> Result<(), FatalError> {
    for name in required {
        let present = std::env::var_os(name).is_some_and(|value| !value.is_empty());
        if !present {
            return Err(FatalError::MissingCredential(name.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    fn config() -> AutofixConfig {
        let mut cfg = AutofixConfig::default();
        cfg.model.required_env = Vec::new();
        cfg
    }

    #[test]
    fn dirty_tree_is_checkpointed() {
        let repo = TestRepo::new();
        repo.write("A.txt", "user work\n");
        repo.write("notes.txt", "untracked\n");
        let prepared = prepare_run(repo.path(), &config()).expect("prepare");
        assert!(prepared.checkpointed);
        assert_eq!(repo.log_subjects()[0], CHECKPOINT_MESSAGE);
        assert!(repo.status().is_empty());
    }

    #[test]
    fn clean_tree_gets_no_checkpoint() {
        let repo = TestRepo::new();
        let head = repo.head();
        let prepared = prepare_run(repo.path(), &config()).expect("prepare");
        assert!(!prepared.checkpointed);
        assert_eq!(repo.head(), head);
        assert!(prepared.run_log.dir().is_dir());
    }

    #[test]
    fn plain_directory_is_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = prepare_run(temp.path(), &config()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FatalError>(),
            Some(FatalError::NotARepository(_))
        ));
    }

    #[test]
    fn empty_repository_is_fatal() {
        let repo = TestRepo::without_commits();
        let err = prepare_run(repo.path(), &config()).unwrap_err();
        assert_eq!(err.downcast_ref::<FatalError>(), Some(&FatalError::NoCommits));
    }

    #[test]
    fn empty_repository_with_files_is_checkpointed() {
        let repo = TestRepo::without_commits();
        repo.write("A.txt", "first\n");
        let prepared = prepare_run(repo.path(), &config()).expect("prepare");
        assert!(prepared.checkpointed);
    }

    #[test]
    fn missing_credential_is_fatal() {
        let repo = TestRepo::new();
        let mut cfg = config();
        cfg.model.required_env = vec!["AUTOFIX_TEST_SURELY_UNSET_CREDENTIAL".to_string()];
        let err = prepare_run(repo.path(), &cfg).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FatalError>(),
            Some(FatalError::MissingCredential(name)) if name == "AUTOFIX_TEST_SURELY_UNSET_CREDENTIAL"
        ));
    }

    #[test]
    fn leftover_reject_artifacts_are_cleared_before_checkpoint() {
        let repo = TestRepo::new();
        repo.write("A.txt.rej", "@@\n");
        let prepared = prepare_run(repo.path(), &config()).expect("prepare");
        assert!(prepared.restored);
        assert!(!repo.abs("A.txt.rej").exists());
        assert!(!prepared.checkpointed);
    }

    /// Verifies a stale reject artifact does not cost the user their
    /// uncommitted edits: they land in the checkpoint, the artifact does not.
    #[test]
    fn user_edits_survive_a_stale_reject_artifact() {
        let repo = TestRepo::new();
        repo.write("A.txt", "user work in progress\n");
        repo.write("old-patch.rej", "@@ -1 +1 @@\n");
        let prepared = prepare_run(repo.path(), &config()).expect("prepare");

        assert!(prepared.restored);
        assert!(prepared.checkpointed);
        assert_eq!(repo.read("A.txt"), "user work in progress\n");
        assert!(!repo.abs("old-patch.rej").exists());
        assert_eq!(repo.log_subjects()[0], CHECKPOINT_MESSAGE);
        let committed = repo.git_cmd(&["show", "--name-only", "--format=", "HEAD"]);
        assert_eq!(committed.trim(), "A.txt");
        assert!(repo.status().is_empty());
    }

    #[test]
    fn tracked_reject_file_is_kept() {
        let repo = TestRepo::new();
        repo.write("fixtures/expected.rej", "@@ fixture @@\n");
        repo.commit_all("add fixture");
        let prepared = prepare_run(repo.path(), &config()).expect("prepare");
        assert!(!prepared.restored);
        assert_eq!(repo.read("fixtures/expected.rej"), "@@ fixture @@\n");
    }

    #[test]
    fn conflicted_merge_is_aborted_before_checkpoint() {
        let repo = TestRepo::new();
        repo.git_cmd(&["checkout", "--quiet", "-b", "other"]);
        repo.write("A.txt", "theirs\n");
        repo.commit_all("theirs");
        repo.git_cmd(&["checkout", "--quiet", "-"]);
        repo.write("A.txt", "ours\n");
        repo.commit_all("ours");
        assert!(!repo.git_succeeds(&["merge", "--no-edit", "other"]));
        let head = repo.head();

        let prepared = prepare_run(repo.path(), &config()).expect("prepare");
        assert!(prepared.restored);
        assert!(!prepared.checkpointed);
        assert_eq!(repo.head(), head);
        assert_eq!(repo.read("A.txt"), "ours\n");
        assert!(!repo.git().merge_in_progress().expect("merge head"));
    }
}
