//! CLI tests for the `autofix` binary.
//!
//! Spawns the binary against scratch repositories and checks exit codes and
//! the on-disk effects of each subcommand.

use std::fs;
use std::process::{Command, Output};

use autofix::exit_codes;
use autofix::io::config::{AutofixConfig, write_config};
use autofix::io::init::AutofixPaths;
use autofix::test_support::TestRepo;

fn autofix(repo: &TestRepo, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_autofix"))
        .current_dir(repo.path())
        .args(args)
        .output()
        .expect("run autofix")
}

fn shell(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

fn write_test_config(repo: &TestRepo, edit: impl FnOnce(&mut AutofixConfig)) {
    let mut cfg = AutofixConfig::default();
    cfg.model.required_env = Vec::new();
    cfg.model.fallback = None;
    cfg.run_baseline = false;
    edit(&mut cfg);
    write_config(&AutofixPaths::new(repo.path()).config_path, &cfg).expect("write config");
}

#[test]
fn init_writes_config_and_excludes_state_dir() {
    let repo = TestRepo::new();
    let output = autofix(&repo, &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    let paths = AutofixPaths::new(repo.path());
    assert!(paths.config_path.is_file());
    let exclude = fs::read_to_string(repo.abs(".git/info/exclude")).expect("exclude");
    assert!(exclude.lines().any(|line| line == "/.autofix/"));
    assert!(repo.status().is_empty());

    let again = autofix(&repo, &["init"]);
    assert_eq!(again.status.code(), Some(exit_codes::FATAL));
    let forced = autofix(&repo, &["init", "--force"]);
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
}

#[test]
fn fix_on_green_build_exits_ok() {
    let repo = TestRepo::new();
    write_test_config(&repo, |cfg| cfg.build.command = shell("echo BUILD SUCCESSFUL"));

    let output = autofix(&repo, &["fix"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{stdout}");
    assert!(stdout.contains("GREEN"));
}

#[test]
fn unrepairable_build_exits_failed_and_prints_build_output() {
    let repo = TestRepo::new();
    write_test_config(&repo, |cfg| {
        cfg.build.command = shell("echo 'src/Main.java:3: error: broken' >&2; exit 1");
        cfg.model.command = shell("cat >/dev/null; echo 'I would rather not.'");
        cfg.max_fix_attempts = 1;
    });

    let output = autofix(&repo, &["fix"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(exit_codes::FAILED), "{stdout}");
    assert!(stdout.contains("src/Main.java:3: error: broken"));
    assert!(stdout.contains("FAILED"));
}

#[test]
fn missing_credential_is_fatal() {
    let repo = TestRepo::new();
    write_test_config(&repo, |cfg| {
        cfg.model.required_env = vec!["AUTOFIX_CLI_TEST_UNSET_KEY".to_string()];
    });

    let output = Command::new(env!("CARGO_BIN_EXE_autofix"))
        .current_dir(repo.path())
        .env_remove("AUTOFIX_CLI_TEST_UNSET_KEY")
        .args(["run", "Say hello"])
        .output()
        .expect("run autofix");
    assert_eq!(output.status.code(), Some(exit_codes::FATAL));
    assert!(String::from_utf8_lossy(&output.stderr).contains("AUTOFIX_CLI_TEST_UNSET_KEY"));
}

#[test]
fn outside_a_repository_is_fatal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = Command::new(env!("CARGO_BIN_EXE_autofix"))
        .current_dir(temp.path())
        .arg("restore")
        .output()
        .expect("run autofix");
    assert_eq!(output.status.code(), Some(exit_codes::FATAL));
}

#[test]
fn restore_clears_reject_artifacts_but_keeps_edits() {
    let repo = TestRepo::new();
    repo.write("A.txt", "half\n");
    repo.write("A.txt.rej", "@@\n");

    let output = autofix(&repo, &["restore"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(repo.read("A.txt"), "half\n");
    assert!(!repo.abs("A.txt.rej").exists());

    let forced = autofix(&repo, &["restore", "--force"]);
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
    assert_eq!(repo.read("A.txt"), "initial\n");
}
