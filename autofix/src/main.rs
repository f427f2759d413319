//! Autonomous build-repair agent CLI.
//!
//! `autofix run "<instruction>"` applies a model-generated change and repairs
//! the build; `autofix fix` repairs an already failing build.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use autofix::core::error::FatalError;
use autofix::exit_codes;
use autofix::io::config::{AutofixConfig, load_config};
use autofix::io::git::Git;
use autofix::io::guardian::ConsistencyGuardian;
use autofix::io::init::{AutofixPaths, InitOptions, init_autofix};
use autofix::io::oracle::CommandBuildOracle;
use autofix::io::transport::CommandTransport;
use autofix::logging;
use autofix::repair::{RepairEvent, RepairOutcome, Terminal, run_repair};
use autofix::start::prepare_run;

#[derive(Parser)]
#[command(
    name = "autofix",
    version,
    about = "Apply model-generated changes and repair the build until it is green"
)]
struct Cli {
    /// Repository root.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Config file (default: `<root>/.autofix/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level diagnostics on stderr (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply a change request, then build and repair until green.
    Run {
        /// Change request text.
        instruction: Option<String>,

        /// Read the change request from a file instead.
        #[arg(long, conflicts_with = "instruction")]
        file: Option<PathBuf>,

        #[command(flatten)]
        loop_args: LoopArgs,
    },
    /// Build and repair the current tree until green.
    Fix {
        #[command(flatten)]
        loop_args: LoopArgs,
    },
    /// Clear conflicts and reject artifacts left by an interrupted run.
    Restore {
        /// Discard every uncommitted change, even without conflicts.
        #[arg(long)]
        force: bool,
    },
    /// Write a default `.autofix/config.toml`.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct LoopArgs {
    /// Override `max_fix_attempts`.
    #[arg(long)]
    max_fix_attempts: Option<u32>,

    /// Skip the baseline build.
    #[arg(long)]
    no_baseline: bool,
}

impl LoopArgs {
    fn apply(&self, config: &mut AutofixConfig) {
        if let Some(max) = self.max_fix_attempts {
            config.max_fix_attempts = max;
        }
        if self.no_baseline {
            config.run_baseline = false;
        }
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            if let Some(fatal) = err.downcast_ref::<FatalError>() {
                eprintln!("autofix: {fatal}");
            } else {
                eprintln!("autofix: {err:#}");
            }
            exit_codes::FATAL
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.root, force),
        Command::Restore { force } => cmd_restore(&cli.root, force),
        Command::Run {
            instruction,
            file,
            loop_args,
        } => {
            let instruction = match (instruction, file) {
                (Some(text), None) => text,
                (None, Some(path)) => fs::read_to_string(&path)
                    .with_context(|| format!("read instruction {}", path.display()))?,
                _ => bail!("provide a change request or --file"),
            };
            if instruction.trim().is_empty() {
                bail!("change request is empty");
            }
            cmd_repair(&cli.root, cli.config.as_deref(), Some(&instruction), &loop_args)
        }
        Command::Fix { loop_args } => {
            cmd_repair(&cli.root, cli.config.as_deref(), None, &loop_args)
        }
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let git = Git::new(root);
    if !git.is_work_tree()? {
        return Err(FatalError::NotARepository(root.to_path_buf()).into());
    }
    let paths = init_autofix(&git, &InitOptions { force })?;
    println!("wrote {}", paths.config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_restore(root: &Path, force: bool) -> Result<i32> {
    let git = Git::new(root);
    if !git.is_work_tree()? {
        return Err(FatalError::NotARepository(root.to_path_buf()).into());
    }
    let guardian = ConsistencyGuardian::new(git);
    if force {
        guardian.force_restore()?;
        println!("restored to HEAD");
    } else if guardian.restore_clean_state()? {
        println!("cleared conflicts and reject artifacts");
    } else {
        println!("repository state is consistent");
    }
    Ok(exit_codes::OK)
}

fn cmd_repair(
    root: &Path,
    config_path: Option<&Path>,
    instruction: Option<&str>,
    loop_args: &LoopArgs,
) -> Result<i32> {
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AutofixPaths::new(root).config_path);
    let mut config = load_config(&config_path)?;
    loop_args.apply(&mut config);

    let run = prepare_run(root, &config)?;
    if run.checkpointed {
        println!("checkpoint: committed pre-existing changes");
    }

    let transport = CommandTransport {
        argv: config.model.command.clone(),
        workdir: root.to_path_buf(),
        timeout: Duration::from_secs(config.model_timeout_secs),
        output_limit_bytes: config.output_limit_bytes,
    };
    let oracle = CommandBuildOracle {
        argv: config.build.command.clone(),
        workdir: root.to_path_buf(),
        timeout: Duration::from_secs(config.build_timeout_secs),
        output_limit_bytes: config.output_limit_bytes,
    };

    let outcome = run_repair(&run, &config, instruction, &transport, &oracle, print_event)?;
    print_outcome(&outcome, &run.run_log.dir().display().to_string());
    Ok(match outcome.terminal {
        Terminal::Green => exit_codes::OK,
        Terminal::Failed { .. } => exit_codes::FAILED,
    })
}

fn print_event(event: &RepairEvent) {
    match event {
        RepairEvent::BaselineFailed { build } => {
            println!("== baseline build failing (exit {:?}) ==", build.exit_status);
        }
        RepairEvent::ChangeRetried { reason } => {
            println!("change discarded ({reason}); retrying with the other model");
        }
        RepairEvent::ChangeCommitted { commit, files } => {
            println!("change applied: {files} file(s), commit {commit}");
        }
        RepairEvent::BuildFailed { attempt, build } => {
            println!(
                "== build failed (exit {:?}); fix attempt {attempt} ==",
                build.exit_status
            );
            print!("{}", build.combined_output());
            println!("== end of build output ==");
        }
        RepairEvent::FixCommitted {
            attempt,
            commit,
            files,
        } => println!("fix attempt {attempt}: {files} file(s), commit {commit}"),
        RepairEvent::FixDiscarded { attempt, reason } => {
            println!("fix attempt {attempt} discarded: {reason}");
        }
        RepairEvent::HandoffFailed { reason } => println!("handoff failed: {reason}"),
    }
}

fn print_outcome(outcome: &RepairOutcome, run_dir: &str) {
    match &outcome.terminal {
        Terminal::Green => println!(
            "GREEN after {} fix attempt(s), {} model call(s)",
            outcome.fix_attempts, outcome.model_calls
        ),
        Terminal::Failed { reason } => println!(
            "FAILED: {reason} ({} fix attempt(s), {} model call(s); last commit left for review)",
            outcome.fix_attempts, outcome.model_calls
        ),
    }
    println!("run log: {run_dir}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "autofix",
            "run",
            "add a greeting",
            "--max-fix-attempts",
            "5",
            "--no-baseline",
        ]);
        match cli.command {
            Command::Run {
                instruction,
                loop_args,
                ..
            } => {
                assert_eq!(instruction.as_deref(), Some("add a greeting"));
                let mut cfg = AutofixConfig::default();
                loop_args.apply(&mut cfg);
                assert_eq!(cfg.max_fix_attempts, 5);
                assert!(!cfg.run_baseline);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_global_root_after_subcommand() {
        let cli = Cli::parse_from(["autofix", "fix", "--root", "/tmp/repo", "-v"]);
        assert_eq!(cli.root, PathBuf::from("/tmp/repo"));
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Fix { .. }));
    }

    #[test]
    fn instruction_and_file_conflict() {
        let result = Cli::try_parse_from(["autofix", "run", "text", "--file", "req.md"]);
        assert!(result.is_err());
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["autofix", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }
}
