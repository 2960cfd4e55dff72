//! Command-line arguments.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Runs queue workers and inspects queues and failed jobs.
#[derive(Debug, Parser)]
#[command(name = "kestrel-worker", version, about)]
pub struct Cli {
    /// Directory holding `default.toml` and per-environment overrides.
    #[arg(long, env = "KESTREL_CONFIG_DIR", default_value = "./config", global = true)]
    pub config_dir: PathBuf,

    /// Environment name selecting `{environment}.toml`.
    #[arg(long, env = "KESTREL_ENVIRONMENT", global = true)]
    pub environment: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Process jobs until interrupted.
    Work(WorkArgs),

    /// Enqueue a `log_message` job.
    Dispatch(DispatchArgs),

    /// Show how many jobs each queue holds.
    Size {
        /// Queues to report; defaults to every registered queue.
        queues: Vec<String>,
    },

    /// Remove every job from a queue.
    Clear {
        queue: String,
    },

    /// Inspect and retry failed jobs.
    #[command(subcommand)]
    Failed(FailedCommand),
}

#[derive(Debug, Args)]
pub struct WorkArgs {
    /// Queues to poll, in priority order. Overrides configuration.
    #[arg(long = "queue", short = 'q')]
    pub queues: Vec<String>,

    /// Number of concurrent workers. Overrides configuration.
    #[arg(long, short = 'c')]
    pub concurrency: Option<usize>,

    /// Drain the queues once and exit instead of polling forever.
    #[arg(long)]
    pub once: bool,
}

#[derive(Debug, Args)]
pub struct DispatchArgs {
    /// Text to log.
    pub text: String,

    /// Target queue.
    #[arg(long, short = 'q')]
    pub queue: Option<String>,

    /// Priority from 0 (lowest) to 5 (highest).
    #[arg(long, short = 'p')]
    pub priority: Option<i64>,

    /// Delay before the job becomes available, in seconds.
    #[arg(long)]
    pub delay_secs: Option<u64>,

    /// Fail this many attempts before succeeding.
    #[arg(long, default_value_t = 0)]
    pub fail_times: u32,
}

#[derive(Debug, Subcommand)]
pub enum FailedCommand {
    /// List failed jobs, newest first.
    List {
        /// Print as JSON lines.
        #[arg(long)]
        json: bool,
    },

    /// Push failed jobs back onto their queues.
    Retry {
        /// Job IDs to retry.
        #[arg(required_unless_present = "all")]
        ids: Vec<String>,

        /// Retry every failed job.
        #[arg(long, conflicts_with = "ids")]
        all: bool,
    },

    /// Delete a failed job without retrying it.
    Forget {
        id: String,
    },

    /// Delete every failed job.
    Flush,

    /// Delete failed jobs older than the given age.
    Prune {
        /// Age threshold in hours.
        #[arg(long, default_value_t = 24)]
        hours: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_work_overrides() {
        let cli = Cli::parse_from(["kestrel-worker", "work", "-q", "high", "-q", "default", "-c", "4"]);
        match cli.command {
            Command::Work(args) => {
                assert_eq!(args.queues, vec!["high", "default"]);
                assert_eq!(args.concurrency, Some(4));
                assert!(!args.once);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_retry_requires_ids_or_all() {
        assert!(Cli::try_parse_from(["kestrel-worker", "failed", "retry"]).is_err());
        assert!(Cli::try_parse_from(["kestrel-worker", "failed", "retry", "--all"]).is_ok());
    }

    #[test]
    fn test_prune_default_hours() {
        let cli = Cli::parse_from(["kestrel-worker", "failed", "prune"]);
        assert!(matches!(
            cli.command,
            Command::Failed(FailedCommand::Prune { hours: 24 })
        ));
    }
}
