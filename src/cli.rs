// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `subforge`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "subforge",
    version,
    about = "Run and track the stages of a video subtitling pipeline.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the stage registry (TOML).
    ///
    /// Default: `Subforge.toml` in the current working directory, or the
    /// built-in pipeline when that file does not exist.
    #[arg(long, global = true, env = "SUBFORGE_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Root directory for job directories (overrides `[config].root`).
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Owner segment of job paths (overrides `[config].owner`).
    #[arg(long, global = true, value_name = "NAME")]
    pub owner: Option<String>,

    /// Device capability passed to stages (overrides `[capability].device`).
    #[arg(long, global = true, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SUBFORGE_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run stages of a job (all stages when none are named).
    Run {
        #[arg(long, value_name = "JOB_ID")]
        job: String,

        #[arg(long, value_name = "NAME", num_args = 1.., value_delimiter = ',')]
        stages: Vec<String>,

        /// Source video; recorded in the manifest as the `source` role.
        #[arg(long, value_name = "PATH")]
        input: Option<PathBuf>,

        /// Re-run stages that are already COMPLETED.
        #[arg(long)]
        force: bool,

        /// Per-stage timeout in seconds (overrides `[config].timeout_secs`).
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Keep running stages that do not depend on a failed one.
        #[arg(long)]
        keep_going: bool,

        /// Move a corrupt manifest aside and start a fresh one.
        #[arg(long)]
        quarantine_corrupt: bool,
    },

    /// Return stages to PENDING without deleting their files.
    Reset {
        #[arg(long, value_name = "JOB_ID")]
        job: String,

        #[arg(long, value_name = "NAME", num_args = 1.., value_delimiter = ',', required = true)]
        stages: Vec<String>,

        /// Print what would change without writing the manifest.
        #[arg(long)]
        dry_run: bool,

        /// Also reset every recorded stage that depends on a named one.
        #[arg(long)]
        cascade: bool,
    },

    /// Allocate a new job directory and print its id.
    New {
        /// Allocation date (YYYY-MM-DD); defaults to today (UTC).
        #[arg(long, value_name = "DATE")]
        date: Option<NaiveDate>,

        /// Source video to record in the new job's manifest.
        #[arg(long, value_name = "PATH")]
        input: Option<PathBuf>,
    },

    /// Print a job's manifest summary.
    Status {
        #[arg(long, value_name = "JOB_ID")]
        job: String,
    },

    /// Print the stage registry and the execution order, without running.
    Plan {
        #[arg(long, value_name = "NAME", num_args = 1.., value_delimiter = ',')]
        stages: Vec<String>,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_accepts_repeated_and_comma_separated_stages() {
        let args = CliArgs::try_parse_from([
            "subforge", "run", "--job", "20261019-0001", "--stages", "demux,metadata", "--stages",
            "separate", "--force",
        ])
        .unwrap();
        match args.command {
            Command::Run { stages, force, .. } => {
                assert_eq!(stages, vec!["demux", "metadata", "separate"]);
                assert!(force);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn reset_requires_stages() {
        assert!(CliArgs::try_parse_from(["subforge", "reset", "--job", "20261019-0001"]).is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let args = CliArgs::try_parse_from([
            "subforge", "status", "--job", "20261019-0001", "--root", "/srv/jobs", "--owner", "studio",
        ])
        .unwrap();
        assert_eq!(args.root, Some(PathBuf::from("/srv/jobs")));
        assert_eq!(args.owner.as_deref(), Some("studio"));
    }

    #[test]
    fn new_parses_date() {
        let args = CliArgs::try_parse_from(["subforge", "new", "--date", "2026-10-19"]).unwrap();
        match args.command {
            Command::New { date, .. } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2026, 10, 19));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
