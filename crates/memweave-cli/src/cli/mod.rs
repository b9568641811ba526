//! CLI command definitions for the `memweave` binary.

pub mod memory;
pub mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use memweave_types::run::ReconcileMode;

/// Reconcile conversational facts into long-term memory.
#[derive(Parser)]
#[command(name = "memweave", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (defaults to ~/.memweave/memweave.toml).
    #[arg(long, global = true, env = "MEMWEAVE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the reconciliation pipeline over a dataset of units.
    Run {
        /// Dataset of units, as a JSON array or JSON Lines.
        #[arg(long, short)]
        input: PathBuf,

        /// JSONL file that receives one result record per unit.
        #[arg(long, short)]
        output: PathBuf,

        /// Progress file used to resume interrupted runs.
        #[arg(long, short)]
        progress: PathBuf,

        /// Concurrent units (overrides `[pipeline] workers`).
        #[arg(long, short)]
        workers: Option<usize>,

        /// Reconciliation mode: arbitrated or append-only.
        #[arg(long)]
        mode: Option<ReconcileMode>,

        /// Process at most this many units from the dataset.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Search a user's memories by similarity.
    Search {
        /// User namespace to search.
        #[arg(long, short)]
        user: String,

        /// Free-text query.
        #[arg(long)]
        query: String,

        /// Number of hits to return.
        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },

    /// Count the memories stored for a user.
    Count {
        #[arg(long, short)]
        user: String,
    },

    /// Delete every memory stored for a user.
    Clear {
        #[arg(long, short)]
        user: String,
    },

    /// Drop the configured memory collection.
    Drop {
        /// Skip the confirmation message.
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "memweave",
            "-v",
            "run",
            "--input",
            "units.jsonl",
            "--output",
            "results.jsonl",
            "--progress",
            "progress.json",
            "--workers",
            "4",
            "--mode",
            "append-only",
            "--limit",
            "2",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Run {
                workers, mode, limit, ..
            } => {
                assert_eq!(workers, Some(4));
                assert_eq!(mode, Some(ReconcileMode::AppendOnly));
                assert_eq!(limit, Some(2));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn rejects_unknown_mode() {
        let parsed = Cli::try_parse_from([
            "memweave", "run", "-i", "a", "-o", "b", "-p", "c", "--mode", "yolo",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn clear_requires_a_user() {
        assert!(Cli::try_parse_from(["memweave", "clear"]).is_err());
        let cli = Cli::try_parse_from(["memweave", "clear", "-u", "u7"]).unwrap();
        assert!(matches!(cli.command, Commands::Clear { user } if user == "u7"));
    }

    #[test]
    fn global_json_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["memweave", "count", "--user", "u1", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Count { user } if user == "u1"));
    }
}
