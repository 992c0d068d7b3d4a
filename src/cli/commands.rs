//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - todo: list groups with work left
//! - report: print the status of every experiment
//! - run: execute pending experiments
//! - cache: refresh the cache file and print remaining work
//! - csv: print results as semicolon-separated rows
//! - clean: delete error logs and the cache

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Benchlab - run and track long-running solver benchmarks
#[derive(Parser, Debug)]
#[command(name = "benchlab")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// List all groups with work left
    Todo {
        /// Number of iterations to consider (default from config)
        iterations: Option<usize>,
    },

    /// Report all experiments, or the experiments of one group
    Report {
        /// Group to report
        group: Option<String>,
    },

    /// Run pending experiments, optionally of one group only
    Run {
        /// Group to run
        group: Option<String>,
    },

    /// Update the cache and print the remaining work
    Cache,

    /// Write the results as CSV to stdout
    Csv,

    /// Delete the cache and the logs of experiments that errored
    Clean,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_structure() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_no_args() {
        // No subcommand means usage is printed
        let cli = Cli::try_parse_from(["benchlab"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.verbose);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from(["benchlab", "cache", "-v", "-c", "/tmp/bench.yml"]).unwrap();
        assert!(cli.is_verbose());
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/bench.yml")));
        assert_eq!(cli.command, Some(Commands::Cache));
    }

    #[test]
    fn test_todo_command() {
        let cli = Cli::try_parse_from(["benchlab", "todo"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Todo { iterations: None }));

        let cli = Cli::try_parse_from(["benchlab", "todo", "3"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Todo { iterations: Some(3) }));
    }

    #[test]
    fn test_todo_rejects_non_number() {
        assert!(Cli::try_parse_from(["benchlab", "todo", "many"]).is_err());
    }

    #[test]
    fn test_report_and_run_groups() {
        let cli = Cli::try_parse_from(["benchlab", "report", "game"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Report {
                group: Some("game".to_string())
            })
        );

        let cli = Cli::try_parse_from(["benchlab", "run"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Run { group: None }));
    }

    #[test]
    fn test_simple_commands() {
        for (arg, expected) in [("cache", Commands::Cache), ("csv", Commands::Csv), ("clean", Commands::Clean)] {
            let cli = Cli::try_parse_from(["benchlab", arg]).unwrap();
            assert_eq!(cli.command, Some(expected));
        }
    }

    #[test]
    fn test_unknown_command_is_error() {
        assert!(Cli::try_parse_from(["benchlab", "frobnicate"]).is_err());
    }
}
