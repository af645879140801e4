//! Command-line argument parsing for the contributions client
//!
//! This module defines the CLI structure using clap derive macros,
//! providing an interface for bulk submission, bulk download and export,
//! and bulk deletion of contributions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::app::models::ComponentKind;

/// Contributions client - bulk submission and retrieval of contributed data
#[derive(Parser, Debug)]
#[command(
    name = "contribs_client",
    version,
    about = "Submit, download and delete contributed datasets in bulk",
    long_about = "A client for bulk operations against a contributions API.
Validates and digests payloads before upload, splits oversize queries, and
schedules requests concurrently under a rate limit and wall-clock budget."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit contributions from a JSON file
    Submit(SubmitArgs),

    /// Download contributions and their components to gzipped JSON files
    Download(DownloadArgs),

    /// Delete contributions matching a query
    Delete(DeleteArgs),
}

/// Arguments for the submit command
#[derive(Args, Debug, Clone)]
pub struct SubmitArgs {
    /// JSON file holding an array of contributions
    #[arg(value_name = "FILE")]
    pub input: PathBuf,

    /// Project to assign to records that do not name one
    #[arg(short, long)]
    pub project: Option<String>,

    /// Submit duplicate components instead of failing on them
    #[arg(long)]
    pub ignore_dupes: bool,

    /// Skip the pre-submission duplicate check against the server
    #[arg(long)]
    pub no_dedupe: bool,

    /// Number of concurrent request workers
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Wall-clock budget in seconds for the whole run
    #[arg(short, long)]
    pub timeout: Option<u64>,
}

/// Arguments for the download command
#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    /// Project to download
    #[arg(short, long)]
    pub project: String,

    /// Additional query filters as key=value pairs (e.g. formula__contains=Fe)
    #[arg(short = 'f', long = "filter", value_name = "KEY=VALUE")]
    pub filters: Vec<String>,

    /// Output directory for exported files
    #[arg(short, long, value_name = "DIR")]
    pub outdir: Option<PathBuf>,

    /// Component kinds to include (defaults to all)
    #[arg(short = 'c', long = "component", value_enum)]
    pub components: Vec<ComponentKind>,

    /// Overwrite existing export files instead of treating them as cache hits
    #[arg(long)]
    pub overwrite: bool,

    /// Number of concurrent request workers
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Wall-clock budget in seconds for the whole run
    #[arg(short, long)]
    pub timeout: Option<u64>,
}

/// Arguments for the delete command
#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    /// Project whose contributions should be deleted
    #[arg(short, long)]
    pub project: String,

    /// Additional query filters as key=value pairs
    #[arg(short = 'f', long = "filter", value_name = "KEY=VALUE")]
    pub filters: Vec<String>,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Wall-clock budget in seconds for the whole run
    #[arg(short, long)]
    pub timeout: Option<u64>,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the logging level based on global arguments
    pub fn log_level(&self) -> tracing::Level {
        if self.global.quiet {
            tracing::Level::ERROR
        } else if self.global.very_verbose {
            tracing::Level::DEBUG
        } else if self.global.verbose {
            tracing::Level::INFO
        } else {
            tracing::Level::WARN
        }
    }
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
    fn test_submit_args() {
        let cli = Cli::try_parse_from([
            "contribs_client",
            "submit",
            "batch.json",
            "--project",
            "sandbox",
            "--no-dedupe",
        ])
        .unwrap();
        match cli.command {
            Commands::Submit(args) => {
                assert_eq!(args.input, PathBuf::from("batch.json"));
                assert_eq!(args.project.as_deref(), Some("sandbox"));
                assert!(args.no_dedupe);
                assert!(!args.ignore_dupes);
            }
            _ => panic!("expected submit command"),
        }
    }

    #[test]
    fn test_download_args_with_components() {
        let cli = Cli::try_parse_from([
            "contribs_client",
            "download",
            "--project",
            "sandbox",
            "--component",
            "structures",
            "--filter",
            "formula__contains=Fe",
        ])
        .unwrap();
        match cli.command {
            Commands::Download(args) => {
                assert_eq!(args.project, "sandbox");
                assert_eq!(args.components, vec![ComponentKind::Structure]);
                assert_eq!(args.filters, vec!["formula__contains=Fe"]);
            }
            _ => panic!("expected download command"),
        }
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "contribs_client",
            "--verbose",
            "delete",
            "--project",
            "sandbox",
            "--yes",
        ])
        .unwrap();
        assert!(cli.global.verbose);
        match cli.command {
            Commands::Delete(args) => assert!(args.yes),
            _ => panic!("expected delete command"),
        }
    }
}
