//! Command line argument parsing for the mailquery CLI using clap.

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::search::Grouping;
use crate::sort::SortBy;

/// mailquery - plan, optimize and run mailbox searches against fixtures
#[derive(Parser, Debug, Clone)]
#[command(name = "mailquery")]
#[command(about = "Plan, optimize and run mailbox search queries")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct MailQueryArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug, 4=trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human", global = true)]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl MailQueryArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1, // Default to normal
                n => n,
            }
        }
    }

    /// The log level matching [`MailQueryArgs::verbosity`].
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbosity() {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Warn,
            2 => log::LevelFilter::Info,
            3 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show the raw and optimized plan of a fixture
    Plan(PlanArgs),

    /// Run a fixture's plan end to end and print the hits
    Search(SearchArgs),
}

/// Arguments for printing a plan
#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    /// Fixture file (JSON)
    #[arg(value_name = "FIXTURE")]
    pub fixture: PathBuf,
}

/// Arguments for running a search
#[derive(Parser, Debug, Clone)]
pub struct SearchArgs {
    /// Fixture file (JSON)
    #[arg(value_name = "FIXTURE")]
    pub fixture: PathBuf,

    /// Fold matched parts into one hit per message (default)
    #[arg(long, conflicts_with = "ungrouped")]
    pub grouped: bool,

    /// Return raw hits as the plan produces them
    #[arg(long)]
    pub ungrouped: bool,

    /// Load backing items in chunks of this size
    #[arg(long, value_name = "N")]
    pub preload: Option<usize>,

    /// Maximum number of hits to print
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Hits to skip from the top
    #[arg(short, long)]
    pub offset: Option<usize>,

    /// Sort order (dateDesc, dateAsc, subjAsc, subjDesc, nameAsc, nameDesc,
    /// sizeAsc, sizeDesc, scoreDesc, none)
    #[arg(short, long)]
    pub sort: Option<SortBy>,

    /// Search configuration file (JSON)
    #[arg(short, long, env = "MAILQUERY_CONFIG")]
    pub config: Option<PathBuf>,
}

impl SearchArgs {
    /// The grouping requested on the command line.
    pub fn grouping(&self) -> Grouping {
        if self.ungrouped {
            Grouping::Ungrouped
        } else {
            Grouping::Grouped
        }
    }
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}
