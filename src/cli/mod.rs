//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "icd-mapper",
    version,
    author = "neur0map",
    about = "Map free-text diagnoses to ICD-10 codes",
    long_about = "icd-mapper resolves clinical diagnosis phrases to ICD-10 codes. A keyword stage \
                  (token-sort similarity) answers near-verbatim phrases; everything else falls back \
                  to semantic search over sentence embeddings of the code catalog. Each result \
                  carries a confidence level, a justification and alternative codes."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/icd-mapper/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Map diagnoses to ICD-10 codes and print a batch report as JSON
    Map {
        /// Diagnosis phrases
        diagnoses: Vec<String>,

        /// Read diagnoses from a file, one per line
        #[arg(short, long, value_name = "FILE")]
        file: Option<PathBuf>,

        /// Resolve on a bounded pool of worker tasks
        #[arg(long)]
        concurrent: bool,
    },

    /// Show ranked candidate codes for a phrase
    Search {
        /// Search query text
        query: String,

        /// Maximum number of results to return
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// List catalog entries in load order
    Codes {
        /// Index of the first entry
        #[arg(short, long, default_value = "0", allow_negative_numbers = true)]
        offset: i64,

        /// Maximum number of entries
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Build or refresh the knowledge base
    Build {
        /// Re-embed the catalog even when a matching knowledge base exists
        #[arg(short, long)]
        force: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
