//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "kbsearch",
    version,
    about = "Hybrid vector and keyword retrieval over a knowledge base",
    long_about = "kbsearch answers natural-language queries against a corpus of document chunks \
                  and code examples by fusing embedding similarity with keyword ranking. \
                  Embeddings are supplied by the caller; this tool never computes them."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/kbsearch/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Deployment profile to apply (e.g., "small", "large")
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a hybrid search
    Search {
        /// Search query text
        text: String,

        /// JSON file holding the query embedding as an array of numbers
        #[arg(short, long, value_name = "FILE")]
        embedding: PathBuf,

        /// Embedding width (inferred from the embedding when omitted)
        #[arg(short, long)]
        dimension: Option<usize>,

        /// Maximum number of results to return
        #[arg(short, long)]
        limit: Option<usize>,

        /// Restrict results to one source
        #[arg(short, long)]
        source: Option<String>,

        /// Metadata containment filter as a JSON object
        #[arg(short, long, value_name = "JSON")]
        filter: Option<String>,

        /// Search code examples instead of document chunks
        #[arg(long)]
        code: bool,

        /// Build the vector index for this slot before searching
        #[arg(long)]
        index: bool,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show chunk and code example counts per source
    Counts {
        /// Source ids
        #[arg(required = true)]
        source_ids: Vec<String>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show corpus statistics
    Stats,

    /// Manage vector indexes
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum IndexAction {
    /// Build a vector index and report its coverage
    Build {
        /// Embedding width of the slot to index
        #[arg(short, long)]
        dimension: usize,

        /// Index code examples instead of document chunks
        #[arg(long)]
        code: bool,

        /// Build a partial index for one source only
        #[arg(short, long)]
        source: Option<String>,

        /// Also build partial indexes for every large source
        #[arg(long, conflicts_with = "source")]
        partial: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

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
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
