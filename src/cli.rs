use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use skillsearch::{
    direct::{DEFAULT_QUERY_THRESHOLD, DEFAULT_SEARCH_THRESHOLD, DEFAULT_SEARCH_TOP_K},
    search::DEFAULT_SCORE_THRESHOLD,
    sparse::{DEFAULT_B, DEFAULT_K1},
};

#[derive(Debug, Parser)]
#[command(
    name = "skillsearch",
    about = "Hybrid dense + BM25 keyword retrieval over a hosted vector index"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the embedding model ID
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Hybrid (dense + BM25) retrieval for one or more queries
    Retrieve(RetrieveArgs),
    /// Dense lookup returning every distinct matching text
    Query(QueryArgs),
    /// Dense lookup returning the best matching texts in order
    Search(SearchArgs),
    /// Embed texts and store them in the index
    Upsert(UpsertArgs),
    /// Generate keywords for a topic and store them
    Keywords(KeywordsArgs),
    /// Manage the BM25 encoder snapshot
    Encoder {
        #[command(subcommand)]
        action: EncoderAction,
    },
    /// Show configuration and encoder status
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

/// Where list inputs come from.
#[derive(Debug, Parser)]
pub struct InputArgs {
    /// Items given on the command line
    pub items: Vec<String>,

    /// Read a JSON array of strings from stdin instead
    #[arg(long, conflicts_with = "items")]
    pub stdin_json: bool,
}

// -- Retrieval --

#[derive(Debug, Parser)]
pub struct RetrieveArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Drop results scoring at or below this
    #[arg(long, default_value_t = DEFAULT_SCORE_THRESHOLD)]
    pub threshold: f32,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct QueryArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Drop results scoring below this
    #[arg(long, default_value_t = DEFAULT_QUERY_THRESHOLD)]
    pub threshold: f32,

    /// Index namespace to query
    #[arg(long, default_value = "")]
    pub namespace: String,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct SearchArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Number of matches to request
    #[arg(short = 'n', long, default_value_t = DEFAULT_SEARCH_TOP_K)]
    pub top_k: usize,

    /// Drop results scoring below this
    #[arg(long, default_value_t = DEFAULT_SEARCH_THRESHOLD)]
    pub threshold: f32,

    /// Index namespace to query
    #[arg(long, default_value = "")]
    pub namespace: String,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Ingestion --

#[derive(Debug, Parser)]
pub struct UpsertArgs {
    #[command(flatten)]
    pub input: InputArgs,
}

#[derive(Debug, Parser)]
pub struct KeywordsArgs {
    /// Main topic
    pub topic: String,

    /// Sub-topic (can be repeated)
    #[arg(short = 's', long = "sub-topic")]
    pub sub_topics: Vec<String>,

    /// Print the keywords without storing them
    #[arg(long)]
    pub no_store: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Encoder --

#[derive(Debug, Subcommand)]
pub enum EncoderAction {
    /// Show the encoder snapshot statistics
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Fit the encoder on a corpus file (one document per line) and save it
    Fit {
        /// Corpus file, or `-` for stdin
        corpus: PathBuf,

        /// Term frequency saturation
        #[arg(long, default_value_t = DEFAULT_K1)]
        k1: f32,

        /// Document length normalization
        #[arg(long, default_value_t = DEFAULT_B)]
        b: f32,
    },
    /// Delete the snapshot so the next run refits the default encoder
    Clear,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "skillsearch",
            &mut std::io::stdout(),
        );
    }
}
