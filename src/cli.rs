use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use docroute::{fusion::RetrievalStrategy, organizer::OrganizeMode};

#[derive(Debug, Parser)]
#[command(
    name = "docroute",
    about = "A conversational router for your local documents"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the intent an utterance classifies as, without acting on it
    Classify(UtteranceArgs),
    /// Classify an utterance and carry it out
    Route(UtteranceArgs),
    /// Talk to the router interactively
    Chat(ChatArgs),
    /// Fused search over the active collection
    Search(SearchArgs),
    /// Manage knowledge collections
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },
    /// Index a file or folder into the active collection
    Index(IndexArgs),
    /// Propose, inspect and carry out folder reorganizations
    Organize {
        #[command(subcommand)]
        action: OrganizeAction,
    },
    /// Show and change stored settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Check the rankers, collections and data directory
    Health {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Utterances --

#[derive(Debug, Parser)]
pub struct UtteranceArgs {
    /// The utterance; several words are joined with spaces
    #[arg(required = true, num_args = 1..)]
    pub words: Vec<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl UtteranceArgs {
    pub fn text(&self) -> String {
        self.words.join(" ")
    }
}

// -- Chat --

#[derive(Debug, Parser)]
pub struct ChatArgs {
    /// List the source documents after each answer
    #[arg(long)]
    pub show_sources: bool,

    /// Retrieval strategy for this session (default: the strategy setting)
    #[arg(long, value_enum)]
    pub strategy: Option<RetrievalStrategy>,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return (default: the top_k setting)
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Output only document ids (one per line)
    #[arg(long)]
    pub files: bool,

    /// Retrieval strategy (default: the strategy setting)
    #[arg(short, long, value_enum)]
    pub strategy: Option<RetrievalStrategy>,
}

// -- Collection subcommands --

#[derive(Debug, Subcommand)]
pub enum CollectionAction {
    /// Create an empty collection
    Create {
        /// Name of the new collection
        name: String,
    },
    /// List all collections
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Answer questions from another collection
    Use {
        /// Name of the collection to switch to
        name: String,
    },
    /// Delete a collection and its indexed documents
    Delete {
        /// Name of the collection to delete
        name: String,
    },
    /// Show a collection's details
    Info {
        /// Name of the collection
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// -- Index --

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// File or directory to index
    pub path: PathBuf,

    /// Descend into subdirectories
    #[arg(short, long)]
    pub recursive: bool,
}

// -- Organize --

#[derive(Debug, Subcommand)]
pub enum OrganizeAction {
    /// Propose a folder structure for the files in a directory
    Propose {
        /// Directory whose files are grouped
        dir: PathBuf,

        /// How folders are chosen
        #[arg(long, value_enum, default_value = "themes")]
        mode: OrganizeMode,

        /// Where the folders are created (default: <dir>_organized)
        #[arg(long)]
        target: Option<PathBuf>,

        /// Output the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a stored plan, or list all plans
    Show {
        /// Plan id
        id: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Confirm a proposed plan and carry it out
    Confirm {
        /// Plan id
        id: String,
    },
}

// -- Settings --

#[derive(Debug, Subcommand)]
pub enum SettingsAction {
    /// Show the resolved settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a setting in config.db
    Set {
        /// Setting key (e.g. rrf_k, top_k, strategy)
        key: String,
        /// New value
        value: String,
    },
    /// Remove a stored setting (revert to default)
    Clear {
        /// Setting key
        key: String,
    },
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
            "docroute",
            &mut std::io::stdout(),
        );
    }
}
