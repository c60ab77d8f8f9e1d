use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "chromabuddy",
    version,
    about = "Context-aware code editing assistant",
    after_help = r#"Examples:
  chromabuddy index --repo .
  chromabuddy edit "add retry logic to @http_client.py" --repo .
  chromabuddy mentions "fix @utils.py and @MyClass.method"
  chromabuddy related pkg/utils.py --depth 2
  chromabuddy chat --repo .
"#
)]
pub struct Args {
    /// Log debug output to stderr.
    #[arg(long, short, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Index the project and write the project map.
    Index {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        /// Include files ignored by .gitignore.
        #[arg(long)]
        no_ignore: bool,
        /// Ask the completion service to describe undocumented symbols.
        #[arg(long)]
        describe: bool,
    },
    /// Run the edit pipeline for one request.
    Edit {
        request: String,
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        /// Apply changes without asking.
        #[arg(long)]
        yes: bool,
        /// Skip running edited files.
        #[arg(long)]
        no_verify: bool,
        /// Total verification runs per file.
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Interactive session.
    Chat {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },
    /// Parse and resolve @mentions in a text.
    Mentions {
        text: String,
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        /// Print the expanded prompt instead of JSON.
        #[arg(long)]
        expand: bool,
    },
    /// Completion candidates for a partial @mention.
    Suggest {
        partial: String,
        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },
    /// Files related to FILE through heuristic import edges.
    Related {
        file: String,
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long, default_value_t = 1)]
        depth: usize,
    },
    /// Locate a class, function or method by name.
    Symbol {
        name: String,
        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },
    /// Structural quality report for one file.
    Analyze {
        file: PathBuf,
        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },
    /// Inspect or clear the persisted cache.
    Cache {
        action: CacheAction,
        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },
    /// Recent pipeline runs.
    History {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheAction {
    Stats,
    Clear,
}
