//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use eyre::{Context, Result};
use std::path::PathBuf;
use tracing::debug;

use crate::domain::{Difficulty, ModelSelector};

/// coursegen - AI course generator
#[derive(Parser)]
#[command(
    name = "cg",
    about = "Generate multi-chapter courses with an LLM, then study them",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a course from a topic
    Generate {
        /// What the course should teach
        topic: String,

        /// Number of chapters (defaults to generation.default-chapters)
        #[arg(short = 'n', long)]
        chapters: Option<u32>,

        /// beginner, intermediate or advanced
        #[arg(short, long, default_value = "intermediate")]
        difficulty: Difficulty,

        /// Model selector: free-trial, auto or a configured model id
        #[arg(short, long, default_value = "auto")]
        model: ModelSelector,

        /// Keep the course in memory instead of the database
        #[arg(long)]
        dry_run: bool,
    },

    /// List stored courses
    Courses,

    /// Print a stored course
    Show {
        /// Course ID (or unique prefix)
        id: String,

        /// Print only this chapter
        #[arg(long)]
        chapter: Option<u32>,
    },

    /// Chat with an assistant about one chapter
    Chat {
        /// Course ID (or unique prefix)
        id: String,

        /// Chapter index
        chapter: u32,

        /// Model selector
        #[arg(short, long, default_value = "auto")]
        model: ModelSelector,
    },

    /// Score an answer to an exercise or exam chapter
    Score {
        /// Course ID (or unique prefix)
        id: String,

        /// Chapter index
        chapter: u32,

        /// The answer, or @path to read it from a file
        answer: String,

        /// Model selector
        #[arg(short, long, default_value = "auto")]
        model: ModelSelector,
    },

    /// Generate review flashcards from a course
    Flashcards {
        /// Course ID (or unique prefix)
        id: String,

        /// Only use this chapter
        #[arg(long)]
        chapter: Option<u32>,

        /// Maximum number of cards
        #[arg(long, default_value = "5")]
        max: usize,

        /// Model selector
        #[arg(short, long, default_value = "auto")]
        model: ModelSelector,
    },

    /// List selectable models
    Models,
}

/// Resolve an answer argument; `@path` reads the file
pub fn read_answer(arg: &str) -> Result<String> {
    debug!(len = arg.len(), "read_answer: called");
    match arg.strip_prefix('@') {
        Some(path) => {
            std::fs::read_to_string(path).context(format!("Failed to read answer from {}", path))
        }
        None => Ok(arg.to_string()),
    }
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("coursegen")
        .join("logs")
        .join("coursegen.log");
    debug!(?path, "get_log_path: returning path");
    path
}

/// Generate the after_help text with config and log locations
pub fn generate_after_help() -> String {
    debug!("generate_after_help: called");
    let mut help = String::new();
    help.push_str("Config:\n");
    help.push_str("  ./.coursegen.yml\n");
    if let Some(dir) = dirs::config_dir() {
        help.push_str(&format!("  {}\n", dir.join("coursegen").join("coursegen.yml").display()));
    }
    help.push_str(&format!("\nLogs are written to: {}", get_log_path().display()));
    help
}
