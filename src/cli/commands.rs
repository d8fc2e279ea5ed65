use clap::{Parser, Subcommand};
use penwright::llm::types::{BackendKind, Style};
use std::path::PathBuf;

/// `Penwright` - streaming text rewrites over cloud and local models.
#[derive(Parser, Debug)]
#[command(name = "penwright")]
#[command(version = "0.1.0")]
#[command(about = "Rewrite, proofread or explain text with a language model.", long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rewrite text given as an argument or on stdin
    Rewrite {
        /// Text to rewrite (read from stdin when omitted)
        text: Option<String>,

        /// proofread, rewrite, concise, professional, friendly or explain
        #[arg(short, long, default_value = "proofread")]
        style: Style,

        /// openai, anthropic, gemini or local (default from config)
        #[arg(short, long)]
        backend: Option<BackendKind>,

        /// Model name, or model file path for the local backend
        #[arg(short, long)]
        model: Option<String>,

        /// Edit depth from 0.0 (light) to 1.0 (heavy)
        #[arg(short, long)]
        aggressiveness: Option<f64>,

        /// Wait for the full result instead of streaming
        #[arg(long)]
        no_stream: bool,

        /// Attach an image (png, jpeg, gif or webp); repeatable
        #[arg(long = "image", value_name = "PATH")]
        images: Vec<PathBuf>,
    },

    /// Manage the offline result cache
    Cache {
        #[command(subcommand)]
        cache_command: CacheCommands,
    },

    /// Manage the local model worker
    Local {
        #[command(subcommand)]
        local_command: LocalCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Delete every cached result
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum LocalCommands {
    /// Start the worker on the configured model and check it answers
    Load,
    /// Stop the worker
    Unload,
}
