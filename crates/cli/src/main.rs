//! chatweave CLI — the main entry point.
//!
//! Commands:
//! - `assemble` — Build the prompt for one branch of a stored conversation
//! - `count`    — Count tokens with the configured encoding
//! - `config`   — Show the effective configuration

use chatweave_config::ContextStrategy;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "chatweave",
    about = "chatweave — Conversation context assembly",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble the prompt payload for a conversation branch
    Assemble {
        /// JSON-lines message file
        #[arg(short, long)]
        thread: PathBuf,

        /// Conversation id
        #[arg(short, long)]
        conversation: String,

        /// Id of the newest message in the branch
        #[arg(short, long)]
        leaf: Option<String>,

        /// Instructions injected before the newest message
        #[arg(short, long)]
        instructions: Option<String>,

        /// Overflow strategy (discard or refine)
        #[arg(short, long)]
        strategy: Option<ContextStrategy>,

        /// Override the context window
        #[arg(long)]
        max_context_tokens: Option<usize>,

        /// Do not write token counts back to the thread file
        #[arg(long)]
        no_persist: bool,
    },

    /// Count tokens in a piece of text
    Count {
        /// Text to count
        text: String,

        /// Count as a chat message (with role and overhead)
        #[arg(short, long)]
        message: bool,
    },

    /// Show the effective configuration
    Config {
        /// Print the config file path only
        #[arg(long)]
        path: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Assemble {
            thread,
            conversation,
            leaf,
            instructions,
            strategy,
            max_context_tokens,
            no_persist,
        } => {
            commands::assemble::run(commands::assemble::AssembleArgs {
                thread,
                conversation,
                leaf,
                instructions,
                strategy,
                max_context_tokens,
                persist: !no_persist,
                debug: cli.verbose,
            })
            .await?
        }
        Commands::Count { text, message } => commands::count::run(&text, message)?,
        Commands::Config { path } => {
            if path {
                commands::config_cmd::path()?
            } else {
                commands::config_cmd::show()?
            }
        }
    }

    Ok(())
}
