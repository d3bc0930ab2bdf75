//! Spindle CLI — the main entry point.
//!
//! Commands:
//! - `onboard`  — Write a starter config file
//! - `chat`     — Interactive chat or single-message mode
//! - `servers`  — Inspect configured tool servers

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "spindle",
    about = "Spindle — a chat client with a tool-orchestrating conversation engine",
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
    /// Write a starter configuration file
    Onboard,

    /// Chat with the engine
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Optional system prompt for the conversation
        #[arg(short, long)]
        system: Option<String>,
    },

    /// List configured tool servers and their tools
    Servers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Chat { message, system } => commands::chat::run(message, system).await?,
        Commands::Servers => commands::servers::run().await?,
    }

    Ok(())
}
