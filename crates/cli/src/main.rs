//! Concierge CLI: the main entry point.
//!
//! Commands:
//! - `onboard` writes a default config
//! - `chat`    runs turns interactively or for a single message
//! - `status`  shows configuration and storage
//! - `memory`  lists, adds or clears a user's long-term memories

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "concierge",
    about = "Concierge: a personal assistant with memory and tools",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "CONCIERGE_LOG_JSON")]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Onboard,

    /// Talk to the assistant
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Whose conversation and memories to use
        #[arg(short, long, default_value = "local", env = "CONCIERGE_USER")]
        user: String,
    },

    /// Show configuration and storage status
    Status {
        /// Also check that the provider endpoint answers
        #[arg(long)]
        check: bool,
    },

    /// Manage long-term memories
    Memory {
        #[command(subcommand)]
        action: MemoryAction,

        /// Whose memories to manage
        #[arg(short, long, default_value = "local", env = "CONCIERGE_USER")]
        user: String,
    },
}

#[derive(Subcommand)]
enum MemoryAction {
    /// List stored memories
    List {
        /// Include archived memories
        #[arg(long)]
        all: bool,
    },

    /// Store a memory
    Add {
        content: String,

        /// Comma-separated tags
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Delete every memory of the user
    Clear {
        #[arg(long)]
        confirm: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Chat { message, user } => commands::chat::run(message, &user).await?,
        Commands::Status { check } => commands::status::run(check).await?,
        Commands::Memory { action, user } => match action {
            MemoryAction::List { all } => commands::memory::list(&user, all).await?,
            MemoryAction::Add { content, tags } => commands::memory::add(&user, &content, tags).await?,
            MemoryAction::Clear { confirm } => commands::memory::clear(&user, confirm).await?,
        },
    }

    Ok(())
}
