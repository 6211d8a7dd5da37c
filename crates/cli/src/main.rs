//! Kindred CLI — the main entry point.
//!
//! Commands:
//! - `chat`    — Talk to the companion (single message or interactive)
//! - `memory`  — Run, inspect, and audit user memory updates
//! - `config`  — Show, locate, or initialize configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "kindred",
    about = "Kindred — an AI companion with long-term user memory",
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
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the companion
    Chat {
        /// User the conversation belongs to
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Override the chat model for this session
        #[arg(long)]
        model: Option<String>,
    },

    /// Manage user memory
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum MemoryCommands {
    /// Run a memory update now
    Update {
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Reason code recorded in the summarization log
        #[arg(short, long, default_value = "manual")]
        trigger: String,
    },

    /// Print the stored user context
    Show {
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Render the block injected into the system prompt instead of JSON
        #[arg(long)]
        prompt: bool,
    },

    /// List recent summarization log entries
    Logs {
        #[arg(short, long, default_value = "local")]
        user: String,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration (API keys redacted)
    Show,
    /// Print the config file path
    Path,
    /// Write a default config file if none exists
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Chat {
            user,
            message,
            model,
        } => commands::chat::run(&user, message, model).await?,
        Commands::Memory { command } => match command {
            MemoryCommands::Update { user, trigger } => {
                commands::memory::update(&user, &trigger).await?
            }
            MemoryCommands::Show { user, prompt } => commands::memory::show(&user, prompt).await?,
            MemoryCommands::Logs { user, limit } => commands::memory::logs(&user, limit).await?,
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => commands::config_cmd::show().await?,
            ConfigCommands::Path => commands::config_cmd::path().await?,
            ConfigCommands::Init => commands::config_cmd::init().await?,
        },
    }

    Ok(())
}
