//! Scribe CLI - turn doctor-patient conversations into clinical notes with a
//! locally supervised Ollama server.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

/// Scribe - local clinical note generation
#[derive(Parser)]
#[command(name = "scribe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Port for the embedded Ollama server
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Path to the ollama binary
    #[arg(long, global = true)]
    ollama: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the embedded Ollama server until interrupted
    Serve,

    /// Show paths, configuration and server status
    Info,

    /// Manage the note generation model
    Model {
        #[command(subcommand)]
        command: ModelCommands,
    },

    /// Generate a clinical note from a conversation transcript
    Generate {
        /// Transcript file (reads stdin when omitted or "-")
        file: Option<PathBuf>,
        /// Model to use (default: gpt-oss:20b)
        #[arg(short, long)]
        model: Option<String>,
        /// Print phase and token statistics to stderr
        #[arg(long)]
        stats: bool,
    },
}

#[derive(Subcommand)]
enum ModelCommands {
    /// Download the required model if it is missing
    Pull,
    /// List models known to the server
    List,
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose { "debug" } else { "warn" };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let config = commands::supervisor_config(cli.port, cli.ollama);

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| miette::miette!("Failed to start async runtime: {}", e))?;

    runtime.block_on(async move {
        match cli.command {
            Commands::Serve => commands::serve::run(config).await,
            Commands::Info => commands::info::run(config).await,
            Commands::Model { command } => match command {
                ModelCommands::Pull => commands::model::pull(config).await,
                ModelCommands::List => commands::model::list(config).await,
            },
            Commands::Generate { file, model, stats } => {
                commands::generate::run(config, file.as_deref(), model, stats).await
            }
        }
    })
}
