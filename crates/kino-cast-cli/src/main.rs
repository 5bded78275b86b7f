//! Kino Cast CLI - Casting session simulator
//!
//! Features:
//! - Capability detection against a described client environment
//! - Content-type sniffing for stream URLs
//! - Simulated casting sessions with drop and reconnection

use clap::{Parser, Subcommand};
use kino_cast_core::Protocol;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

/// Kino Cast CLI - Casting toolkit
#[derive(Parser)]
#[command(name = "kino-cast")]
#[command(author = "Purple Squirrel Media")]
#[command(version)]
#[command(about = "Casting capability detection and session simulation", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json, table)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect casting capabilities of a client environment
    Detect {
        /// Environment preset (desktop, everything, bare, default) or JSON file
        #[arg(short, long, default_value = "desktop")]
        env: String,
    },

    /// Show the content type a stream URL is cast with
    ContentType {
        /// Stream URL
        url: String,
    },

    /// Run a simulated casting session
    Simulate {
        /// Stream URL to cast
        url: String,

        /// Protocol to start
        #[arg(short, long, default_value = "chromecast")]
        protocol: Protocol,

        /// Environment preset (desktop, everything, bare, default) or JSON file
        #[arg(short, long, default_value = "desktop")]
        env: String,

        /// JSON file scripting native call outcomes
        #[arg(short, long)]
        behavior: Option<PathBuf>,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Simulate the remote side dropping the session
        #[arg(long)]
        drop: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    kino_cast_core::init();

    match cli.command {
        Commands::Detect { env } => {
            commands::detect(&env, &cli.format)?;
        }
        Commands::ContentType { url } => {
            commands::content_type(&url, &cli.format)?;
        }
        Commands::Simulate { url, protocol, env, behavior, config, drop } => {
            let args = commands::SimulateArgs {
                url,
                protocol,
                env,
                behavior,
                config,
                drop,
            };
            commands::simulate(args, &cli.format).await?;
        }
    }

    Ok(())
}
