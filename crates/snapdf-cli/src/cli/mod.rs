//! CLI entry and dispatch.

use anyhow::{Context, Result};
use clap::Parser;
use snapdf_core::config;

mod commands;
mod logging;

#[derive(Parser)]
#[command(name = "snapdf")]
#[command(version)]
#[command(about = "Telegram bot that turns the images you send it into one PDF")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the Telegram bot (long-polling) and the liveness endpoint
    Bot {
        /// Override the liveness port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Print the config file path
    Path,
    /// Write a commented default config file
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init();

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    // default to running the bot
    let command = cli.command.unwrap_or(Commands::Bot { port: None });

    match command {
        Commands::Bot { port } => {
            let config = config::Config::load().context("load config")?;
            commands::bot::run(config, port).await
        }
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        },
    }
}
