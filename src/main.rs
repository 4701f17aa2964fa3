mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use encore::logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Dispatch to appropriate command handler
    match cli.command {
        // Demo initializes logging itself, once its config is loaded
        Commands::Demo(args) => commands::demo::run(args).await,
        Commands::Fingerprint(args) => {
            logging::init();
            commands::fingerprint::run(args)
        }
        Commands::Config(args) => {
            logging::init();
            commands::config::run(args.command)
        }
    }
}
