mod config;
mod error;

use clap::Parser;
use config::{Cli, Commands, OffsetsCommand, ServerConfig};

mod cmd;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = ServerConfig::load(cli.command.config_path());
    let default_filter = config
        .as_ref()
        .ok()
        .and_then(|c| c.log_level.clone())
        .unwrap_or_else(|| "info".into());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let result = match config {
        Ok(config) => match cli.command {
            Commands::Serve(args) => cmd::serve::run(args, config).await,
            Commands::Offsets(OffsetsCommand::Get(args)) => cmd::offsets::get(args, config).await,
            Commands::Offsets(OffsetsCommand::Set(args)) => cmd::offsets::set(args, config).await,
        },
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
