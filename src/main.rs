mod cli;
mod commands;

use agrishare::config::Config;
use agrishare::observability;
use clap::Parser;
use cli::Cli;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path.clone())?,
        None => Config::load()?,
    };
    observability::init_tracing(&config.telemetry);

    commands::run(cli.command, config).await
}
