use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use choir_wall::{app::App, cli::Cli, config::Config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(&cli)?;
    let level = if cfg.logging_enabled { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    let app = App::from_config(&cfg)?;
    app.run(cli.command).await
}
