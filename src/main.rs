use anyhow::Result;
use clap::Parser;

use copyguard::cli::{self, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    init_logging(cli.verbose);

    match cli.command {
        Commands::Start => cli::service::start().await,
        Commands::Stop => cli::service::stop().await,
        Commands::Status => cli::service::status().await,
        Commands::Check(args) => cli::check::run(args),
        Commands::Config(args) => cli::config::run(args),
        Commands::Paths => cli::paths::run(),
    }
}

/// RUST_LOG wins, then --verbose, then logging.level from config.
fn init_logging(verbose: bool) {
    let logging = copyguard::Config::load()
        .map(|config| config.logging)
        .unwrap_or_default();
    let log_level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

