//! netmux CLI - runs multiplexer scenarios over the loopback engine

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use netmux_cli::{cli::Cli, commands::CommandDispatcher, config::AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.log.as_deref());

    let mut config = load_configuration(&cli)?;
    if let Some(capacity) = cli.queue_capacity {
        config.netmux.queue.queue_capacity = capacity;
        config.validate()?;
    }

    CommandDispatcher::execute(cli, config).await?;

    info!("netmux exited successfully");
    Ok(())
}

/// Setup logging from an explicit filter, `RUST_LOG`, or the verbosity flag
fn setup_logging(verbose: bool, filter: Option<&str>) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = match filter {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> anyhow::Result<AppConfig> {
    if let Some(config_path) = &cli.config {
        info!("Loading configuration from: {}", config_path);
        Ok(AppConfig::load_from_file(config_path)?)
    } else {
        info!("Using default configuration");
        Ok(AppConfig::default())
    }
}
