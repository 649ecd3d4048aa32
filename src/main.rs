use anyhow::Context;
use clap::Parser;
use downtidy::cli::{Cli, OrganizeCommand};
use downtidy::output::OutputFormatter;
use downtidy::{Config, Report, WatchDriver};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_filter = if cli.verbose {
        "downtidy=debug"
    } else {
        "downtidy=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli
        .resolve_config()
        .context("failed to load configuration")?;
    info!("organizing {}", config.watched_dir.display());

    let report = match Cli::organize_command(&config) {
        OrganizeCommand::Once => downtidy::run_once(&config)?,
        OrganizeCommand::Watch => watch(config).await?,
    };

    if cli.json {
        println!("{}", report.to_json()?);
    } else {
        OutputFormatter::report(&report);
    }

    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}

/// Runs the driver on a blocking thread until it fails or Ctrl-C stops it.
async fn watch(config: Config) -> anyhow::Result<Report> {
    let mut driver = WatchDriver::new(config);
    let stop = driver.stop_handle();
    let mut task = tokio::task::spawn_blocking(move || driver.run());

    tokio::select! {
        finished = &mut task => {
            return Ok(finished.context("watcher thread panicked")??);
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            info!("shutting down watcher...");
            stop.stop();
        }
    }

    Ok(task.await.context("watcher thread panicked")??)
}
