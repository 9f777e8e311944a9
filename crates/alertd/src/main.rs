use std::path::PathBuf;
use std::sync::Arc;

use alertd::config::{DaemonConfig, NotifierKind};
use alertd::inbound::InboundHandler;
use anyhow::{Context, Result};
use clap::Parser;
use escalation::{EscalationEngine, MemoryStore};
use tokio::io::{stdin, stdout, BufReader};
use tracing::info;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Directory seed JSON (overrides the config file and ALERTD_DIRECTORY)
    #[arg(long)]
    directory: Option<PathBuf>,

    /// Log notifications instead of delivering them
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the protocol, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = DaemonConfig::load(args.config.as_deref())?;
    if let Some(directory) = args.directory {
        config.directory = directory;
    }
    if args.dry_run {
        config.notifier = NotifierKind::Log;
    }
    config.validate()?;

    let store = Arc::new(
        MemoryStore::from_seed_file(&config.directory)
            .with_context(|| format!("Failed to load directory {}", config.directory.display()))?,
    );
    let notifier = alertd::build_notifier(&config)?;
    info!(
        directory = %config.directory.display(),
        notifier = notifier.name(),
        confirm_url = %config.engine.confirm_base_url,
        "alertd starting"
    );

    let engine = EscalationEngine::new(store.clone(), store.clone(), notifier, config.engine.clone());
    tokio::spawn(alertd::log_events(engine.subscribe()));

    let handler = InboundHandler::new(engine.clone(), store);
    tokio::select! {
        served = handler.serve(BufReader::new(stdin()), stdout()) => {
            served?;
            let live = engine.registry().active_count();
            info!(live, "input closed, waiting for live escalations");
            let drain = async {
                for handle in engine.registry().handles() {
                    handle.wait_terminal().await;
                }
            };
            tokio::select! {
                _ = drain => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted while draining");
                    engine.shutdown().await;
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, cancelling live escalations");
            engine.shutdown().await;
        }
    }

    info!("alertd stopped");
    Ok(())
}
