//! rustfwd - Lightweight TCP and UDP port forwarder
//!
//! Forwards traffic from local listening ports to remote host:port targets,
//! driven by a static set of forwarding rules. Useful for SSH tunneling and
//! simple NAT-style redirection on a single host.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rustfwd::{config::ConfigManager, RuleDispatcher, ShutdownCoordinator};

/// CLI arguments for rustfwd
#[derive(Parser, Debug)]
#[command(name = "rustfwd")]
#[command(about = "rustfwd - Lightweight TCP and UDP port forwarder")]
#[command(version)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "config.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", help = "Log level")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let config = ConfigManager::load_from_file(&args.config)?;

    init_tracing(&args, config.debug)?;

    info!("Starting rustfwd v{}", env!("CARGO_PKG_VERSION"));

    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Debug logging: {}", config.debug);
        info!("  Rules: {}", config.rules.len());
        for rule in &config.rules {
            info!("    {}", rule);
        }
        return Ok(());
    }

    let coordinator = ShutdownCoordinator::new();
    let dispatcher = RuleDispatcher::with_shutdown(Arc::new(config), coordinator.sender());

    // Run the forwarding engine in its own task so the main task can wait
    // for termination signals.
    let mut engine_handle = tokio::spawn(async move { dispatcher.run().await });

    tokio::select! {
        result = &mut engine_handle => {
            // Engine stopped on its own: either a startup-fatal condition
            // (no rules) or every relay has terminated.
            result.context("forwarding engine task failed")??;
        }
        signal_result = coordinator.listen_for_signals() => {
            if let Err(e) = signal_result {
                error!("Error waiting for termination signals: {}", e);
                coordinator.trigger();
            }

            match engine_handle.await {
                Ok(result) => result?,
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!("Forwarding engine task failed: {}", e),
            }
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs, debug: bool) -> Result<()> {
    let log_level = if args.verbose || debug {
        "debug"
    } else {
        &args.log_level
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
