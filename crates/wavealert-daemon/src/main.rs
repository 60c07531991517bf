//! wavealert-daemon - WaveAlert360 appliance runtime.
//!
//! One executable, one subcommand per role. Boot runs `supervisor`, which
//! re-invokes this same executable for the `led-service`, `resolver`, and
//! `updater` roles and runs the configured dashboard command. Each role
//! process guards itself with an advisory role lock, so a stray second
//! instance exits instead of fighting over hardware or the working tree.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use wavealert_core::config::Config;

/// WaveAlert360 coastal-hazard appliance runtime.
#[derive(Parser, Debug)]
#[command(name = "wavealert-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the settings document.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the runtime state directory.
    #[arg(long, global = true)]
    run_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

/// Appliance roles.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Start, health-check, and restart the other roles (default).
    Supervisor,

    /// Resolve the alert level and dispatch LEDs and audio.
    Resolver,

    /// Own the LED hardware and follow the control channel.
    LedService,

    /// Keep the deployed tree up to date from the remote.
    Updater,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(&args.log_level)?;

    let mut config = match &args.config {
        Some(path) => Config::from_file(path).context("failed to load configuration")?,
        None => Config::from_env(),
    };
    if let Some(run_dir) = &args.run_dir {
        config.paths.run_dir.clone_from(run_dir);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    let command = args.command.unwrap_or(Command::Supervisor);
    runtime.block_on(async move {
        match command {
            Command::Supervisor => {
                let passthrough = passthrough_args(&args);
                wavealert_daemon::supervisor::run(config, passthrough).await
            }
            Command::Resolver => wavealert_daemon::resolver::run(config).await,
            Command::LedService => wavealert_daemon::led_service::run(config).await,
            Command::Updater => wavealert_daemon::updater::run(config).await,
        }
    })
}

/// Flags the supervisor forwards to the role processes it spawns, so every
/// role reads the same settings document and run directory.
fn passthrough_args(args: &Args) -> Vec<String> {
    let mut forwarded = Vec::new();
    if let Some(config) = &args.config {
        forwarded.push("--config".to_string());
        forwarded.push(config.display().to_string());
    }
    if let Some(run_dir) = &args.run_dir {
        forwarded.push("--run-dir".to_string());
        forwarded.push(run_dir.display().to_string());
    }
    forwarded.push("--log-level".to_string());
    forwarded.push(args.log_level.clone());
    forwarded
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to initialize tracing: {err}"))?;
    Ok(())
}
