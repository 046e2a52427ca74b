//! Termgate Daemon
//!
//! Serves sandboxed and interactive terminal sessions over WebSocket.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::Config;
use daemon::files::RootValidator;
use daemon::orchestrator::{Daemon, DaemonEvent};
use daemon::sandbox::SandboxEngine;
use tracing_subscriber::EnvFilter;

/// Termgate Daemon - multiplexed terminal sessions for a web UI.
#[derive(Parser, Debug)]
#[command(name = "termgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the daemon
    Start {
        /// Address to listen on (overrides the configuration)
        #[arg(long, short, value_name = "ADDR")]
        listen: Option<String>,
    },

    /// Check a command line against the sandbox security filter
    Check {
        /// The command line to check
        line: String,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Print the built-in defaults instead
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    if let Commands::Start {
        listen: Some(ref listen),
    } = cli.command
    {
        config.server.listen = listen.clone();
    }

    // Validate configuration
    config.validate()?;

    // Initialize tracing; RUST_LOG wins over the configured level
    let level = if cli.verbose {
        "debug"
    } else {
        config.daemon.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(config_path) = &cli.config {
        tracing::debug!("Using config file: {:?}", config_path);
    }

    // Handle commands
    match cli.command {
        Commands::Start { .. } => {
            let mut daemon = Daemon::new(config)?;
            run_headless(&mut daemon).await?;
        }
        Commands::Check { line } => {
            let code = check_line(&config, &line);
            std::process::exit(code);
        }
        Commands::Config { default } => {
            let shown = if default { Config::default() } else { config };
            print!("{}", shown.to_toml()?);
        }
    }

    Ok(())
}

/// Prints the security filter's verdict for `line` and returns the exit code
/// the sandbox engine would report for a refusal (0 when allowed).
fn check_line(config: &Config, line: &str) -> i32 {
    let validator = Arc::new(RootValidator::new(config.workspace.allowed_roots.clone()));
    let engine = SandboxEngine::from_config(&config.sandbox, validator);

    match engine.check(line) {
        Ok(argv) => {
            println!("allowed: {:?}", argv);
            0
        }
        Err(e) => {
            println!("blocked: {} (exit {})", e, e.exit_code());
            e.exit_code()
        }
    }
}

/// Run the daemon until a shutdown signal arrives.
async fn run_headless(daemon: &mut Daemon) -> anyhow::Result<()> {
    // Subscribe to daemon events for logging
    let mut events = daemon.subscribe();

    // Spawn event logging task
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                DaemonEvent::StateChanged(state) => {
                    tracing::info!("Daemon state: {:?}", state);
                }
                DaemonEvent::Listening(addr) => {
                    tracing::info!("Listening on ws://{}", addr);
                }
            }
        }
    });

    daemon.start().await?;

    // Wait for shutdown signal (SIGTERM or SIGINT)
    wait_for_shutdown_signal().await?;
    tracing::info!("Received shutdown signal");

    daemon.stop().await?;

    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}

/// Wait for Ctrl-C.
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")
}
