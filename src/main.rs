// Seeder binary: load the config, start the listeners, stop on a signal
use clap::Parser;
use color_eyre::eyre::{eyre, Result, WrapErr};
use seeder_config::{SeederConfig, DEFAULT_CONFIG_PATH};
use seeder_server::{build_chain, Seeder, StopOutcome};
use std::io::stderr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// How long open connections get to finish after a shutdown signal
const STOP_DEADLINE: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(author, version, about = "Network boot seeder for bare-metal switches", long_about = None)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Print a fully populated sample configuration and exit
    #[arg(long, default_value_t = false)]
    print_sample_config: bool,

    /// Verbose output - shows more detailed logs
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    if cli.print_sample_config {
        print!("{}", SeederConfig::reference().to_yaml()?);
        return Ok(());
    }

    let level = if cli.verbose { "debug" } else { "info" };
    let default_directives = format!(
        "seeder={level},seeder_server={level},seeder_artifacts={level},seeder_config={level},hyper=warn,reqwest=warn,rustls=warn"
    );
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));
    registry().with(filter).with(fmt::layer().with_writer(stderr)).init();

    if let Err(e) = run(&cli).await {
        error!("Seeder failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(cli: &Cli) -> Result<()> {
    let config = SeederConfig::load(&cli.config)
        .wrap_err_with(|| format!("failed to load configuration from {}", cli.config.display()))?;
    info!(path = %cli.config.display(), "Configuration loaded");

    let chain = build_chain(&config.artifact_providers).wrap_err("failed to set up artifact providers")?;
    let seeder = Seeder::new(&config, Arc::new(chain)).wrap_err("invalid seeder configuration")?;
    let mut errors = seeder
        .take_errors()
        .ok_or_else(|| eyre!("seeder error stream already taken"))?;

    seeder.start().await.wrap_err("failed to start listeners")?;
    for local in seeder.local_addrs().await {
        info!(kind = %local.kind, addr = %local.addr, "Listening");
    }
    println!("Seeder started, press Ctrl+C to stop");

    let signal = shutdown_signal();
    tokio::pin!(signal);
    loop {
        tokio::select! {
            name = &mut signal => {
                info!(signal = name, "Received shutdown signal");
                println!("\nShutting down...");
                break;
            }
            Some(err) = errors.recv() => warn!(error = %err, "Seeder reported an error"),
        }
    }

    // The first signal's future is spent; arm a fresh one for the drain
    signal.set(shutdown_signal());
    let stop = seeder.stop(STOP_DEADLINE);
    tokio::pin!(stop);
    let outcome = loop {
        tokio::select! {
            outcome = &mut stop => break outcome,
            name = &mut signal => {
                warn!(signal = name, "Already shutting down, signal ignored");
                signal.set(shutdown_signal());
            }
        }
    };

    match outcome {
        StopOutcome::Drained { forced: true } => warn!(deadline = ?STOP_DEADLINE, "Open connections were cut off"),
        StopOutcome::Drained { forced: false } => info!("Shutdown complete"),
        StopOutcome::AlreadyStopping => info!("Seeder was already stopped"),
    }
    Ok(())
}

/// Resolves on SIGINT or SIGTERM with the signal's name
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
