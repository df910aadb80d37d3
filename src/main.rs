use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use shiplog::{diagnostics, Pipeline, Severity};
use tokio::time::Interval;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "shiplog", version, about = "Ship host logs from every input to every output")]
struct Cli {
    /// Configuration file, or a directory of .json/.toml/.yaml documents.
    #[arg(long, short)]
    config: PathBuf,

    /// Global diagnostics gate: trace, debug, info, warn, error, fatal or off.
    #[arg(long, default_value = "info")]
    log_level: Severity,

    /// Diagnostics are written to <log-dir>/shiplog/shiplog.log.
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,

    /// Seconds between counter snapshots in the diagnostics log; 0 disables.
    #[arg(long, default_value_t = 60)]
    diagnostics_interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Held until exit; dropping it flushes queued file output.
    let handle = diagnostics::init(cli.log_level, &cli.log_dir)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = %handle.log_file.display(),
        "shiplog starting"
    );

    let shutdown = CancellationToken::new();
    let pipeline = Pipeline::assemble(&cli.config, cli.log_level, &cli.log_dir, shutdown.clone())
        .with_context(|| format!("cannot start pipeline from {}", cli.config.display()))?;

    let mut ticker = (cli.diagnostics_interval > 0)
        .then(|| tokio::time::interval(Duration::from_secs(cli.diagnostics_interval)));

    let signal = wait_for_shutdown_signal();
    tokio::pin!(signal);
    loop {
        tokio::select! {
            result = &mut signal => {
                if let Err(e) = result {
                    warn!(error = %e, "signal handling unavailable; shutting down");
                }
                break;
            }
            () = shutdown.cancelled() => break,
            () = next_tick(&mut ticker) => report(&pipeline),
        }
    }

    info!("shutdown requested");
    shutdown.cancel();
    pipeline.shutdown().await;
    Ok(())
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn report(pipeline: &Pipeline) {
    match serde_json::to_string(&pipeline.snapshot()) {
        Ok(snapshot) => info!(%snapshot, "pipeline status"),
        Err(e) => warn!(error = %e, "cannot encode pipeline status"),
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
