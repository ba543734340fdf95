//! llm-mirror - recording reverse proxy for LLM APIs
//!
//! `start` runs the proxy; `view`, `stats` and `export` read the recordings
//! it wrote.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use llm_mirror::{
    api::{build_router, create_http_client, AppState},
    commands::{self, ExportArgs, StatsArgs, ViewArgs},
    core::{
        config::{AppConfig, LoggingConfig},
        logging::init_tracing,
        recorder::Recorder,
        recording::Provider,
    },
};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// How long in-flight requests get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "llm-mirror", version, about = "Recording reverse proxy for LLM APIs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the proxy server
    Start(StartArgs),
    /// View a specific recording
    View(ViewArgs),
    /// Show statistics about recordings
    Stats(StatsArgs),
    /// Export recordings to a file
    Export(ExportArgs),
}

#[derive(Args)]
struct StartArgs {
    /// Port to listen on, overrides config and environment
    #[arg(long)]
    port: Option<u16>,

    /// Path to a JSON config file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Start(args) => start(args),
        Command::View(args) => run_tool("view", || commands::view::run(&args)),
        Command::Stats(args) => run_tool("stats", || commands::stats::run(&args)),
        Command::Export(args) => run_tool("export", || commands::export::run(&args)),
    }
}

/// Run an offline command with default logging; failures exit with status 1.
fn run_tool(name: &str, tool: impl FnOnce() -> Result<()>) -> Result<()> {
    init_tracing(&LoggingConfig::default());
    if let Err(e) = tool() {
        tracing::error!(error = %format!("{:#}", e), "{} failed", name);
        std::process::exit(1);
    }
    Ok(())
}

fn start(args: StartArgs) -> Result<()> {
    let mut config = match AppConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(&LoggingConfig::default());
            tracing::error!(error = %format!("{:#}", e), "failed to load config");
            std::process::exit(1);
        }
    };
    if let Some(port) = args.port {
        config.port = port;
    }

    init_tracing(&config.logging);

    let worker_threads = resolve_worker_threads(std::env::var("TOKIO_WORKER_THREADS").ok().as_deref());
    tracing::debug!(worker_threads, "building tokio runtime");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    runtime.block_on(serve(config))
}

async fn serve(config: AppConfig) -> Result<()> {
    let recorder = Arc::new(Recorder::new(&config.recording).await);
    let http_client = create_http_client(&config).context("failed to build HTTP client")?;

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        addr = %local_addr,
        recording = recorder.is_enabled(),
        recordings_path = %config.recording.path.display(),
        "llm-mirror proxy server started"
    );
    for provider in Provider::ROUTABLE {
        if let Some(upstream) = config.upstream_for(provider) {
            tracing::info!(provider = %provider, upstream = %upstream.upstream_url, "provider upstream");
        }
    }

    let state = Arc::new(AppState::new(config, http_client, recorder.clone()));
    let app = build_router(state).into_make_service_with_connect_info::<SocketAddr>();

    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    let mut server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.changed().await;
            })
            .into_future(),
    );

    tokio::select! {
        result = &mut server => {
            recorder.close().await;
            return result.context("server task failed")?.context("server error");
        }
        _ = shutdown_signal() => {}
    }

    tracing::info!("shutting down gracefully");
    let _ = stop_tx.send(true);
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "server shutdown error"),
        Ok(Err(e)) => tracing::error!(error = %e, "server task failed"),
        Err(_) => {
            tracing::warn!(grace_secs = SHUTDOWN_GRACE.as_secs(), "in-flight requests did not finish in time");
            server.abort();
        }
    }

    recorder.close().await;
    if recorder.dropped_count() > 0 {
        tracing::warn!(dropped = recorder.dropped_count(), "recordings were dropped");
    }
    tracing::info!("shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Detect optimal worker threads from environment or cgroup.
///
/// Zero or unparsable overrides are ignored; the runtime builder rejects zero.
fn resolve_worker_threads(env_override: Option<&str>) -> usize {
    env_override
        .and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .or_else(detect_cpu_limit)
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
}

fn detect_cpu_limit() -> Option<usize> {
    // cgroup v2
    if let Ok(max) = std::fs::read_to_string("/sys/fs/cgroup/cpu.max") {
        let parts: Vec<&str> = max.split_whitespace().collect();
        if parts.len() == 2 {
            if let (Ok(quota), Ok(period)) = (parts[0].parse::<i64>(), parts[1].parse::<i64>()) {
                if quota > 0 && period > 0 {
                    return Some(((quota as f64 / period as f64).ceil() as usize).max(1));
                }
            }
        }
    }

    // cgroup v1
    let quota = std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_quota_us")
        .ok()?
        .trim()
        .parse::<i64>()
        .ok()?;
    let period = std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_period_us")
        .ok()?
        .trim()
        .parse::<i64>()
        .ok()?;

    if quota > 0 && period > 0 {
        Some(((quota as f64 / period as f64).ceil() as usize).max(1))
    } else {
        None
    }
}
