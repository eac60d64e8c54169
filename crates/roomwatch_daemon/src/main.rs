//! roomwatch daemon
//!
//! Loads the configuration, starts one watcher per configured room and,
//! unless disabled, serves the admin API. Ctrl-C or SIGTERM triggers a
//! bounded shutdown that stops every recorder.
//!
//! Usage:
//!   roomwatch --config .config/roomwatch.toml
//!   roomwatch --no-web

mod admin;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use roomwatch_core::config::{ConfigManager, WebSettings};
use roomwatch_core::logging::init_tracing;
use roomwatch_core::monitor::Supervisor;
use roomwatch_core::processor::check_ffmpeg;

use crate::admin::AdminState;

/// Live room monitor that records broadcasts with an external recorder
#[derive(Parser, Debug)]
#[command(name = "roomwatch")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file (created with defaults if missing)
    #[arg(short, long, default_value = ".config/roomwatch.toml")]
    config: PathBuf,

    /// Don't start the admin HTTP server
    #[arg(long)]
    no_web: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ConfigManager::new(&args.config);
    config
        .load_or_create()
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    config.validate().context("invalid configuration")?;
    config
        .ensure_dirs_exist()
        .context("failed to create data directories")?;
    let settings = config.into_settings();

    let logs_dir = settings
        .logging
        .file
        .then_some(settings.paths.logs_folder.as_path());
    let _log_guard = init_tracing(settings.logging.level, logs_dir);

    info!(
        version = roomwatch_core::version(),
        config = %args.config.display(),
        rooms = settings.rooms.len(),
        "Starting roomwatch"
    );

    if settings.postprocess.remux_on_stop {
        if let Err(e) = check_ffmpeg(&settings.postprocess.ffmpeg_path).await {
            warn!("Post-processing enabled but FFmpeg is unusable: {}", e);
        }
    }

    let supervisor = Arc::new(
        Supervisor::from_settings(&settings).context("failed to initialize monitor")?,
    );
    supervisor.start().await;

    let web_task = if args.no_web {
        info!("Admin API disabled");
        None
    } else {
        let state = AdminState {
            supervisor: supervisor.clone(),
        };
        let web = settings.web.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = serve_admin(state, &web).await {
                error!("Admin API error: {:#}", e);
            }
        }))
    };

    wait_for_shutdown().await;

    let report = supervisor.stop().await;
    if report.complete {
        info!(
            stopped = report.recordings_stopped.len(),
            "Shutdown complete in {}ms", report.elapsed_ms
        );
    } else {
        warn!(
            failed = ?report.failed,
            still_recording = ?report.still_recording,
            budget_exhausted = report.budget_exhausted,
            aborted_watchers = report.watchers_aborted,
            "Shutdown incomplete after {}ms",
            report.elapsed_ms
        );
    }

    if let Some(task) = web_task {
        task.abort();
    }
    Ok(())
}

async fn serve_admin(state: AdminState, web: &WebSettings) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", web.host, web.port)
        .parse()
        .with_context(|| format!("invalid admin address {}:{}", web.host, web.port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind admin server")?;
    info!(addr = %addr, "Admin API listening");

    axum::serve(listener, admin::router(state))
        .await
        .context("admin server error")?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl-C");
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl-C");
}
