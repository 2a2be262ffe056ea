mod config;
mod pid;

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{error, info, warn};

use agfs_api::AppState;
use agfs_plugin::mount::MountTable;
use agfs_plugin::traffic::TrafficMonitor;

use crate::config::{Config, MountKind};
use crate::pid::PidFile;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "agfsd", about = "AGFS daemon: virtual file system over HTTP/JSON")]
struct Args {
    /// Address to bind the HTTP server to
    #[arg(long)]
    addr: Option<String>,

    /// Path to config file (defaults to ~/.agfs/config.toml)
    #[arg(long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Run in foreground, logging to stdout as well as the log file
    #[arg(long)]
    foreground: bool,
}

/// CLI over config file over defaults.
struct ResolvedConfig {
    addr: String,
    log_level: String,
    mounts: Vec<config::MountConfig>,
}

impl ResolvedConfig {
    fn from_args_and_config(args: &Args, config: &Config) -> Self {
        Self {
            addr: args.addr.clone().unwrap_or_else(|| config.server.addr.clone()),
            log_level: args
                .log_level
                .clone()
                .or_else(|| std::env::var("AGFS_LOG").ok())
                .unwrap_or_else(|| config.logging.level.clone()),
            mounts: config.mount.clone(),
        }
    }
}

fn setup_logging(log_level: &str, foreground: bool) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let log_dir = Config::log_dir();
    std::fs::create_dir_all(&log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&log_dir, "agfsd.log");

    if foreground {
        let stdout_layer = fmt::layer().with_target(false).with_thread_ids(false);
        let file_layer = fmt::layer().json().with_writer(file_appender);
        tracing_subscriber::registry().with(filter).with(stdout_layer).with(file_layer).init();
    } else {
        let file_layer = fmt::layer().json().with_writer(file_appender);
        tracing_subscriber::registry().with(filter).with(file_layer).init();
    }
}

/// Mounts every configured backend, falling back to a single root `memfs`
/// mount when the config declares none (a fresh daemon should still serve
/// something on first run).
async fn bootstrap_mounts(mounts: &MountTable, configured: &[config::MountConfig]) {
    if configured.is_empty() {
        info!(point = "/", backend = "memfs", "no mounts configured, mounting default root");
        let backend = Arc::new(agfs_memfs::MemFsBackend::new());
        if let Err(e) = mounts.mount("/", "memfs", backend).await {
            error!(error = %e, "failed to mount default root");
        }
        return;
    }

    for entry in configured {
        let result = match entry.kind {
            MountKind::Memfs => {
                let backend = Arc::new(agfs_memfs::MemFsBackend::new());
                mounts.mount(&entry.point, "memfs", backend).await
            }
            MountKind::Sqlproj => {
                let db_path = entry.db_path.clone().unwrap_or_else(|| ":memory:".to_string());
                let backend =
                    Arc::new(agfs_sqlproj::SqlProjFs::new(db_path, Duration::from_secs(entry.idle_timeout_secs)));
                mounts.mount(&entry.point, "sqlproj", backend).await
            }
        };
        match result {
            Ok(()) => info!(point = %entry.point, kind = ?entry.kind, "mounted backend"),
            Err(e) => error!(point = %entry.point, error = %e, "failed to mount backend"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(std::path::Path::new(path)),
        None => Config::load(),
    };
    let resolved = ResolvedConfig::from_args_and_config(&args, &config);

    setup_logging(&resolved.log_level, args.foreground);
    info!("agfsd starting");

    let pid_file = PidFile::new(Config::pid_path());
    if let Err(e) = pid_file.acquire() {
        error!("{e}");
        std::process::exit(1);
    }

    let mounts = Arc::new(MountTable::new());
    bootstrap_mounts(&mounts, &resolved.mounts).await;

    let traffic_handle = TrafficMonitor::spawn();
    let state = AppState { mounts: mounts.clone(), traffic: traffic_handle.monitor.clone(), started_at: Instant::now() };
    let app = agfs_api::router(state);

    let listener = match tokio::net::TcpListener::bind(&resolved.addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(addr = %resolved.addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    info!(addr = %resolved.addr, "agfsd ready");

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        error!(error = %e, "server error");
    }

    info!("initiating graceful shutdown");
    let shutdown_result = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let failures = mounts.unmount_all().await;
        for (point, err) in failures {
            warn!(point = %point, error = %err, "failed to unmount cleanly");
        }
        traffic_handle.stop().await;
    })
    .await;

    match shutdown_result {
        Ok(()) => info!("all mounts stopped gracefully"),
        Err(_) => warn!("shutdown timed out after {}s, forcing exit", SHUTDOWN_TIMEOUT.as_secs()),
    }

    drop(pid_file);
    info!("agfsd stopped");
}
