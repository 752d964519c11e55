//! vigil-reid - cross-camera re-identification service
//!
//! Loads configuration, opens the database, installs the stored (or seeded) camera
//! topology, then runs the HTTP API alongside three background tasks: the outbox
//! notifier, the session expiry sweep and the outbox dispatcher.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil_common::SystemClock;

use vigil_reid::config::ReidConfig;
use vigil_reid::outbox::{OutboxDispatcher, OutboxNotifier};
use vigil_reid::publisher::BroadcastPublisher;
use vigil_reid::tracking::run_expiry_sweep;
use vigil_reid::AppState;

/// Command-line arguments for vigil-reid
#[derive(Parser, Debug)]
#[command(name = "vigil-reid")]
#[command(about = "Cross-camera identity re-identification service")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides [server] port)
    #[arg(short, long, env = "VIGIL_REID_PORT")]
    port: Option<u16>,

    /// SQLite database file (overrides [database] path)
    #[arg(short, long, env = "VIGIL_DATABASE")]
    database: Option<PathBuf>,

    /// Topology TOML file to seed the store with (overrides [topology] seed_file)
    #[arg(short, long)]
    topology: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ReidConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(database) = args.database {
        config.database.path = Some(database);
    }
    if let Some(topology) = args.topology {
        config.topology.seed_file = Some(topology);
    }

    // Initialize tracing
    let level = config.logging.level.trim();
    let default_filter = if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("vigil_reid={level},vigil_common={level},tower_http={level}")
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting vigil-reid v{}", env!("CARGO_PKG_VERSION"));

    let db_path = config.database.resolved_path();
    info!("Database: {}", db_path.display());
    let db = vigil_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;

    let (state, notifications) = AppState::new(db.clone(), &config, Arc::new(SystemClock));

    if let Some(seed) = &config.topology.seed_file {
        state
            .topology_store
            .seed_from_file(seed)
            .await
            .with_context(|| format!("Failed to seed topology from {}", seed.display()))?;
    }
    let summary = state
        .topology_store
        .reload(&state.topology)
        .await
        .context("Failed to load camera topology")?;
    if summary.cameras == 0 {
        warn!("Camera topology is empty; cross-camera matching will only find same-camera re-observations");
    }

    // Background tasks
    let cancel = CancellationToken::new();
    let mut tasks = tokio::task::JoinSet::new();

    let notifier = OutboxNotifier::new(db.clone(), config.outbox.max_lock_wait_ms);
    tasks.spawn(notifier.run(notifications, cancel.clone()));

    tasks.spawn(run_expiry_sweep(
        state.engine.clone(),
        config.tracking.sweep_interval(),
        cancel.clone(),
    ));

    let dispatcher = OutboxDispatcher::new(
        Arc::new(state.outbox.clone()),
        Arc::new(BroadcastPublisher::new(state.event_bus.clone())),
        config.outbox.clone(),
    );
    tasks.spawn(dispatcher.run(cancel.clone()));

    let app = vigil_reid::build_router(state);

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("HTTP server stopped; stopping background tasks");
    cancel.cancel();
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            warn!(error = %e, "Background task ended abnormally");
        }
    }

    db.close().await;
    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
