//! Hookwatch server - binary entry point
//!
//! Opens the event store, mounts the REST and WebSocket routes and serves
//! until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use hookwatch::api::create_router;
use hookwatch::api::websocket::{AppState, BroadcastHub};
use hookwatch::event_store::EventStore;
use hookwatch::ingest::{spawn_retention_task, EventService};
use hookwatch::ServerConfig;

#[derive(Parser)]
#[command(name = "hookwatch-server")]
#[command(about = "Store and broadcast agent hook events", long_about = None)]
#[command(version)]
struct Cli {
    /// Host to bind
    #[arg(long, env = "HOOKWATCH_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to bind
    #[arg(short, long, env = "HOOKWATCH_PORT", default_value_t = 4000)]
    port: u16,

    /// SQLite database file
    #[arg(long, env = "HOOKWATCH_DB_PATH", default_value = "events.db")]
    db_path: PathBuf,

    /// Events sent to each observer on connect
    #[arg(long, env = "HOOKWATCH_SNAPSHOT_LIMIT", default_value_t = 50)]
    snapshot_limit: usize,

    /// Per-observer send buffer, in frames
    #[arg(long, env = "HOOKWATCH_SESSION_BUFFER", default_value_t = 256)]
    session_buffer: usize,

    /// Delete events older than this many days (disabled when unset)
    #[arg(long, env = "HOOKWATCH_RETENTION_DAYS")]
    retention_days: Option<u32>,

    /// Seconds between retention sweeps
    #[arg(long, env = "HOOKWATCH_RETENTION_INTERVAL", default_value_t = 3600)]
    retention_interval: u64,

    /// Maximum pooled database connections
    #[arg(long, env = "HOOKWATCH_POOL_SIZE", default_value_t = 16)]
    pool_size: u32,

    /// Log level (RUST_LOG overrides)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: self.port,
            database_path: self.db_path,
            snapshot_limit: self.snapshot_limit,
            session_buffer: self.session_buffer,
            retention_days: self.retention_days,
            retention_interval_secs: self.retention_interval,
            pool_size: self.pool_size,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "hookwatch={level},hookwatch_server={level},tower_http={level}",
            level = cli.log_level
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.into_config();
    if let Err(e) = run(config).await {
        error!(error = %e, "server failed");
        return Err(e);
    }
    Ok(())
}

async fn run(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = EventStore::open(&config.database_path, &config.connection_config())?;
    info!(path = %config.database_path.display(), "event store ready");

    let hub = Arc::new(BroadcastHub::new(config.session_buffer));
    let service = Arc::new(
        EventService::new(Arc::new(store), Arc::clone(&hub))
            .with_snapshot_limit(config.snapshot_limit),
    );

    let shutdown = CancellationToken::new();
    let retention = config.retention_days.map(|days| {
        spawn_retention_task(
            Arc::clone(&service),
            days,
            config.retention_interval(),
            shutdown.child_token(),
        )
    });

    let app = create_router(Arc::new(AppState::new(service)));
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    info!(addr = %listener.local_addr()?, "hookwatch listening");

    let signal = {
        let hub = Arc::clone(&hub);
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutting down");
            // observers get 1001 before the listener stops accepting
            hub.shutdown();
            shutdown.cancel();
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await?;

    shutdown.cancel();
    if let Some(task) = retention {
        let _ = task.await;
    }
    info!("server stopped");
    Ok(())
}
