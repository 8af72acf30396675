use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use herald_core::config::HeraldConfig;
use herald_lock::{LeaseBackend, RedisWorkerLock};
use herald_store::CampaignStore;
use herald_telegram::BotApi;
use herald_users::UserStore;
use herald_worker::{BroadcastWorker, WorkerMetrics};

mod app;
mod auth;
mod http;

#[derive(Parser)]
#[command(name = "herald-gateway", about = "Broadcast backend: admin API + worker")]
struct Args {
    /// Path to herald.toml (default: ~/.herald/herald.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald=info,herald_gateway=info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();
    let config = HeraldConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        HeraldConfig::default()
    });

    // One SQLite file shared by every store handle.
    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }
    let conn = rusqlite::Connection::open(&config.database.path)
        .with_context(|| format!("opening database {}", config.database.path))?;
    let conn = Arc::new(Mutex::new(conn));

    let users = UserStore::new(conn.clone()).context("initialising user registry")?;
    let campaigns = CampaignStore::new(conn).context("initialising campaign store")?;

    let metrics = Arc::new(WorkerMetrics::new());
    let lease: Arc<dyn LeaseBackend> =
        Arc::new(RedisWorkerLock::new(&config.redis.url).context("connecting lease backend")?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_handle = if config.broadcast.enabled {
        let transport = Arc::new(
            BotApi::new(
                &config.telegram.bot_token,
                &config.telegram.api_base_url,
                Duration::from_secs(config.broadcast.request_timeout_sec),
            )
            .context("building Bot API client")?,
        );
        let worker = BroadcastWorker::new(
            campaigns.clone(),
            lease.clone(),
            transport,
            config.broadcast.clone(),
            metrics.clone(),
        );
        Some(tokio::spawn(worker.run(shutdown_rx.clone())))
    } else {
        info!("broadcast worker disabled by config");
        None
    };

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState::new(config, campaigns, users, metrics, lease));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Herald gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // Ctrl-c: stop the worker so it releases its lease before we exit.
    let _ = shutdown_tx.send(true);
    if let Some(handle) = worker_handle {
        let _ = handle.await;
    }
    info!("Herald gateway stopped");

    Ok(())
}
