use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use drover_core::blob::FsBlobStore;
use drover_core::dispatch::run_reaper;
use drover_core::store::{MemoryStore, RedisStore};
use drover_core::{BlobStore, CoordStore, Dispatcher};
use drover_server::{AppState, Config, create_router};

/// Command line arguments for the drover dispatch server
#[derive(Parser, Debug)]
#[command(name = "drover-server")]
#[command(about = "Control plane for a pull-based GPU job dispatcher")]
struct Args {
    /// Bind address (overrides DROVER_BIND)
    #[arg(long, env = "DROVER_BIND")]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = Config::from_env().context("invalid configuration")?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    let store: Arc<dyn CoordStore> = if config.store_is_memory() {
        warn!("using the in-memory coordination store; replicas will not share state");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(
            RedisStore::connect(&config.store_url)
                .await
                .context("coordination store unreachable")?,
        )
    };
    store.ping().await.context("coordination store ping failed")?;

    let fs_blob = Arc::new(FsBlobStore::new(
        config.blob_root.clone(),
        config.blob_public_base.clone(),
        config.auth.jwt_secret.as_bytes().to_vec(),
    ));
    let blob: Arc<dyn BlobStore> = fs_blob.clone();

    let dispatcher = Arc::new(Dispatcher::new(
        store,
        blob,
        config.dispatch.clone(),
    ));

    if config.sweeper_enabled {
        info!(period = ?config.sweep_interval, "starting lease reaper");
        let _reaper = run_reaper(Arc::clone(&dispatcher), config.sweep_interval);
    }

    let config = Arc::new(config);
    let state = AppState::new(dispatcher, Arc::clone(&config), Some(fs_blob));
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("cannot bind {}", config.bind))?;
    info!("drover-server listening on {}", config.bind);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("shutdown signal listener failed: {e}");
    }
    info!("shutting down");
}
