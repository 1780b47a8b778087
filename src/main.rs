//! Demo binary: wires a [`smartfeed::FeedService`] over a store and a
//! logging publisher, adds a couple of items, then waits for a shutdown
//! signal.
//!
//! Grounded in the teacher's `server::main`/`shutdown_signal` pattern:
//! `tracing_subscriber` with `EnvFilter`, then a `select!` between the
//! app's own work and ctrl-c/SIGTERM.

use std::sync::Arc;

use serde_json::json;
use smartfeed::config::FeedConfig;
use smartfeed::db;
use smartfeed::publisher::LoggingPublisher;
use smartfeed::store::memory::MemoryStore;
use smartfeed::store::redis::RedisStore;
use smartfeed::store::Store;
use smartfeed::FeedService;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = FeedConfig::load("smartfeed.toml")?;

    let store: Arc<dyn Store> = match &config.redis {
        Some(redis_config) => {
            let conn = db::connect(redis_config).await?;
            info!("using redis store");
            Arc::new(RedisStore::new(conn))
        }
        None => {
            info!("no [redis] section in config, using in-process memory store");
            Arc::new(MemoryStore::new())
        }
    };
    let publisher = Arc::new(LoggingPublisher::default());
    let feed = FeedService::with_notify_stale_seconds(store, publisher, config.notify_stale_seconds);

    let base = "demo-feed";
    feed.add(base, json!({"greeting": "hello"}), Some("item-1"), true).await?;
    feed.add(base, json!({"greeting": "world"}), Some("item-2"), true).await?;

    let encoded = FeedService::encode_base(base);
    let page = feed
        .get_items(&format!("{encoded}-created"), None, None, 10, true)
        .await?;
    info!(count = page.items.len(), total = ?page.total, "demo feed page");

    shutdown_signal().await;
    feed.shutdown().await?;
    info!("shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
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
        () = ctrl_c => {}
        () = terminate => {}
    }
}
