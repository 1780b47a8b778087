//! Redis connection bootstrap.

use redis::aio::ConnectionManager;
use tracing::info;

use crate::config::RedisConfig;
use crate::error::FeedError;

/// Opens a multiplexed, auto-reconnecting connection to the configured
/// Redis instance.
pub async fn connect(config: &RedisConfig) -> Result<ConnectionManager, FeedError> {
    info!(url = %config.url, "connecting to redis");
    let client = redis::Client::open(config.url.as_str()).map_err(|e| FeedError::TransportError(e.to_string()))?;
    client
        .get_connection_manager()
        .await
        .map_err(|e| FeedError::TransportError(e.to_string()))
}
