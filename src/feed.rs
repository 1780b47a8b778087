//! Feed service facade (spec §4.6/C6): composes a [`Store`] and a
//! [`Publisher`] behind the single entry point callers use.
//!
//! Constructor injection here replaces the teacher's thread-local
//! `AppState::new` cache pattern -- there's no process-global feed
//! registry, a `FeedService` just owns the two collaborators it needs.

use feed_protocol::FeedId;
use std::sync::Arc;
use tracing::instrument;

use crate::error::FeedError;
use crate::identcodec;
use crate::notify;
use crate::publisher::Publisher;
use crate::store::{ItemsResult, Store};

/// The feed engine's public entry point. Cheap to clone (everything
/// inside is an `Arc`), so a single instance is typically shared across
/// connection handlers.
#[derive(Clone)]
pub struct FeedService {
    store: Arc<dyn Store>,
    publisher: Arc<dyn Publisher>,
    notify_stale_seconds: i64,
}

impl FeedService {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, publisher: Arc<dyn Publisher>) -> Self {
        Self::with_notify_stale_seconds(store, publisher, notify::STALE_SLOT_SECONDS)
    }

    #[must_use]
    pub fn with_notify_stale_seconds(store: Arc<dyn Store>, publisher: Arc<dyn Publisher>, notify_stale_seconds: i64) -> Self {
        Self {
            store,
            publisher,
            notify_stale_seconds,
        }
    }

    /// Reads a page of `feed_id`, per spec §4.3.1.
    #[instrument(skip(self))]
    pub async fn get_items(
        &self,
        feed_id: &str,
        since: Option<&str>,
        until: Option<&str>,
        max_count: usize,
        with_total: bool,
    ) -> Result<ItemsResult, FeedError> {
        let parsed = FeedId::parse(feed_id)
            .ok_or_else(|| FeedError::InvalidSpec(format!("malformed feed id '{feed_id}'")))?;
        self.store
            .get_items(&parsed, since, until, max_count, with_total)
            .await
    }

    /// Inserts or updates an item under `base`, then drains the notify
    /// FIFO for `base` if `notify` was requested.
    #[instrument(skip(self, data))]
    pub async fn add(
        &self,
        base: &str,
        data: serde_json::Value,
        id: Option<&str>,
        notify: bool,
    ) -> Result<feed_protocol::Item, FeedError> {
        let outcome = self.store.add(base, data, id, notify).await?;
        if notify {
            notify::process_notify(
                self.store.as_ref(),
                self.publisher.as_ref(),
                base,
                self.notify_stale_seconds,
            )
            .await?;
        }
        Ok(outcome.item)
    }

    /// Tombstones an item, then drains the notify FIFO if requested.
    #[instrument(skip(self))]
    pub async fn delete(&self, base: &str, id: &str, notify: bool) -> Result<feed_protocol::Item, FeedError> {
        let outcome = self.store.delete(base, id, notify).await?;
        if notify {
            notify::process_notify(
                self.store.as_ref(),
                self.publisher.as_ref(),
                base,
                self.notify_stale_seconds,
            )
            .await?;
        }
        Ok(outcome.item)
    }

    /// Reclaims items whose relevant timestamp is older than `ttl_seconds`.
    pub async fn clear_expired(&self, base: &str, ttl_seconds: i64, deleted: bool) -> Result<u64, FeedError> {
        self.store.clear_expired(base, ttl_seconds, deleted).await
    }

    /// Flushes the publisher on graceful shutdown (spec §9 "atexit
    /// publisher shutdown" design note, realized as an explicit call on
    /// the shutdown path rather than a process-exit hook).
    pub async fn shutdown(&self) -> Result<(), FeedError> {
        self.publisher.shutdown().await
    }

    /// Encodes a raw base name the way feed ids expect it (spec §4.1);
    /// exposed so callers building feed ids don't have to import
    /// [`crate::identcodec`] directly.
    #[must_use]
    pub fn encode_base(base: &str) -> String {
        identcodec::encode(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::LoggingPublisher;
    use crate::store::memory::MemoryStore;
    use serde_json::json;

    fn service() -> FeedService {
        FeedService::new(Arc::new(MemoryStore::new()), Arc::new(LoggingPublisher::default()))
    }

    #[tokio::test]
    async fn add_then_get_items_round_trips() {
        let svc = service();
        let base = FeedService::encode_base("my-feed");
        svc.add("my-feed", json!({"v": 1}), Some("a"), false).await.unwrap();
        let feed_id = format!("{base}-created");
        let result = svc.get_items(&feed_id, None, None, 10, false).await.unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].id, "a");
    }

    #[tokio::test]
    async fn get_items_rejects_malformed_feed_id() {
        let svc = service();
        assert!(svc.get_items("nodash", None, None, 10, false).await.is_err());
    }

    #[tokio::test]
    async fn notify_drains_after_add() {
        let publisher = Arc::new(LoggingPublisher::default());
        let svc = FeedService::new(Arc::new(MemoryStore::new()), publisher.clone());
        svc.add("b", json!({}), Some("x"), true).await.unwrap();
        assert_eq!(publisher.published_count(), 2);
    }

    #[tokio::test]
    async fn delete_then_get_items_shows_tombstone() {
        let svc = service();
        svc.add("b", json!({}), Some("x"), false).await.unwrap();
        svc.delete("b", "x", false).await.unwrap();
        let base = FeedService::encode_base("b");
        let result = svc.get_items(&format!("{base}-created"), None, None, 10, false).await.unwrap();
        assert!(result.items[0].deleted);
    }
}
