//! Realtime fanout abstraction (spec §4.5/C5).
//!
//! The actual wire protocol (GRIP/EPCP via Pushpin or Fanout.io) is an
//! external collaborator this crate doesn't implement -- `Publisher` is
//! the seam a real integration plugs into. `LoggingPublisher` is a demo
//! implementation, grounded in the teacher's `DashboardEvent` broadcast
//! pattern: a handle cheap to clone, fed into every worker that needs to
//! announce something.

use async_trait::async_trait;
use feed_protocol::{Item, OrderKey};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

use crate::error::FeedError;

/// The only publish format this crate actually encodes.
pub const FORMAT_JSON: &str = "json";
/// Declared but not implemented, matching `create_items_body`'s `atom`
/// branch in the original library (`NotImplementedError`-style).
pub const FORMAT_ATOM: &str = "atom";

/// A channel name for `base`'s `order` feed (e.g. `feed-created`,
/// subscribers on this channel receive every publish to that order).
#[must_use]
pub fn channel_name(base: &str, order: OrderKey) -> String {
    format!("{base}-{}", order.as_str())
}

/// Rejects every format but `json` (spec's declared-but-unimplemented
/// `atom` format).
pub fn ensure_supported_format(format: &str) -> Result<(), FeedError> {
    if format == FORMAT_JSON {
        Ok(())
    } else {
        Err(FeedError::TransportError(format!(
            "publish format '{format}' is not implemented"
        )))
    }
}

/// The `{response, stream, request}` envelope triple GRIP/EPCP expects
/// for a single published event. `Formatter` owns turning a domain item
/// into this shape; `Publisher` owns getting it to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct PublishEnvelope {
    pub channel: String,
    pub cursor: String,
    pub prev_cursor: Option<String>,
    pub item: serde_json::Value,
}

/// Formats a published item into its wire envelope. Kept separate from
/// `Publisher` so a transport (HTTP long-poll, WebSocket, SSE) can share
/// one formatting policy across different delivery mechanisms.
pub trait Formatter: Send + Sync {
    fn format(&self, channel: &str, item: &Item, cursor: &str, prev_cursor: Option<&str>) -> PublishEnvelope;
}

/// Formats an item as its stored JSON plus envelope metadata, no
/// transformation.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFormatter;

impl Formatter for DefaultFormatter {
    fn format(&self, channel: &str, item: &Item, cursor: &str, prev_cursor: Option<&str>) -> PublishEnvelope {
        PublishEnvelope {
            channel: channel.to_owned(),
            cursor: cursor.to_owned(),
            prev_cursor: prev_cursor.map(str::to_owned),
            item: serde_json::json!({
                "id": item.id,
                "created": item.created_ts(),
                "modified": item.modified_ts(),
                "deleted": item.deleted,
                "data": item.data,
            }),
        }
    }
}

/// Publishes a formatted item to realtime subscribers of `base`'s `order`
/// feed. Implementations must be safe to call concurrently for
/// independent bases; ordering within a single base/order pair is the
/// caller's responsibility ([`crate::notify`] guarantees it).
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        base: &str,
        order: OrderKey,
        item: &Item,
        cursor: &str,
        prev_cursor: Option<&str>,
    ) -> Result<(), FeedError>;

    /// Flushes/closes the publisher on graceful shutdown. Default is a
    /// no-op; a real GRIP client would use this to drain in-flight
    /// publishes before the process exits.
    async fn shutdown(&self) -> Result<(), FeedError> {
        Ok(())
    }
}

/// Demo [`Publisher`] that logs every publish instead of sending it
/// anywhere. Useful for the demo binary and for exercising
/// [`crate::notify::process_notify`] without a real GRIP endpoint.
#[derive(Default)]
pub struct LoggingPublisher {
    formatter: DefaultFormatter,
    count: AtomicUsize,
}

impl LoggingPublisher {
    #[must_use]
    pub fn published_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Publisher for LoggingPublisher {
    async fn publish(
        &self,
        base: &str,
        order: OrderKey,
        item: &Item,
        cursor: &str,
        prev_cursor: Option<&str>,
    ) -> Result<(), FeedError> {
        ensure_supported_format(FORMAT_JSON)?;
        let channel = channel_name(base, order);
        let envelope = self.formatter.format(&channel, item, cursor, prev_cursor);
        info!(
            channel = %envelope.channel,
            cursor = %envelope.cursor,
            prev_cursor = ?envelope.prev_cursor,
            item_id = %item.id,
            "publish"
        );
        self.count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn sample_item() -> Item {
        Item {
            id: "x".to_owned(),
            created: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            modified: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            deleted: false,
            data: serde_json::json!({"a": 1}),
        }
    }

    #[test]
    fn channel_name_joins_base_and_order() {
        assert_eq!(channel_name("feed", OrderKey::Created), "feed-created");
    }

    #[test]
    fn atom_format_is_declared_but_unimplemented() {
        assert!(ensure_supported_format(FORMAT_JSON).is_ok());
        assert!(ensure_supported_format(FORMAT_ATOM).is_err());
    }

    #[test]
    fn default_formatter_carries_cursor_and_prev_cursor() {
        let envelope = DefaultFormatter.format("feed-created", &sample_item(), "cur", Some("prev"));
        assert_eq!(envelope.cursor, "cur");
        assert_eq!(envelope.prev_cursor.as_deref(), Some("prev"));
        assert_eq!(envelope.item["data"]["a"], 1);
    }

    #[tokio::test]
    async fn logging_publisher_counts_publishes() {
        let publisher = LoggingPublisher::default();
        publisher
            .publish("feed", OrderKey::Created, &sample_item(), "cur", None)
            .await
            .unwrap();
        assert_eq!(publisher.published_count(), 1);
    }
}
