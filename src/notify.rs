//! Realtime notification pipeline (spec §4.4): drains a base's notify
//! FIFO in order, publishing each item once its slot reaches `Pending`
//! and reclaiming slots that were abandoned mid-write.
//!
//! This is the *repaired* two-phase design spec.md calls out explicitly as
//! authoritative over the original library's buggy single-phase FIFO --
//! grounded in the teacher's `announcer`/`ws_forwarder` pattern of an
//! async task draining a queue and publishing in order, generalized here
//! to the slot-promotion lifecycle this engine adds on top.

use feed_protocol::{NotifyState, OrderKey};
use tracing::{debug, trace, warn};

use crate::error::FeedError;
use crate::publisher::Publisher;
use crate::store::Store;

/// A slot left `Initializing` longer than this is assumed abandoned (its
/// producer crashed between reserving the slot and promoting it) and is
/// dropped without publishing.
pub const STALE_SLOT_SECONDS: i64 = 60;

/// Drains as much of `base`'s notify FIFO as is currently ready to drain.
///
/// Stops when the FIFO is empty, or its head is `Initializing` and still
/// within `stale_after_secs` (its producer may still be about to promote
/// it -- we leave it for a later call rather than publish out of order).
pub async fn process_notify(
    store: &dyn Store,
    publisher: &dyn Publisher,
    base: &str,
    stale_after_secs: i64,
) -> Result<(), FeedError> {
    loop {
        let Some(slot) = store.peek_notify_head(base).await? else {
            return Ok(());
        };

        match slot.state {
            NotifyState::Initializing => {
                let age = chrono::Utc::now().timestamp() - slot.created_ts;
                if age <= stale_after_secs {
                    trace!(base, notify_id = %slot.notify_id, age, "head still initializing, leaving for later");
                    return Ok(());
                }
                warn!(base, notify_id = %slot.notify_id, age, "reclaiming stale notify slot");
                store.reclaim_notify_head(base, &slot.notify_id).await?;
            }
            NotifyState::Pending => {
                let item = slot.item.clone().ok_or_else(|| {
                    FeedError::DataCorruption(format!("pending notify slot '{}' has no item", slot.notify_id))
                })?;
                let (prev_created, prev_modified) = store
                    .commit_notify_head(
                        base,
                        &slot.notify_id,
                        slot.cursor_created.as_deref(),
                        slot.cursor_modified.as_deref(),
                    )
                    .await?;

                if let Some(cursor) = &slot.cursor_created {
                    publisher
                        .publish(base, OrderKey::Created, &item, cursor, prev_created.as_deref())
                        .await?;
                }
                if let Some(cursor) = &slot.cursor_modified {
                    publisher
                        .publish(base, OrderKey::Modified, &item, cursor, prev_modified.as_deref())
                        .await?;
                }
                debug!(base, notify_id = %slot.notify_id, "published notify slot");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::LoggingPublisher;
    use crate::store::memory::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn drains_pending_slot_and_empties_fifo() {
        let store = MemoryStore::new();
        let publisher = LoggingPublisher::default();
        store.add("b", json!({"v": 1}), Some("x"), true).await.unwrap();
        assert!(store.peek_notify_head("b").await.unwrap().is_some());

        process_notify(&store, &publisher, "b", STALE_SLOT_SECONDS).await.unwrap();

        assert!(store.peek_notify_head("b").await.unwrap().is_none());
        assert_eq!(publisher.published_count(), 2); // created + modified
    }

    #[tokio::test]
    async fn empty_fifo_is_a_no_op() {
        let store = MemoryStore::new();
        let publisher = LoggingPublisher::default();
        process_notify(&store, &publisher, "never-touched", STALE_SLOT_SECONDS)
            .await
            .unwrap();
        assert_eq!(publisher.published_count(), 0);
    }
}
