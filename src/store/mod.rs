//! Storage engine (spec §4.3): the `Store` abstraction over a sorted,
//! optimistic-transactional key-value backend, plus the two concrete
//! backends in this crate.
//!
//! Per the design note in spec §9 ("Inheritance `Model`/`RedisModel`"),
//! this is expressed as a trait rather than a class hierarchy: a `Store`
//! owns the items hash, the per-order indices, the notify FIFO, and the
//! last-published cursors for a base.

pub mod algo;
pub mod memory;
pub mod redis;

use async_trait::async_trait;
use feed_protocol::{FeedId, Item, NotifySlot};

use crate::error::FeedError;

/// Result of a `get_items` call (spec §3, `ItemsResult`).
#[derive(Debug, Clone, Default)]
pub struct ItemsResult {
    pub items: Vec<Item>,
    pub total: Option<u64>,
    /// `None` means "terminal" (descending window with no more items
    /// beyond it); `Some("")` means "no prior position / feed may be
    /// empty" (spec §4.3.1 step 6).
    pub last_cursor: Option<String>,
}

/// The computed tie-block cursors produced by a single `add`/`delete`
/// commit, handed to [`crate::notify`] to finish the two-phase slot
/// promotion.
#[derive(Debug, Clone, Default)]
pub struct WriteCursors {
    pub cursor_created: Option<String>,
    pub cursor_modified: String,
}

/// Result of committing an `add`.
#[derive(Debug, Clone)]
pub struct AddOutcome {
    pub item: Item,
    pub is_new: bool,
    pub cursors: WriteCursors,
}

/// Result of committing a `delete`.
#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    pub item: Item,
    pub cursor_modified: String,
}

/// The storage engine's public surface (spec §4.3.1).
///
/// Implementations retry internally on optimistic-transaction conflicts
/// (`WatchError`) with no retry cap; conflicts never surface to callers.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_items(
        &self,
        feed_id: &FeedId,
        since: Option<&str>,
        until: Option<&str>,
        max_count: usize,
        with_total: bool,
    ) -> Result<ItemsResult, FeedError>;

    /// Inserts or updates an item. `id = None` generates a server-side
    /// UUIDv4. When `notify` is set, a notify slot is reserved in the same
    /// transaction as the write (spec §4.4) and returned so the caller can
    /// promote it to `Pending` once cursors are computed.
    async fn add(
        &self,
        base: &str,
        data: serde_json::Value,
        id: Option<&str>,
        notify: bool,
    ) -> Result<AddOutcome, FeedError>;

    async fn delete(&self, base: &str, id: &str, notify: bool) -> Result<DeleteOutcome, FeedError>;

    /// Physically removes items whose relevant score is at or before
    /// `now - ttl - 1`. Returns the count reclaimed.
    async fn clear_expired(&self, base: &str, ttl_seconds: i64, deleted: bool) -> Result<u64, FeedError>;

    /// Pops and returns the head notify slot for `base` if present,
    /// without mutating FIFO/lastpub state -- used by
    /// [`crate::notify::process_notify`] to inspect before committing a
    /// pop/reclaim/publish decision.
    async fn peek_notify_head(&self, base: &str) -> Result<Option<NotifySlot>, FeedError>;

    /// Promotes `notify_id` from `Initializing` to `Pending`, attaching the
    /// item snapshot and cursors. A missing slot (already reclaimed) is a
    /// silent no-op, matching spec §4.4.
    async fn promote_notify_slot(
        &self,
        base: &str,
        notify_id: &str,
        item: Item,
        cursor_created: Option<String>,
        cursor_modified: Option<String>,
    ) -> Result<(), FeedError>;

    /// Atomically pops the head slot, deletes its hash entry, and advances
    /// whichever `lastpub-*` watermarks the slot carries, returning the
    /// previous watermark values for chaining. Only valid to call when the
    /// head is known to be `Pending`.
    async fn commit_notify_head(
        &self,
        base: &str,
        notify_id: &str,
        advance_created: Option<&str>,
        advance_modified: Option<&str>,
    ) -> Result<(Option<String>, Option<String>), FeedError>;

    /// Drops a stale `Initializing` head slot without publishing.
    async fn reclaim_notify_head(&self, base: &str, notify_id: &str) -> Result<(), FeedError>;

    async fn psh_sub_set(&self, _feed_id: &str, _uri: &str) -> Result<(), FeedError> {
        Err(FeedError::TransportError(
            "PubSubHubbub subscriptions not implemented".to_owned(),
        ))
    }

    async fn psh_sub_remove(&self, _feed_id: &str, _uri: &str) -> Result<(), FeedError> {
        Err(FeedError::TransportError(
            "PubSubHubbub subscriptions not implemented".to_owned(),
        ))
    }

    async fn xmpp_sub_set(&self, _feed_id: &str, _jid: &str) -> Result<(), FeedError> {
        Err(FeedError::TransportError(
            "XMPP subscriptions not implemented".to_owned(),
        ))
    }

    async fn xmpp_sub_remove(&self, _feed_id: &str, _jid: &str) -> Result<(), FeedError> {
        Err(FeedError::TransportError(
            "XMPP subscriptions not implemented".to_owned(),
        ))
    }
}
