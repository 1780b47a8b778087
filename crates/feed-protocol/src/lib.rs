// feed-protocol: shared data-model types for the feed storage and fanout engine.
//
// These are the on-the-wire / in-store shapes (`Item`, notification slots,
// order keys) used by both the storage engine and the publisher so that
// neither has to reach into the other's internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An order key a feed can be paginated by.
///
/// `Created` and `Modified` are always populated; `Deleted` only contains
/// tombstoned items (see [`Item::deleted`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderKey {
    Created,
    Modified,
    Deleted,
}

impl OrderKey {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OrderKey::Created => "created",
            OrderKey::Modified => "modified",
            OrderKey::Deleted => "deleted",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(OrderKey::Created),
            "modified" => Some(OrderKey::Modified),
            "deleted" => Some(OrderKey::Deleted),
            _ => None,
        }
    }
}

/// A single item in a feed.
///
/// `created`/`modified` are truncated to second precision (the score type
/// the sorted indices use). `data` is an opaque JSON value -- the engine
/// never inspects its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
    pub data: serde_json::Value,
}

impl Item {
    #[must_use]
    pub fn created_ts(&self) -> i64 {
        self.created.timestamp()
    }

    #[must_use]
    pub fn modified_ts(&self) -> i64 {
        self.modified.timestamp()
    }

    #[must_use]
    pub fn ts_for(&self, order: OrderKey) -> i64 {
        match order {
            OrderKey::Created => self.created_ts(),
            OrderKey::Modified | OrderKey::Deleted => self.modified_ts(),
        }
    }
}

/// On-wire storage form: `{ "data": ..., "meta": { "id", "created", "modified", "deleted"? } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMeta {
    id: String,
    created: i64,
    modified: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredItem {
    data: serde_json::Value,
    meta: StoredMeta,
}

/// Deserialization of a stored item failed or its shape was invalid.
#[derive(Debug)]
pub struct DataCorruption(pub String);

impl std::fmt::Display for DataCorruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "data corruption: {}", self.0)
    }
}

impl std::error::Error for DataCorruption {}

impl Item {
    /// Serializes to the storage-hash wire form described in spec §6.
    ///
    /// # Panics
    /// Never -- `Item`'s fields are always representable as JSON.
    #[must_use]
    pub fn serialize_for_store(&self) -> String {
        let stored = StoredItem {
            data: self.data.clone(),
            meta: StoredMeta {
                id: self.id.clone(),
                created: self.created_ts(),
                modified: self.modified_ts(),
                deleted: self.deleted,
            },
        };
        serde_json::to_string(&stored).expect("Item always serializes")
    }

    pub fn deserialize_from_store(raw: &str) -> Result<Self, DataCorruption> {
        let stored: StoredItem =
            serde_json::from_str(raw).map_err(|e| DataCorruption(e.to_string()))?;
        let created = DateTime::from_timestamp(stored.meta.created, 0)
            .ok_or_else(|| DataCorruption("created timestamp out of range".to_owned()))?;
        let modified = DateTime::from_timestamp(stored.meta.modified, 0)
            .ok_or_else(|| DataCorruption("modified timestamp out of range".to_owned()))?;
        Ok(Item {
            id: stored.meta.id,
            created,
            modified,
            deleted: stored.meta.deleted,
            data: stored.data,
        })
    }
}

/// State of a pending notification slot (see spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyState {
    Initializing,
    Pending,
}

/// A reservation in a base's notify FIFO.
///
/// Allocated with `state = Initializing` inside the same transaction that
/// writes the item; promoted to `Pending` (with the item snapshot and
/// computed cursors) after commit. A slot found in `Initializing` state
/// older than the reclaim window is dropped without publishing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifySlot {
    pub notify_id: String,
    pub created_ts: i64,
    pub state: NotifyState,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub item: Option<Item>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cursor_created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cursor_modified: Option<String>,
}

impl NotifySlot {
    #[must_use]
    pub fn new_initializing(notify_id: String, created_ts: i64) -> Self {
        Self {
            notify_id,
            created_ts,
            state: NotifyState::Initializing,
            item: None,
            cursor_created: None,
            cursor_modified: None,
        }
    }
}

/// External handle for a feed: `"<enc_base>-[<->]<order>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedId {
    pub encoded_base: String,
    pub order: OrderKey,
    pub descending: bool,
}

impl FeedId {
    /// Parses `"<enc_base>-[-]<order>"`, splitting on the *first* `-` per
    /// the identifier codec's escaping guarantee (spec §4.1).
    pub fn parse(feed_id: &str) -> Option<Self> {
        let (base, rest) = feed_id.split_once('-')?;
        let (descending, order_str) = match rest.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, rest),
        };
        let order = OrderKey::parse(order_str)?;
        Some(FeedId {
            encoded_base: base.to_owned(),
            order,
            descending,
        })
    }

    #[must_use]
    pub fn to_string_id(&self) -> String {
        let sign = if self.descending { "-" } else { "" };
        format!("{}-{sign}{}", self.encoded_base, self.order.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item() -> Item {
        Item {
            id: "abc".to_owned(),
            created: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            modified: DateTime::from_timestamp(1_700_000_050, 0).unwrap(),
            deleted: false,
            data: serde_json::json!({"value": 42}),
        }
    }

    #[test]
    fn round_trips_through_store_serialization() {
        let item = sample_item();
        let raw = item.serialize_for_store();
        let back = Item::deserialize_from_store(&raw).unwrap();
        assert_eq!(item, back);
    }

    #[test]
    fn tombstone_flag_survives_round_trip() {
        let mut item = sample_item();
        item.deleted = true;
        let raw = item.serialize_for_store();
        let back = Item::deserialize_from_store(&raw).unwrap();
        assert!(back.deleted);
    }

    #[test]
    fn deserialize_rejects_garbage() {
        assert!(Item::deserialize_from_store("not json").is_err());
        assert!(Item::deserialize_from_store("{}").is_err());
    }

    #[test]
    fn feed_id_parses_ascending_and_descending() {
        let f = FeedId::parse("my-created").unwrap();
        assert_eq!(f.encoded_base, "my");
        assert_eq!(f.order, OrderKey::Created);
        assert!(!f.descending);

        let f = FeedId::parse("my--created").unwrap();
        assert_eq!(f.encoded_base, "my");
        assert!(f.descending);
        assert_eq!(f.to_string_id(), "my--created");
    }

    #[test]
    fn feed_id_rejects_unknown_order() {
        assert!(FeedId::parse("base-bogus").is_none());
        assert!(FeedId::parse("nodash").is_none());
    }
}
