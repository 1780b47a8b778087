//! `MemoryStore`: an in-process reference [`Store`] backed by
//! `tokio::sync::Mutex`-guarded sorted indices.
//!
//! It reproduces every invariant `RedisStore` does -- same cursor/CRC
//! semantics, same notify FIFO lifecycle -- so the same property tests in
//! `tests/` run against both. Used as the default backend for the demo
//! binary and for this crate's own unit tests.

use std::collections::{BTreeSet, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_protocol::{FeedId, Item, NotifySlot, NotifyState, OrderKey};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::cursor::{make_cursor, PositionSpec};
use crate::error::FeedError;
use crate::identcodec;
use crate::store::algo;
use crate::store::{AddOutcome, DeleteOutcome, ItemsResult, Store, WriteCursors};

/// A single sorted order index: `id -> score` plus a `(score, id)` tree for
/// range queries, ties broken lexically by id (matching a real sorted
/// set's secondary member order).
#[derive(Default)]
struct Index {
    by_id: HashMap<String, i64>,
    sorted: BTreeSet<(i64, String)>,
}

impl Index {
    fn upsert(&mut self, id: &str, score: i64) {
        if let Some(&old) = self.by_id.get(id) {
            if old == score {
                return;
            }
            self.sorted.remove(&(old, id.to_owned()));
        }
        self.by_id.insert(id.to_owned(), score);
        self.sorted.insert((score, id.to_owned()));
    }

    fn remove(&mut self, id: &str) {
        if let Some(old) = self.by_id.remove(id) {
            self.sorted.remove(&(old, id.to_owned()));
        }
    }

    fn score(&self, id: &str) -> Option<i64> {
        self.by_id.get(id).copied()
    }

    fn len(&self) -> usize {
        self.sorted.len()
    }

    /// All `(id, score)` pairs with `score` in `[smin, smax]`, ascending.
    fn range_asc(&self, smin: i64, smax: i64) -> Vec<(String, i64)> {
        self.sorted
            .iter()
            .filter(|(s, _)| *s >= smin && *s <= smax)
            .map(|(s, id)| (id.clone(), *s))
            .collect()
    }

    fn tie_block(&self, score: i64) -> Vec<String> {
        self.sorted
            .iter()
            .filter(|(s, _)| *s == score)
            .map(|(_, id)| id.clone())
            .collect()
    }

    /// The highest score strictly less than `before_ts`, with its tie-block.
    fn prev_tie_block(&self, before_ts: i64) -> Option<(i64, Vec<String>)> {
        let max_score = self
            .sorted
            .iter()
            .filter(|(s, _)| *s < before_ts)
            .map(|(s, _)| *s)
            .max()?;
        Some((max_score, self.tie_block(max_score)))
    }
}

#[derive(Default)]
struct BaseState {
    items: HashMap<String, Item>,
    index_created: Index,
    index_modified: Index,
    index_deleted: Index,
    notify_list: VecDeque<String>,
    notify_items: HashMap<String, NotifySlot>,
    lastpub_created: Option<String>,
    lastpub_modified: Option<String>,
}

impl BaseState {
    fn index(&self, order: OrderKey) -> &Index {
        match order {
            OrderKey::Created => &self.index_created,
            OrderKey::Modified => &self.index_modified,
            OrderKey::Deleted => &self.index_deleted,
        }
    }

    /// Promotes a just-reserved slot in place, while the caller already
    /// holds the base lock (used by `add`/`delete` in the same
    /// transaction that wrote the item).
    fn promote_locked(
        &mut self,
        notify_id: &str,
        item: Item,
        cursor_created: Option<String>,
        cursor_modified: Option<String>,
    ) {
        if let Some(slot) = self.notify_items.get_mut(notify_id) {
            slot.state = NotifyState::Pending;
            slot.item = Some(item);
            slot.cursor_created = cursor_created;
            slot.cursor_modified = cursor_modified;
        }
        // a missing slot means it was already reclaimed as stale; silent no-op.
    }
}

fn now_truncated() -> DateTime<Utc> {
    DateTime::from_timestamp(Utc::now().timestamp(), 0).expect("current time is always in range")
}

/// Builds the empty-result cursor for an ascending window (spec §4.3.1
/// step 6). `refs` is the *untrimmed* fetched batch -- `ids[0..start]` is
/// needed verbatim for the `since.id` case.
fn empty_ascending_cursor(
    original_since: Option<&PositionSpec>,
    resolved_since: Option<&algo::ResolvedSpec>,
    refs: &[(String, i64)],
    start: usize,
    index: &Index,
) -> String {
    match original_since {
        None => String::new(),
        Some(PositionSpec::Id(_)) => {
            let resolved = resolved_since.expect("id spec always resolves");
            let ids: Vec<&str> = refs.iter().take(start).map(|(id, _)| id.as_str()).collect();
            make_cursor(resolved.ts, start.saturating_sub(1), &ids)
        }
        Some(PositionSpec::Time(_)) => {
            let resolved = resolved_since.expect("time spec always resolves");
            if resolved.ts <= 0 {
                return String::new();
            }
            match index.prev_tie_block(resolved.ts) {
                Some((score, ids)) => make_cursor(score, ids.len().saturating_sub(1), &ids),
                None => String::new(),
            }
        }
        Some(PositionSpec::Cursor(token)) => token.clone(),
        Some(PositionSpec::Other { .. }) => {
            unreachable!("unsupported spec types are rejected before reaching this point")
        }
    }
}

/// Reference `Store` implementation held entirely in process memory.
#[derive(Default)]
pub struct MemoryStore {
    bases: Mutex<HashMap<String, BaseState>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_items(
        &self,
        feed_id: &FeedId,
        since: Option<&str>,
        until: Option<&str>,
        max_count: usize,
        with_total: bool,
    ) -> Result<ItemsResult, FeedError> {
        let since_spec = since.map(PositionSpec::parse).transpose()?;
        let until_spec = until.map(PositionSpec::parse).transpose()?;

        let base = identcodec::decode(&feed_id.encoded_base)?;
        let bases = self.bases.lock().await;
        let empty = BaseState::default();
        let state = bases.get(&base).unwrap_or(&empty);
        let index = state.index(feed_id.order);

        let resolved_since = since_spec
            .as_ref()
            .map(|s| algo::resolve_spec(s, &|id| index.score(id)))
            .transpose()?;
        let resolved_until = until_spec
            .as_ref()
            .map(|s| algo::resolve_spec(s, &|id| index.score(id)))
            .transpose()?;

        let mut more = false;
        let refs = if feed_id.descending {
            let smin = resolved_until.as_ref().map_or(i64::MIN, |r| r.ts);
            let smax = resolved_since.as_ref().map_or(i64::MAX, |r| r.ts);
            let mut all = index.range_asc(smin, smax);
            all.reverse();
            let probe_cap = max_count + 1;
            more = all.len() > probe_cap;
            all.truncate(probe_cap);
            all
        } else {
            let smin = resolved_since.as_ref().map_or(i64::MIN, |r| r.ts);
            let smax = resolved_until.as_ref().map_or(i64::MAX, |r| r.ts);
            let mut all = index.range_asc(smin, smax);
            all.truncate(max_count);
            all
        };

        let (start, mut end) = algo::trim_window(&refs, resolved_since.as_ref(), resolved_until.as_ref())?;
        if end > start && end - start > max_count {
            end = start + max_count;
            more = true;
        }

        let mut items = Vec::with_capacity(end.saturating_sub(start));
        for (id, _) in &refs[start.min(refs.len())..end.min(refs.len())] {
            let item = state
                .items
                .get(id)
                .cloned()
                .ok_or_else(|| FeedError::DataCorruption(format!("index referenced missing item '{id}'")))?;
            items.push(item);
        }

        let last_cursor = if start < end {
            if feed_id.descending && !more {
                None
            } else {
                Some(algo::non_empty_last_cursor(&refs[start..end]))
            }
        } else if feed_id.descending {
            None
        } else {
            Some(empty_ascending_cursor(
                since_spec.as_ref(),
                resolved_since.as_ref(),
                &refs,
                start,
                index,
            ))
        };

        Ok(ItemsResult {
            items,
            total: with_total.then(|| index.len() as u64),
            last_cursor,
        })
    }

    async fn add(
        &self,
        base: &str,
        data: serde_json::Value,
        id: Option<&str>,
        notify: bool,
    ) -> Result<AddOutcome, FeedError> {
        let mut bases = self.bases.lock().await;
        let state = bases.entry(base.to_owned()).or_default();
        let now = now_truncated();

        let (item, is_new) = match id {
            Some(given) => match state.items.get(given) {
                Some(existing) => {
                    let mut updated = existing.clone();
                    updated.modified = now;
                    updated.data = data;
                    updated.deleted = false;
                    (updated, false)
                }
                None => (
                    Item {
                        id: given.to_owned(),
                        created: now,
                        modified: now,
                        deleted: false,
                        data,
                    },
                    true,
                ),
            },
            None => loop {
                let candidate = Uuid::new_v4().to_string();
                if !state.items.contains_key(&candidate) {
                    break (
                        Item {
                            id: candidate,
                            created: now,
                            modified: now,
                            deleted: false,
                            data,
                        },
                        true,
                    );
                }
            },
        };

        state.items.insert(item.id.clone(), item.clone());
        state.index_created.upsert(&item.id, item.created_ts());
        state.index_modified.upsert(&item.id, item.modified_ts());
        state.index_deleted.remove(&item.id);

        let created_tie = state.index_created.tie_block(item.created_ts());
        let modified_tie = state.index_modified.tie_block(item.modified_ts());
        let created_pos = created_tie
            .iter()
            .position(|x| x == &item.id)
            .expect("item was just upserted into this index");
        let modified_pos = modified_tie
            .iter()
            .position(|x| x == &item.id)
            .expect("item was just upserted into this index");

        let cursor_created = is_new.then(|| make_cursor(item.created_ts(), created_pos, &created_tie));
        let cursor_modified = make_cursor(item.modified_ts(), modified_pos, &modified_tie);

        if notify {
            let notify_id = Uuid::new_v4().to_string();
            state.notify_list.push_back(notify_id.clone());
            state
                .notify_items
                .insert(notify_id.clone(), NotifySlot::new_initializing(notify_id.clone(), now.timestamp()));
            state.promote_locked(
                &notify_id,
                item.clone(),
                cursor_created.clone(),
                Some(cursor_modified.clone()),
            );
        }

        Ok(AddOutcome {
            item,
            is_new,
            cursors: WriteCursors {
                cursor_created,
                cursor_modified,
            },
        })
    }

    async fn delete(&self, base: &str, id: &str, notify: bool) -> Result<DeleteOutcome, FeedError> {
        let mut bases = self.bases.lock().await;
        let state = bases
            .get_mut(base)
            .ok_or_else(|| FeedError::ItemDoesNotExist(id.to_owned()))?;
        let mut item = state
            .items
            .get(id)
            .cloned()
            .filter(|i| !i.deleted)
            .ok_or_else(|| FeedError::ItemDoesNotExist(id.to_owned()))?;

        let now = now_truncated();
        item.modified = now;
        item.deleted = true;
        state.items.insert(item.id.clone(), item.clone());
        state.index_modified.upsert(&item.id, item.modified_ts());
        state.index_deleted.upsert(&item.id, item.modified_ts());

        let modified_tie = state.index_modified.tie_block(item.modified_ts());
        let modified_pos = modified_tie
            .iter()
            .position(|x| x == &item.id)
            .expect("item was just upserted into this index");
        let cursor_modified = make_cursor(item.modified_ts(), modified_pos, &modified_tie);

        if notify {
            let notify_id = Uuid::new_v4().to_string();
            state.notify_list.push_back(notify_id.clone());
            state
                .notify_items
                .insert(notify_id.clone(), NotifySlot::new_initializing(notify_id.clone(), now.timestamp()));
            state.promote_locked(&notify_id, item.clone(), None, Some(cursor_modified.clone()));
        }

        Ok(DeleteOutcome { item, cursor_modified })
    }

    async fn clear_expired(&self, base: &str, ttl_seconds: i64, deleted: bool) -> Result<u64, FeedError> {
        let mut bases = self.bases.lock().await;
        let Some(state) = bases.get_mut(base) else {
            return Ok(0);
        };
        let cutoff = Utc::now().timestamp() - ttl_seconds - 1;
        let index = if deleted { &state.index_deleted } else { &state.index_modified };
        let victims: Vec<String> = index
            .sorted
            .iter()
            .filter(|(s, _)| *s <= cutoff)
            .map(|(_, id)| id.clone())
            .collect();
        let count = victims.len() as u64;
        for id in victims {
            state.items.remove(&id);
            state.index_created.remove(&id);
            state.index_modified.remove(&id);
            state.index_deleted.remove(&id);
        }
        Ok(count)
    }

    async fn peek_notify_head(&self, base: &str) -> Result<Option<NotifySlot>, FeedError> {
        let bases = self.bases.lock().await;
        let Some(state) = bases.get(base) else {
            return Ok(None);
        };
        let Some(head) = state.notify_list.front() else {
            return Ok(None);
        };
        Ok(state.notify_items.get(head).cloned())
    }

    async fn promote_notify_slot(
        &self,
        base: &str,
        notify_id: &str,
        item: Item,
        cursor_created: Option<String>,
        cursor_modified: Option<String>,
    ) -> Result<(), FeedError> {
        let mut bases = self.bases.lock().await;
        if let Some(state) = bases.get_mut(base) {
            state.promote_locked(notify_id, item, cursor_created, cursor_modified);
        }
        Ok(())
    }

    async fn commit_notify_head(
        &self,
        base: &str,
        notify_id: &str,
        advance_created: Option<&str>,
        advance_modified: Option<&str>,
    ) -> Result<(Option<String>, Option<String>), FeedError> {
        let mut bases = self.bases.lock().await;
        let state = bases
            .get_mut(base)
            .ok_or_else(|| FeedError::DataCorruption(format!("no base state for '{base}'")))?;
        match state.notify_list.front() {
            Some(head) if head == notify_id => {
                state.notify_list.pop_front();
            }
            _ => {
                return Err(FeedError::DataCorruption(format!(
                    "commit_notify_head called for '{notify_id}' which is not the FIFO head"
                )))
            }
        }
        state.notify_items.remove(notify_id);
        let prev_created = state.lastpub_created.clone();
        let prev_modified = state.lastpub_modified.clone();
        if let Some(c) = advance_created {
            state.lastpub_created = Some(c.to_owned());
        }
        if let Some(c) = advance_modified {
            state.lastpub_modified = Some(c.to_owned());
        }
        Ok((prev_created, prev_modified))
    }

    async fn reclaim_notify_head(&self, base: &str, notify_id: &str) -> Result<(), FeedError> {
        let mut bases = self.bases.lock().await;
        let Some(state) = bases.get_mut(base) else {
            return Ok(());
        };
        if state.notify_list.front().map(String::as_str) == Some(notify_id) {
            state.notify_list.pop_front();
        }
        state.notify_items.remove(notify_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed_protocol::OrderKey;
    use serde_json::json;

    fn feed(order: OrderKey, descending: bool) -> FeedId {
        FeedId {
            encoded_base: identcodec::encode("b"),
            order,
            descending,
        }
    }

    #[tokio::test]
    async fn add_then_get_items_returns_inserted_item() {
        let store = MemoryStore::new();
        store.add("b", json!({"v": 1}), Some("x"), false).await.unwrap();
        let result = store
            .get_items(&feed(OrderKey::Created, false), None, None, 10, false)
            .await
            .unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].id, "x");
        assert!(result.last_cursor.is_some());
    }

    #[tokio::test]
    async fn empty_feed_returns_empty_cursor() {
        let store = MemoryStore::new();
        let result = store
            .get_items(&feed(OrderKey::Created, false), None, None, 10, false)
            .await
            .unwrap();
        assert!(result.items.is_empty());
        assert_eq!(result.last_cursor, Some(String::new()));
    }

    #[tokio::test]
    async fn since_cursor_paginates_forward() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .add("b", json!({"v": i}), Some(&format!("item-{i}")), false)
                .await
                .unwrap();
        }
        let first = store
            .get_items(&feed(OrderKey::Created, false), None, None, 2, false)
            .await
            .unwrap();
        assert_eq!(first.items.len(), 2);
        let cursor = first.last_cursor.unwrap();
        let second = store
            .get_items(&feed(OrderKey::Created, false), Some(&cursor), None, 2, false)
            .await
            .unwrap();
        assert_eq!(second.items.len(), 2);
        assert_ne!(first.items[0].id, second.items[0].id);
    }

    #[tokio::test]
    async fn descending_reports_more_only_when_extra_items_exist() {
        let store = MemoryStore::new();
        for i in 0..3 {
            store
                .add("b", json!({"v": i}), Some(&format!("item-{i}")), false)
                .await
                .unwrap();
        }
        let page = store
            .get_items(&feed(OrderKey::Created, true), None, None, 10, false)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 3);
        assert!(page.last_cursor.is_none(), "fetched everything, no more pages");
    }

    #[tokio::test]
    async fn delete_marks_tombstone_and_moves_to_deleted_index() {
        let store = MemoryStore::new();
        store.add("b", json!({}), Some("x"), false).await.unwrap();
        store.delete("b", "x", false).await.unwrap();
        let created = store
            .get_items(&feed(OrderKey::Created, false), None, None, 10, false)
            .await
            .unwrap();
        assert!(created.items[0].deleted);
        let deleted_feed = store
            .get_items(&feed(OrderKey::Deleted, false), None, None, 10, false)
            .await
            .unwrap();
        assert_eq!(deleted_feed.items.len(), 1);
    }

    #[tokio::test]
    async fn delete_missing_item_is_an_error() {
        let store = MemoryStore::new();
        assert!(store.delete("b", "ghost", false).await.is_err());
    }

    #[tokio::test]
    async fn notify_slot_reaches_pending_after_add() {
        let store = MemoryStore::new();
        store.add("b", json!({}), Some("x"), true).await.unwrap();
        let slot = store.peek_notify_head("b").await.unwrap().unwrap();
        assert_eq!(slot.state, NotifyState::Pending);
        assert!(slot.cursor_created.is_some());
    }

    #[tokio::test]
    async fn clear_expired_reclaims_only_stale_tombstones() {
        let store = MemoryStore::new();
        store.add("b", json!({}), Some("x"), false).await.unwrap();
        store.delete("b", "x", false).await.unwrap();
        let reclaimed = store.clear_expired("b", 3600, true).await.unwrap();
        assert_eq!(reclaimed, 0, "fresh tombstone is not yet older than the ttl");
    }
}
