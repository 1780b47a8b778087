//! `RedisStore`: the real backend, a sorted set per order index plus a
//! hash of serialized items, transactions done with `WATCH`/`MULTI`/`EXEC`
//! (spec §4.3, §9 design note).
//!
//! All pagination/trim/cursor math is delegated to [`crate::store::algo`]
//! so this file only has to get data in and out of Redis in the shapes
//! `algo` expects -- the same functions `MemoryStore` calls are exercised
//! here too.

use async_trait::async_trait;
use feed_protocol::{FeedId, Item, NotifySlot, NotifyState, OrderKey};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::cursor::{make_cursor, PositionSpec};
use crate::error::FeedError;
use crate::identcodec;
use crate::store::algo;
use crate::store::{AddOutcome, DeleteOutcome, ItemsResult, Store, WriteCursors};

fn redis_err(e: redis::RedisError) -> FeedError {
    FeedError::TransportError(e.to_string())
}

fn items_key(base: &str) -> String {
    format!("feed:{base}:items")
}

fn index_key(base: &str, order: OrderKey) -> String {
    format!("feed:{base}:idx:{}", order.as_str())
}

fn notify_list_key(base: &str) -> String {
    format!("feed:{base}:notify:list")
}

fn notify_slots_key(base: &str) -> String {
    format!("feed:{base}:notify:slots")
}

fn lastpub_key(base: &str, order: OrderKey) -> String {
    format!("feed:{base}:lastpub:{}", order.as_str())
}

/// Backend over a real Redis (or Redis-protocol-compatible) server.
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn tie_block(&self, key: &str, score: i64) -> Result<Vec<String>, FeedError> {
        let mut conn = self.conn.clone();
        conn.zrangebyscore(key, score, score).await.map_err(redis_err)
    }

    async fn prev_tie_block(&self, key: &str, before_ts: i64) -> Result<Option<(i64, Vec<String>)>, FeedError> {
        let mut conn = self.conn.clone();
        let found: Vec<(String, i64)> = conn
            .zrevrangebyscore_limit_withscores(key, before_ts - 1, i64::MIN, 0, 1)
            .await
            .map_err(redis_err)?;
        let Some((_, score)) = found.into_iter().next() else {
            return Ok(None);
        };
        Ok(Some((score, self.tie_block(key, score).await?)))
    }
}

fn empty_ascending_cursor_sync(
    original_since: Option<&PositionSpec>,
    resolved_since: Option<&algo::ResolvedSpec>,
    refs: &[(String, i64)],
    start: usize,
    prev_block: Option<(i64, Vec<String>)>,
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
            match prev_block {
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

#[async_trait]
impl Store for RedisStore {
    /// Reads a page (spec §4.3.1). The candidate window and the item
    /// bodies are read under a `WATCH` on the items hash and the chosen
    /// order index: if a concurrent writer touches either between the
    /// `WATCH` and the closing `EXEC`, the whole attempt retries against a
    /// fresh snapshot rather than surfacing a torn read (e.g. an index
    /// entry whose item was deleted a moment after the index was read).
    #[instrument(skip(self))]
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
        let items_key = items_key(&base);
        let index_key = index_key(&base, feed_id.order);

        'attempt: loop {
            let mut conn = self.conn.clone();
            redis::cmd("WATCH")
                .arg(&items_key)
                .arg(&index_key)
                .query_async::<()>(&mut conn)
                .await
                .map_err(redis_err)?;

            let mut resolved_since = None;
            if let Some(spec) = &since_spec {
                resolved_since = Some(match spec {
                    PositionSpec::Id(id) => {
                        let ts: Option<i64> = conn.zscore(&index_key, id).await.map_err(redis_err)?;
                        let ts = ts.ok_or_else(|| FeedError::InvalidSpec(format!("id '{id}' not found in index")))?;
                        algo::ResolvedSpec {
                            kind: algo::ResolvedKind::Id(id.clone()),
                            ts,
                            offset: None,
                            crc: None,
                        }
                    }
                    other => algo::resolve_spec(other, &|_| None)?,
                });
            }
            let mut resolved_until = None;
            if let Some(spec) = &until_spec {
                resolved_until = Some(match spec {
                    PositionSpec::Id(id) => {
                        let ts: Option<i64> = conn.zscore(&index_key, id).await.map_err(redis_err)?;
                        let ts = ts.ok_or_else(|| FeedError::InvalidSpec(format!("id '{id}' not found in index")))?;
                        algo::ResolvedSpec {
                            kind: algo::ResolvedKind::Id(id.clone()),
                            ts,
                            offset: None,
                            crc: None,
                        }
                    }
                    other => algo::resolve_spec(other, &|_| None)?,
                });
            }

            let (smin, smax) = if feed_id.descending {
                (
                    resolved_until.as_ref().map_or(i64::MIN, |r| r.ts),
                    resolved_since.as_ref().map_or(i64::MAX, |r| r.ts),
                )
            } else {
                (
                    resolved_since.as_ref().map_or(i64::MIN, |r| r.ts),
                    resolved_until.as_ref().map_or(i64::MAX, |r| r.ts),
                )
            };

            // Read while the watch is live; if nothing touches `items_key`
            // or `index_key` before the pipe below executes, this snapshot
            // is guaranteed to still be current at that point.
            let mut refs: Vec<(String, i64)> =
                conn.zrangebyscore_withscores(&index_key, smin, smax).await.map_err(redis_err)?;
            let mut more = false;
            if feed_id.descending {
                refs.reverse();
                let probe_cap = max_count + 1;
                more = refs.len() > probe_cap;
                refs.truncate(probe_cap);
            } else {
                refs.truncate(max_count);
            }

            let (start, mut end) = algo::trim_window(&refs, resolved_since.as_ref(), resolved_until.as_ref())?;
            if end > start && end - start > max_count {
                end = start + max_count;
                more = true;
            }

            let needed: Vec<String> = refs[start.min(refs.len())..end.min(refs.len())]
                .iter()
                .map(|(id, _)| id.clone())
                .collect();

            let mut pipe = redis::pipe();
            pipe.atomic();
            if needed.is_empty() {
                pipe.exists(&items_key);
            } else {
                pipe.hget(&items_key, needed.clone());
            }
            if with_total {
                pipe.zcard(&index_key);
            }

            let result: Option<Vec<redis::Value>> = pipe.query_async(&mut conn).await.map_err(redis_err)?;
            let Some(values) = result else {
                continue 'attempt; // a watched key changed mid-read; retry against a fresh snapshot
            };
            let mut values = values.into_iter();

            let raw_items: Vec<Option<String>> = if needed.is_empty() {
                values.next(); // discard the `EXISTS` probe used to keep the pipe non-empty
                Vec::new()
            } else {
                redis::from_redis_value(&values.next().expect("hget reply present")).map_err(redis_err)?
            };
            let total = if with_total {
                Some(
                    redis::from_redis_value::<u64>(&values.next().expect("zcard reply present"))
                        .map_err(redis_err)?,
                )
            } else {
                None
            };

            let mut items = Vec::with_capacity(needed.len());
            for raw in raw_items {
                // The index named this id a moment ago but its item body is
                // gone now (a concurrent delete/expiry raced us); retry
                // against a fresh snapshot rather than surfacing this as
                // corruption.
                let Some(raw) = raw else {
                    continue 'attempt;
                };
                items.push(Item::deserialize_from_store(&raw)?);
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
                let prev_block = match &resolved_since {
                    Some(r) if matches!(r.kind, algo::ResolvedKind::Time) && r.ts > 0 => {
                        self.prev_tie_block(&index_key, r.ts).await?
                    }
                    _ => None,
                };
                Some(empty_ascending_cursor_sync(
                    since_spec.as_ref(),
                    resolved_since.as_ref(),
                    &refs,
                    start,
                    prev_block,
                ))
            };

            return Ok(ItemsResult {
                items,
                total,
                last_cursor,
            });
        }
    }

    #[instrument(skip(self, data))]
    async fn add(
        &self,
        base: &str,
        data: serde_json::Value,
        id: Option<&str>,
        notify: bool,
    ) -> Result<AddOutcome, FeedError> {
        let items_key = items_key(base);
        let created_key = index_key(base, OrderKey::Created);
        let modified_key = index_key(base, OrderKey::Modified);
        let deleted_key = index_key(base, OrderKey::Deleted);

        loop {
            let mut conn = self.conn.clone();
            redis::cmd("WATCH")
                .arg(&items_key)
                .query_async::<()>(&mut conn)
                .await
                .map_err(redis_err)?;

            let existing: Option<String> = match id {
                Some(given) => conn.hget(&items_key, given).await.map_err(redis_err)?,
                None => None,
            };

            let now = chrono::Utc::now();
            let now = chrono::DateTime::from_timestamp(now.timestamp(), 0).expect("now is in range");
            let (item, is_new) = match (id, existing) {
                (Some(given), Some(raw)) => {
                    let prior = Item::deserialize_from_store(&raw)?;
                    (
                        Item {
                            id: given.to_owned(),
                            created: prior.created,
                            modified: now,
                            deleted: false,
                            data: data.clone(),
                        },
                        false,
                    )
                }
                (Some(given), None) => (
                    Item {
                        id: given.to_owned(),
                        created: now,
                        modified: now,
                        deleted: false,
                        data: data.clone(),
                    },
                    true,
                ),
                (None, _) => {
                    let mut candidate = Uuid::new_v4().to_string();
                    while conn.hexists(&items_key, &candidate).await.map_err(redis_err)? {
                        candidate = Uuid::new_v4().to_string();
                    }
                    (
                        Item {
                            id: candidate,
                            created: now,
                            modified: now,
                            deleted: false,
                            data: data.clone(),
                        },
                        true,
                    )
                }
            };

            let notify_id = notify.then(|| Uuid::new_v4().to_string());

            let mut pipe = redis::pipe();
            pipe.atomic()
                .hset(&items_key, &item.id, item.serialize_for_store())
                .ignore()
                .zadd(&created_key, &item.id, item.created_ts())
                .ignore()
                .zadd(&modified_key, &item.id, item.modified_ts())
                .ignore()
                .zrem(&deleted_key, &item.id)
                .ignore();
            if let Some(nid) = &notify_id {
                let slot = NotifySlot::new_initializing(nid.clone(), now.timestamp());
                let slot_json = serde_json::to_string(&slot).expect("notify slot always serializes");
                pipe.rpush(notify_list_key(base), nid).ignore();
                pipe.hset(notify_slots_key(base), nid, slot_json).ignore();
            }
            pipe.zrangebyscore(&created_key, item.created_ts(), item.created_ts());
            pipe.zrangebyscore(&modified_key, item.modified_ts(), item.modified_ts());

            let result: Option<(Vec<String>, Vec<String>)> = pipe.query_async(&mut conn).await.map_err(redis_err)?;
            let Some((created_tie, modified_tie)) = result else {
                continue; // WATCH aborted by a concurrent writer; retry the whole attempt
            };

            let created_pos = created_tie.iter().position(|x| x == &item.id).unwrap_or(0);
            let modified_pos = modified_tie.iter().position(|x| x == &item.id).unwrap_or(0);
            let cursor_created = is_new.then(|| make_cursor(item.created_ts(), created_pos, &created_tie));
            let cursor_modified = make_cursor(item.modified_ts(), modified_pos, &modified_tie);

            if let Some(nid) = &notify_id {
                self.promote_notify_slot(
                    base,
                    nid,
                    item.clone(),
                    cursor_created.clone(),
                    Some(cursor_modified.clone()),
                )
                .await?;
            }

            return Ok(AddOutcome {
                item,
                is_new,
                cursors: WriteCursors {
                    cursor_created,
                    cursor_modified,
                },
            });
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, base: &str, id: &str, notify: bool) -> Result<DeleteOutcome, FeedError> {
        let items_key = items_key(base);
        let modified_key = index_key(base, OrderKey::Modified);
        let deleted_key = index_key(base, OrderKey::Deleted);

        loop {
            let mut conn = self.conn.clone();
            redis::cmd("WATCH")
                .arg(&items_key)
                .query_async::<()>(&mut conn)
                .await
                .map_err(redis_err)?;

            let raw: Option<String> = conn.hget(&items_key, id).await.map_err(redis_err)?;
            let mut item = match raw {
                Some(raw) => Item::deserialize_from_store(&raw)?,
                None => return Err(FeedError::ItemDoesNotExist(id.to_owned())),
            };
            if item.deleted {
                return Err(FeedError::ItemDoesNotExist(id.to_owned()));
            }
            let now = chrono::Utc::now();
            let now = chrono::DateTime::from_timestamp(now.timestamp(), 0).expect("now is in range");
            item.modified = now;
            item.deleted = true;

            let notify_id = notify.then(|| Uuid::new_v4().to_string());

            let mut pipe = redis::pipe();
            pipe.atomic()
                .hset(&items_key, &item.id, item.serialize_for_store())
                .ignore()
                .zadd(&modified_key, &item.id, item.modified_ts())
                .ignore()
                .zadd(&deleted_key, &item.id, item.modified_ts())
                .ignore();
            if let Some(nid) = &notify_id {
                let slot = NotifySlot::new_initializing(nid.clone(), now.timestamp());
                let slot_json = serde_json::to_string(&slot).expect("notify slot always serializes");
                pipe.rpush(notify_list_key(base), nid).ignore();
                pipe.hset(notify_slots_key(base), nid, slot_json).ignore();
            }
            pipe.zrangebyscore(&modified_key, item.modified_ts(), item.modified_ts());

            let result: Option<(Vec<String>,)> = pipe.query_async(&mut conn).await.map_err(redis_err)?;
            let Some((modified_tie,)) = result else {
                continue;
            };

            let modified_pos = modified_tie.iter().position(|x| x == &item.id).unwrap_or(0);
            let cursor_modified = make_cursor(item.modified_ts(), modified_pos, &modified_tie);

            if let Some(nid) = &notify_id {
                self.promote_notify_slot(base, nid, item.clone(), None, Some(cursor_modified.clone()))
                    .await?;
            }

            return Ok(DeleteOutcome { item, cursor_modified });
        }
    }

    #[instrument(skip(self))]
    async fn clear_expired(&self, base: &str, ttl_seconds: i64, deleted: bool) -> Result<u64, FeedError> {
        let items_key = items_key(base);
        let created_key = index_key(base, OrderKey::Created);
        let modified_key = index_key(base, OrderKey::Modified);
        let deleted_key = index_key(base, OrderKey::Deleted);
        let scan_key = if deleted { &deleted_key } else { &modified_key };
        let cutoff = chrono::Utc::now().timestamp() - ttl_seconds - 1;

        loop {
            let mut conn = self.conn.clone();
            redis::cmd("WATCH")
                .arg(&items_key)
                .arg(&created_key)
                .arg(&modified_key)
                .arg(&deleted_key)
                .query_async::<()>(&mut conn)
                .await
                .map_err(redis_err)?;

            let victims: Vec<String> = conn.zrangebyscore(scan_key, i64::MIN, cutoff).await.map_err(redis_err)?;
            if victims.is_empty() {
                redis::cmd("UNWATCH").query_async::<()>(&mut conn).await.map_err(redis_err)?;
                return Ok(0);
            }

            let mut pipe = redis::pipe();
            pipe.atomic();
            for id in &victims {
                pipe.hdel(&items_key, id).ignore();
                pipe.zrem(&created_key, id).ignore();
                pipe.zrem(&modified_key, id).ignore();
                pipe.zrem(&deleted_key, id).ignore();
            }
            pipe.exists(&items_key);

            let result: Option<(bool,)> = pipe.query_async(&mut conn).await.map_err(redis_err)?;
            if result.is_none() {
                continue; // a watched key changed mid-scan; retry against a fresh snapshot
            }
            return Ok(victims.len() as u64);
        }
    }

    async fn peek_notify_head(&self, base: &str) -> Result<Option<NotifySlot>, FeedError> {
        let mut conn = self.conn.clone();
        let head: Option<String> = conn.lindex(notify_list_key(base), 0).await.map_err(redis_err)?;
        let Some(notify_id) = head else {
            return Ok(None);
        };
        let raw: Option<String> = conn.hget(notify_slots_key(base), &notify_id).await.map_err(redis_err)?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(|e| FeedError::DataCorruption(e.to_string())))
            .transpose()
    }

    async fn promote_notify_slot(
        &self,
        base: &str,
        notify_id: &str,
        item: Item,
        cursor_created: Option<String>,
        cursor_modified: Option<String>,
    ) -> Result<(), FeedError> {
        let mut conn = self.conn.clone();
        let existing: Option<String> = conn.hget(notify_slots_key(base), notify_id).await.map_err(redis_err)?;
        let Some(existing) = existing else {
            return Ok(()); // already reclaimed as stale; silent no-op per spec §4.4
        };
        let mut slot: NotifySlot =
            serde_json::from_str(&existing).map_err(|e| FeedError::DataCorruption(e.to_string()))?;
        slot.state = NotifyState::Pending;
        slot.item = Some(item);
        slot.cursor_created = cursor_created;
        slot.cursor_modified = cursor_modified;
        let slot_json = serde_json::to_string(&slot).expect("notify slot always serializes");
        let _: () = conn
            .hset(notify_slots_key(base), notify_id, slot_json)
            .await
            .map_err(redis_err)?;
        Ok(())
    }

    async fn commit_notify_head(
        &self,
        base: &str,
        notify_id: &str,
        advance_created: Option<&str>,
        advance_modified: Option<&str>,
    ) -> Result<(Option<String>, Option<String>), FeedError> {
        let mut conn = self.conn.clone();
        let head: Option<String> = conn.lindex(notify_list_key(base), 0).await.map_err(redis_err)?;
        if head.as_deref() != Some(notify_id) {
            return Err(FeedError::DataCorruption(format!(
                "commit_notify_head called for '{notify_id}' which is not the FIFO head"
            )));
        }
        let prev_created: Option<String> = conn.get(lastpub_key(base, OrderKey::Created)).await.map_err(redis_err)?;
        let prev_modified: Option<String> = conn
            .get(lastpub_key(base, OrderKey::Modified))
            .await
            .map_err(redis_err)?;

        let mut pipe = redis::pipe();
        pipe.atomic().lpop(notify_list_key(base), None).ignore();
        pipe.hdel(notify_slots_key(base), notify_id).ignore();
        if let Some(c) = advance_created {
            pipe.set(lastpub_key(base, OrderKey::Created), c).ignore();
        }
        if let Some(c) = advance_modified {
            pipe.set(lastpub_key(base, OrderKey::Modified), c).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await.map_err(redis_err)?;
        Ok((prev_created, prev_modified))
    }

    async fn reclaim_notify_head(&self, base: &str, notify_id: &str) -> Result<(), FeedError> {
        let mut conn = self.conn.clone();
        let head: Option<String> = conn.lindex(notify_list_key(base), 0).await.map_err(redis_err)?;
        if head.as_deref() == Some(notify_id) {
            let _: Option<String> = conn.lpop(notify_list_key(base), None).await.map_err(redis_err)?;
        } else {
            warn!(notify_id, "reclaim_notify_head called but slot was no longer the FIFO head");
        }
        let _: () = conn.hdel(notify_slots_key(base), notify_id).await.map_err(redis_err)?;
        Ok(())
    }
}
