//! Pure pagination/trim/cursor math shared by every `Store` backend.
//!
//! Mirrors the teacher's convention (see `repo::reads::apply_dedup` /
//! `paginate`) of keeping the parts of a query pipeline that don't touch
//! the backend as small, directly unit-tested functions: a backend fetches
//! a window of `(id, score)` pairs however it likes, then hands it here.

use crate::cursor::{calc_toc_checksum, make_cursor, parse_cursor, PositionSpec};
use crate::error::FeedError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedKind {
    Id(String),
    Time,
    Cursor(String),
}

/// A position spec resolved to a numeric timestamp (plus offset/crc for
/// cursors), ready to bound a range query and trim its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSpec {
    pub kind: ResolvedKind,
    pub ts: i64,
    pub offset: Option<usize>,
    pub crc: Option<String>,
}

/// Resolves a parsed [`PositionSpec`] to `(ts, offset, crc)` (spec §4.3.1
/// step 2). `lookup_id_score` looks up a member's score in the order index
/// in play; used only for `PositionSpec::Id`.
pub fn resolve_spec(
    spec: &PositionSpec,
    lookup_id_score: &dyn Fn(&str) -> Option<i64>,
) -> Result<ResolvedSpec, FeedError> {
    match spec {
        PositionSpec::Id(id) => {
            let ts = lookup_id_score(id)
                .ok_or_else(|| FeedError::InvalidSpec(format!("id '{id}' not found in index")))?;
            Ok(ResolvedSpec {
                kind: ResolvedKind::Id(id.clone()),
                ts,
                offset: None,
                crc: None,
            })
        }
        PositionSpec::Time(t) => Ok(ResolvedSpec {
            kind: ResolvedKind::Time,
            ts: parse_iso_utc_seconds(t)?,
            offset: None,
            crc: None,
        }),
        PositionSpec::Cursor(token) => {
            let parts = parse_cursor(token)?;
            Ok(ResolvedSpec {
                kind: ResolvedKind::Cursor(token.clone()),
                ts: parts.ts,
                offset: parts.offset,
                crc: parts.crc,
            })
        }
        PositionSpec::Other { kind, .. } => Err(FeedError::UnsupportedSpec(format!(
            "position spec not supported: {kind}"
        ))),
    }
}

/// Parses `YYYY-MM-DDTHH:MM:SS` as a UTC instant.
pub fn parse_iso_utc_seconds(s: &str) -> Result<i64, FeedError> {
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| naive.and_utc().timestamp())
        .map_err(|e| FeedError::InvalidSpec(format!("bad time spec '{s}': {e}")))
}

/// Finds the start index of the trailing contiguous run of `score` in
/// `refs` (spec's `_ref_rfind_first_score`). `refs` must be non-empty and
/// its last element must carry `score` for the "tie-block at the tail"
/// callers to get a meaningful answer.
#[must_use]
pub fn rfind_first_score(refs: &[(String, i64)], score: i64) -> usize {
    let mut idx = refs.len();
    for (i, (_, s)) in refs.iter().enumerate().rev() {
        if *s == score {
            idx = i;
        } else {
            break;
        }
    }
    idx.min(refs.len().saturating_sub(1))
}

/// Trims a fetched window by `since`/`until` (spec §4.3.1 step 4).
///
/// `refs` must already be ordered the way the feed is being traversed
/// (ascending for an ascending feed, descending for a descending one) --
/// `since` always trims from the front of that order, `until` from the
/// back, regardless of direction.
///
/// On a cursor whose CRC no longer matches the live tie-block, trimming on
/// that side silently degrades to plain time-bound behavior (no extra
/// trim) rather than failing -- this *is* the cursor-to-time fallback
/// (spec §4.3.2): because the range query already used `ts` as its bound,
/// no re-fetch is needed to realize the fallback.
pub fn trim_window(
    refs: &[(String, i64)],
    since: Option<&ResolvedSpec>,
    until: Option<&ResolvedSpec>,
) -> Result<(usize, usize), FeedError> {
    let mut start = 0usize;
    let mut end = refs.len();

    if let Some(s) = since {
        match &s.kind {
            ResolvedKind::Id(id) => {
                let at = refs
                    .iter()
                    .position(|(rid, rts)| rid == id && *rts == s.ts)
                    .ok_or_else(|| {
                        FeedError::InvalidSpec(format!(
                            "since id '{id}' is no longer present in the index"
                        ))
                    })?;
                start = at + 1;
            }
            ResolvedKind::Cursor(_) => {
                if let Some((_, first_ts)) = refs.first() {
                    if *first_ts == s.ts {
                        let offset = s.offset.unwrap_or(0);
                        let ids: Vec<&str> = refs
                            .iter()
                            .take(offset + 1)
                            .map(|(id, _)| id.as_str())
                            .collect();
                        if calc_toc_checksum(&ids) == s.crc.clone().unwrap_or_default() {
                            start = offset + 1;
                        }
                        // mismatch: fall back to time-only bound, start stays 0
                    }
                }
            }
            ResolvedKind::Time => {}
        }
    }

    if let Some(u) = until {
        match &u.kind {
            ResolvedKind::Id(id) => {
                let at = refs
                    .iter()
                    .rposition(|(rid, rts)| rid == id && *rts == u.ts)
                    .ok_or_else(|| {
                        FeedError::InvalidSpec(format!(
                            "until id '{id}' is no longer present in the index"
                        ))
                    })?;
                end = at;
            }
            ResolvedKind::Cursor(_) => {
                if let Some((_, last_ts)) = refs.last() {
                    if *last_ts == u.ts {
                        let at = rfind_first_score(refs, u.ts);
                        let offset = u.offset.unwrap_or(0);
                        let ids: Vec<&str> = refs[at..]
                            .iter()
                            .take(offset + 1)
                            .map(|(id, _)| id.as_str())
                            .collect();
                        if calc_toc_checksum(&ids) == u.crc.clone().unwrap_or_default() {
                            end = at + offset;
                        }
                    }
                }
            }
            ResolvedKind::Time => {}
        }
    }

    Ok((start, end))
}

/// Computes `last_cursor` for a non-empty window (spec §4.3.1 step 8).
/// `window` is the already-trimmed, already-direction-ordered slice
/// actually being returned.
#[must_use]
pub fn non_empty_last_cursor(window: &[(String, i64)]) -> String {
    debug_assert!(!window.is_empty());
    let last_ts = window.last().expect("non-empty").1;
    let first = rfind_first_score(window, last_ts);
    let ids: Vec<&str> = window[first..].iter().map(|(id, _)| id.as_str()).collect();
    let offset = window.len() - first - 1;
    make_cursor(last_ts, offset, &ids)
}
