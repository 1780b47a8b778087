//! Position specs and cursor tokens (spec §4.2).
//!
//! A cursor is `"<unix_seconds>_<offset>_<crc32>"`, identifying a specific
//! position inside a tie-block (items sharing the same index score). The
//! CRC is over the underscore-joined id prefix up to and including that
//! offset, so any structural change to the tie-block (insert/delete/
//! reorder) is detected and forces the storage engine to fall back to a
//! plain time query (§4.3.2).

use crate::error::FeedError;

/// Parsed `since`/`until` query value: `<type>:<value>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionSpec {
    Id(String),
    Time(String),
    Cursor(String),
    /// A spec type this engine declines to interpret (`UnsupportedSpecError`).
    Other { kind: String, value: String },
}

impl PositionSpec {
    /// Splits on the *first* `:`; at least one character of type is
    /// required before it.
    pub fn parse(spec: &str) -> Result<Self, FeedError> {
        let at = spec.find(':');
        match at {
            Some(0) | None => Err(FeedError::InvalidSpec(format!(
                "missing type in spec '{spec}'"
            ))),
            Some(at) => {
                let kind = &spec[..at];
                let value = &spec[at + 1..];
                Ok(match kind {
                    "id" => PositionSpec::Id(value.to_owned()),
                    "time" => PositionSpec::Time(value.to_owned()),
                    "cursor" => PositionSpec::Cursor(value.to_owned()),
                    other => PositionSpec::Other {
                        kind: other.to_owned(),
                        value: value.to_owned(),
                    },
                })
            }
        }
    }
}

/// The decoded parts of a cursor token: `(timestamp, offset, crc)`.
///
/// `offset`/`crc` are `None` for the empty-cursor sentinel (`ts = 0`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorParts {
    pub ts: i64,
    pub offset: Option<usize>,
    pub crc: Option<String>,
}

impl CursorParts {
    #[must_use]
    pub const fn sentinel() -> Self {
        CursorParts {
            ts: 0,
            offset: None,
            crc: None,
        }
    }
}

/// Computes `CRC32("id0_id1_..._idN") & 0xffffffff` as a decimal string.
#[must_use]
pub fn calc_toc_checksum<I, S>(item_ids: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined = item_ids
        .into_iter()
        .map(|s| s.as_ref().to_owned())
        .collect::<Vec<_>>()
        .join("_");
    crc32fast::hash(joined.as_bytes()).to_string()
}

/// Formats `"<timestamp>_<offset>_<crc>"` over the ids up to and including
/// `offset` in `item_ids`.
#[must_use]
pub fn make_cursor<S: AsRef<str>>(timestamp: i64, offset: usize, item_ids: &[S]) -> String {
    let checksum = calc_toc_checksum(item_ids);
    format!("{timestamp}_{offset}_{checksum}")
}

/// Parses a cursor token. The empty string is the sentinel meaning "no
/// prior position" and parses to `(0, None, None)`.
pub fn parse_cursor(token: &str) -> Result<CursorParts, FeedError> {
    if token.is_empty() {
        return Ok(CursorParts::sentinel());
    }
    let parts: Vec<&str> = token.split('_').collect();
    let [ts_str, offset_str, crc] = parts.as_slice() else {
        return Err(FeedError::InvalidSpec(format!(
            "bad cursor format: '{token}'"
        )));
    };
    let ts: i64 = ts_str
        .parse()
        .map_err(|_| FeedError::InvalidSpec(format!("bad cursor timestamp in '{token}'")))?;
    let offset: usize = offset_str
        .parse()
        .map_err(|_| FeedError::InvalidSpec(format!("bad cursor offset in '{token}'")))?;
    if ts < 0 {
        return Err(FeedError::InvalidSpec(format!(
            "negative cursor timestamp in '{token}'"
        )));
    }
    Ok(CursorParts {
        ts,
        offset: Some(offset),
        crc: Some((*crc).to_owned()),
    })
}
