//! Error taxonomy for the feed engine (spec §7).
//!
//! `WatchError` (optimistic-transaction conflict) is deliberately **not**
//! part of this enum -- it's handled internally by unbounded retry inside
//! [`crate::store`] and never escapes to a caller.

#[derive(Debug)]
pub enum FeedError {
    /// A position spec or cursor token could not be parsed.
    InvalidSpec(String),
    /// A position spec named a type this engine doesn't support.
    UnsupportedSpec(String),
    /// `since`/`until` specs disagree in a way that can't be reconciled.
    SpecMismatch(String),
    /// The requested feed base has no data and the operation requires one.
    FeedDoesNotExist(String),
    /// The requested item id doesn't exist (or is already a tombstone).
    ItemDoesNotExist(String),
    /// An id component failed the identifier codec's escaping rules.
    BadEncoding(String),
    /// A stored item or notify slot could not be deserialized.
    DataCorruption(String),
    /// The backing store (or an async publisher call) failed at the
    /// transport level.
    TransportError(String),
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedError::InvalidSpec(s) => write!(f, "invalid spec: {s}"),
            FeedError::UnsupportedSpec(s) => write!(f, "unsupported spec: {s}"),
            FeedError::SpecMismatch(s) => write!(f, "spec mismatch: {s}"),
            FeedError::FeedDoesNotExist(s) => write!(f, "feed does not exist: {s}"),
            FeedError::ItemDoesNotExist(s) => write!(f, "item does not exist: {s}"),
            FeedError::BadEncoding(s) => write!(f, "bad encoding: {s}"),
            FeedError::DataCorruption(s) => write!(f, "data corruption: {s}"),
            FeedError::TransportError(s) => write!(f, "transport error: {s}"),
        }
    }
}

impl std::error::Error for FeedError {}

impl From<crate::identcodec::BadEncoding> for FeedError {
    fn from(e: crate::identcodec::BadEncoding) -> Self {
        FeedError::BadEncoding(e.0)
    }
}

impl From<feed_protocol::DataCorruption> for FeedError {
    fn from(e: feed_protocol::DataCorruption) -> Self {
        FeedError::DataCorruption(e.0)
    }
}
