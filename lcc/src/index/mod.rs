//! Build, persist, and load searchable indices over recently buffered hash records.
//!
//! # Overview
//!
//! The [Builder] scans the buckets of a record type over a trailing `lookback` (via
//! [crate::bucket::Buckets::read_range]) and constructs an [Index] from every decoded record. The
//! [Repository] persists each index as an immutable, timestamped snapshot and loads the most recent
//! one for readers. The [Indexer] ties the two together, rebuilding and publishing on a fixed
//! interval.
//!
//! # Rebuild Range
//!
//! A rebuild at time `now` reads every bucket whose window starts in
//! `[now - lookback, start of the window containing now)`. The window that is still open is never
//! included, so an index never contains a partially-written window.
//!
//! # Duplicates
//!
//! Records are indexed in scan order and duplicate `(hash, content_id)` pairs are kept (a query
//! returns each occurrence).
//!
//! # Snapshots
//!
//! Snapshots are stored at `<record_type>/index/<created_at>.idx`, where `created_at` is the
//! publication time in milliseconds since the Unix epoch (zero-padded to 20 digits). If a snapshot
//! with the same timestamp already exists, a `-<n>` suffix is appended rather than overwriting it.
//! The snapshot format is versioned (see [snapshot]) so that incompatible snapshots are rejected
//! cleanly at load time.

use crate::{bucket, record::HashRecord, store};
use commonware_utils::from_hex;
use std::{collections::HashMap, path::PathBuf, time::Duration};
use thiserror::Error;

mod builder;
pub use builder::{Builder, Config as BuilderConfig, DEFAULT_LOOKBACK};
mod indexer;
pub use indexer::{Config as IndexerConfig, Indexer, Phase, Published};
mod metrics;
mod repository;
pub use repository::Repository;
pub mod snapshot;
pub use snapshot::Snapshot;

/// Default Hamming distance threshold for perceptual hash matches.
pub const DEFAULT_THRESHOLD: u32 = 31;

/// Errors that can occur when building, publishing, or loading an index.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no snapshot found for record type: {0}")]
    NotFound(String),
    #[error("snapshot corrupt: {0}: {1}")]
    CorruptSnapshot(PathBuf, snapshot::Error),
    #[error("snapshot version unsupported: {0}: {1}")]
    UnsupportedVersion(PathBuf, u16),
    #[error("snapshot timestamp mismatch: {0} embeds {1}")]
    TimestampMismatch(PathBuf, u64),
    #[error("snapshot record type mismatch: {0} embeds {1}")]
    RecordTypeMismatch(PathBuf, String),
    #[error("snapshot names exhausted for timestamp: {0}")]
    NamesExhausted(u64),
    #[error("lookback {0:?} must be at least twice the bucket width {1:?}")]
    InvalidLookback(Duration, Duration),
    #[error("interval must be non-zero")]
    InvalidInterval,
    #[error("bucket error: {0}")]
    Bucket(#[from] bucket::Error),
    #[error("store error: {0}")]
    Store(#[from] store::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Entry {
    record: HashRecord,

    /// Decoded hash bits (if the hash is hex-encoded).
    bits: Option<Vec<u8>>,
}

/// A match returned by [Index::query].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Match<'a> {
    /// The indexed hash.
    pub hash: &'a str,

    /// The content the indexed hash was computed from.
    pub content_id: &'a str,

    /// Hamming distance between the query and the indexed hash (zero for exact matches).
    pub distance: u32,
}

/// A searchable collection of `(hash, content_id)` entries.
///
/// Hashes are matched exactly with [Index::lookup]. Hex-encoded hashes (such as PDQ) can also be
/// matched by Hamming distance with [Index::query]; hashes that are not hex-encoded only ever
/// match exactly.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Index {
    entries: Vec<Entry>,
    exact: HashMap<String, Vec<usize>>,
}

impl Index {
    /// Build an [Index] from `records` (preserving their order).
    ///
    /// An empty iterator produces a valid, empty index.
    pub fn build(records: impl IntoIterator<Item = HashRecord>) -> Self {
        let mut index = Self::default();
        for record in records {
            index.insert(record);
        }
        index
    }

    fn insert(&mut self, record: HashRecord) {
        let position = self.entries.len();
        self.exact
            .entry(record.hash().to_string())
            .or_default()
            .push(position);
        let bits = decode_bits(record.hash());
        self.entries.push(Entry { record, bits });
    }

    /// Number of entries (including duplicates).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the index has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all indexed records in insertion order.
    pub fn records(&self) -> impl Iterator<Item = &HashRecord> {
        self.entries.iter().map(|entry| &entry.record)
    }

    /// Return the content ids of every entry whose hash equals `hash`.
    pub fn lookup(&self, hash: &str) -> Vec<&str> {
        self.exact
            .get(hash)
            .map(|positions| {
                positions
                    .iter()
                    .map(|position| self.entries[*position].record.content_id())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Return every entry within `threshold` bits of `hash`, closest first.
    ///
    /// Entries at the same distance are returned in insertion order.
    pub fn query(&self, hash: &str, threshold: u32) -> Vec<Match<'_>> {
        let Some(query) = decode_bits(hash) else {
            return self
                .exact
                .get(hash)
                .into_iter()
                .flatten()
                .map(|position| self.matched(*position, 0))
                .collect();
        };

        let mut matches: Vec<_> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(position, entry)| {
                let bits = entry.bits.as_ref()?;
                let distance = hamming(&query, bits)?;
                (distance <= threshold).then(|| self.matched(position, distance))
            })
            .collect();
        matches.sort_by_key(|m| m.distance);
        matches
    }

    fn matched(&self, position: usize, distance: u32) -> Match<'_> {
        let record = &self.entries[position].record;
        Match {
            hash: record.hash(),
            content_id: record.content_id(),
            distance,
        }
    }
}

/// Decode a hex-encoded hash into bits.
fn decode_bits(hash: &str) -> Option<Vec<u8>> {
    if !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    from_hex(&hash.to_ascii_lowercase())
}

/// Number of differing bits between two equal-length values.
fn hamming(a: &[u8], b: &[u8]) -> Option<u32> {
    if a.len() != b.len() {
        return None;
    }
    Some(a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum())
}
