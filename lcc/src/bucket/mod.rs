//! Group records into fixed-width time windows and persist them as append-only bucket files.
//!
//! # Layout
//!
//! Every bucket is identified by a [Key]: the record type, the start of the window the records
//! were buffered in, and the identity of the writer that produced them. Keys map to paths of the
//! form:
//!
//! ```txt
//! <record_type>/<year>/<month>/<day>/<hour>/<minute>/<writer_id>.csv
//! ```
//!
//! Date components are taken from the window start (in UTC) and are not zero-padded. Because
//! windows are at least one minute wide, distinct windows always start in distinct minutes and so
//! distinct keys never share a path.
//!
//! # Windows
//!
//! Windows are aligned to the Unix epoch: the window containing `now` starts at
//! `now - ((now - epoch) mod bucket_width)` and ends `bucket_width` later (exclusive).
//!
//! # Writers
//!
//! Each [Bucketizer] buffers records in memory and flushes them to the bucket for its current
//! window when the buffer reaches a high-water mark or the window ends. Concurrent writers must be
//! configured with distinct writer ids: isolation comes from partitioning storage per writer, not
//! from locking.
//!
//! # Example
//!
//! ```rust
//! use commonware_runtime::{deterministic, Runner};
//! use lcc::{bucket::{Bucketizer, Config}, record::HashRecord, store::Memory};
//! use std::time::Duration;
//!
//! let executor = deterministic::Runner::default();
//! executor.start(|context| async move {
//!     let cfg = Config {
//!         record_type: "pdq_hashes".into(),
//!         writer_id: "worker-1".into(),
//!         bucket_width: Duration::from_secs(300),
//!         high_water_mark: 100,
//!     };
//!     let mut bucketizer = Bucketizer::new(context, Memory::default(), cfg).unwrap();
//!     let record = HashRecord::new("f8f8f0cee0f4a84f06370a22038f63f0", "photo-1").unwrap();
//!     bucketizer.add_record(record).await.unwrap();
//!
//!     // Flush anything still buffered
//!     bucketizer.close().await.unwrap();
//! });
//! ```

use crate::{record, store};
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::{
    path::PathBuf,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use thiserror::Error;

mod buckets;
pub use buckets::{Buckets, Scan};
mod bucketizer;
pub use bucketizer::Bucketizer;
mod metrics;

/// Extension of bucket files.
pub const EXTENSION: &str = "csv";

/// The narrowest permitted bucket width.
pub const MIN_BUCKET_WIDTH: Duration = Duration::from_secs(60);

/// Default number of buffered records that triggers a flush.
pub const DEFAULT_HIGH_WATER_MARK: usize = 100;

/// Errors that can occur when interacting with buckets.
#[derive(Debug, Error)]
pub enum Error {
    #[error("bucket width must be at least one minute: {0:?}")]
    BucketWidthTooSmall(Duration),
    #[error("record type invalid, must be non-empty and only contain alphanumeric, dash ('-'), or underscore ('_') characters: {0}")]
    InvalidRecordType(String),
    #[error("writer id invalid, must be non-empty and only contain alphanumeric, dash ('-'), or underscore ('_') characters: {0}")]
    InvalidWriterId(String),
    #[error("high-water mark must be at least one")]
    InvalidHighWaterMark,
    #[error("bucket is not valid utf-8: {0}")]
    InvalidUtf8(PathBuf),
    #[error("bucket row invalid: {0} line {1}: {2}")]
    InvalidRow(PathBuf, usize, record::Error),
    #[error("time before epoch")]
    TimeBeforeEpoch,
    #[error("store error: {0}")]
    Store(#[from] store::Error),
}

/// Configuration for a [Bucketizer].
#[derive(Clone, Debug)]
pub struct Config {
    /// The type of records written (for example `pdq_hashes`). Used as the top-level directory.
    pub record_type: String,

    /// Identity of the writer, unique among all writers sharing the same storage.
    pub writer_id: String,

    /// Width of each time window. Must be at least [MIN_BUCKET_WIDTH].
    pub bucket_width: Duration,

    /// Number of buffered records that triggers a flush before the next record is added.
    pub high_water_mark: usize,
}

impl Config {
    /// Ensure the configuration can be used to write buckets.
    pub fn validate(&self) -> Result<(), Error> {
        validate_bucket_width(self.bucket_width)?;
        validate_record_type(&self.record_type)?;
        if !valid_name(&self.writer_id) {
            return Err(Error::InvalidWriterId(self.writer_id.clone()));
        }
        if self.high_water_mark == 0 {
            return Err(Error::InvalidHighWaterMark);
        }
        Ok(())
    }
}

/// Identifies the bucket written by one writer during one window.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    pub record_type: String,
    pub window_start: SystemTime,
    pub writer_id: String,
}

impl Key {
    /// The path of this bucket relative to the storage root.
    pub fn path(&self) -> Result<PathBuf, Error> {
        Ok(bucket_dir(&self.record_type, self.window_start)?
            .join(format!("{}.{EXTENSION}", self.writer_id)))
    }
}

/// A half-open interval `[start, end)` of time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub start: SystemTime,
    pub end: SystemTime,
}

impl Window {
    /// Return the epoch-aligned window of width `width` containing `now`.
    pub fn containing(now: SystemTime, width: Duration) -> Result<Self, Error> {
        let start = align_down(now, width)?;
        Ok(Self {
            start,
            end: start + width,
        })
    }

    /// Returns true if `time` falls within this window.
    pub fn contains(&self, time: SystemTime) -> bool {
        self.start <= time && time < self.end
    }
}

/// Return the start of the epoch-aligned window of width `width` containing `time`.
pub fn align_down(time: SystemTime, width: Duration) -> Result<SystemTime, Error> {
    let since = time
        .duration_since(UNIX_EPOCH)
        .map_err(|_| Error::TimeBeforeEpoch)?;
    let width = width.as_nanos();
    if width == 0 {
        return Err(Error::BucketWidthTooSmall(Duration::ZERO));
    }
    let since = since.as_nanos();
    Ok(UNIX_EPOCH + nanos(since - since % width))
}

/// Return the start of the first epoch-aligned window of width `width` starting at or after `time`.
pub fn align_up(time: SystemTime, width: Duration) -> Result<SystemTime, Error> {
    let start = align_down(time, width)?;
    if start == time {
        return Ok(start);
    }
    Ok(start + width)
}

fn nanos(value: u128) -> Duration {
    const NANOS_PER_SEC: u128 = 1_000_000_000;
    Duration::new(
        (value / NANOS_PER_SEC) as u64,
        (value % NANOS_PER_SEC) as u32,
    )
}

/// The directory holding every writer's bucket for the window starting at `window_start`.
pub fn bucket_dir(record_type: &str, window_start: SystemTime) -> Result<PathBuf, Error> {
    if window_start < UNIX_EPOCH {
        return Err(Error::TimeBeforeEpoch);
    }
    let time: DateTime<Utc> = window_start.into();
    Ok(PathBuf::from(record_type)
        .join(time.year().to_string())
        .join(time.month().to_string())
        .join(time.day().to_string())
        .join(time.hour().to_string())
        .join(time.minute().to_string()))
}

pub(crate) fn validate_bucket_width(width: Duration) -> Result<(), Error> {
    if width < MIN_BUCKET_WIDTH {
        return Err(Error::BucketWidthTooSmall(width));
    }
    Ok(())
}

pub(crate) fn validate_record_type(record_type: &str) -> Result<(), Error> {
    if !valid_name(record_type) {
        return Err(Error::InvalidRecordType(record_type.into()));
    }
    Ok(())
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_window_alignment() {
        let width = Duration::from_secs(300);
        let window = Window::containing(at(1_644_353_340), width).unwrap();
        assert_eq!(window.start, at(1_644_353_100));
        assert_eq!(window.end, at(1_644_353_400));
        assert!(window.contains(at(1_644_353_340)));
        assert!(window.contains(window.start));
        assert!(!window.contains(window.end));
    }

    #[test]
    fn test_window_contains_now_for_many_widths() {
        for width in [60, 61, 90, 300, 600, 3600, 86_400, 100_003] {
            let width = Duration::from_secs(width);
            for now in [0, 1, 59, 60, 1_000, 1_644_353_340, 1_700_000_000] {
                let now = at(now) + Duration::from_millis(250);
                let window = Window::containing(now, width).unwrap();
                assert!(window.start <= now && now < window.end);
                assert_eq!(window.end.duration_since(window.start).unwrap(), width);
            }
        }
    }

    #[test]
    fn test_align_up() {
        let width = Duration::from_secs(60);
        assert_eq!(align_up(at(120), width).unwrap(), at(120));
        assert_eq!(align_up(at(121), width).unwrap(), at(180));
        assert_eq!(align_down(at(179), width).unwrap(), at(120));
    }

    #[test]
    fn test_before_epoch() {
        let before = UNIX_EPOCH - Duration::from_secs(1);
        assert!(matches!(
            Window::containing(before, MIN_BUCKET_WIDTH),
            Err(Error::TimeBeforeEpoch)
        ));
        assert!(matches!(
            bucket_dir("pdq", before),
            Err(Error::TimeBeforeEpoch)
        ));
    }

    #[test]
    fn test_bucket_path() {
        // 2022-02-08 20:45:00 UTC
        let key = Key {
            record_type: "pdq_hashes".into(),
            window_start: at(1_644_353_100),
            writer_id: "worker-1".into(),
        };
        assert_eq!(
            key.path().unwrap(),
            PathBuf::from("pdq_hashes/2022/2/8/20/45/worker-1.csv")
        );
    }

    #[test]
    fn test_distinct_windows_distinct_dirs() {
        // 90 second windows never start in the same minute
        let width = Duration::from_secs(90);
        let mut dirs = std::collections::HashSet::new();
        for i in 0..1_000 {
            let start = UNIX_EPOCH + width * i;
            assert!(dirs.insert(bucket_dir("pdq", start).unwrap()));
        }
    }

    fn config() -> Config {
        Config {
            record_type: "pdq_hashes".into(),
            writer_id: "worker-1".into(),
            bucket_width: Duration::from_secs(300),
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
        }
    }

    #[test]
    fn test_config_valid() {
        config().validate().unwrap();
        let mut cfg = config();
        cfg.bucket_width = MIN_BUCKET_WIDTH;
        cfg.validate().unwrap();
    }

    #[test_case(Duration::from_secs(59); "just under a minute")]
    #[test_case(Duration::from_millis(59_999); "a millisecond under")]
    #[test_case(Duration::ZERO; "zero")]
    fn test_config_rejects_narrow_width(width: Duration) {
        let mut cfg = config();
        cfg.bucket_width = width;
        assert!(matches!(
            cfg.validate(),
            Err(Error::BucketWidthTooSmall(w)) if w == width
        ));
    }

    #[test_case(""; "empty")]
    #[test_case("a/b"; "separator")]
    #[test_case(".."; "parent")]
    #[test_case("id with space"; "space")]
    fn test_config_rejects_writer_id(writer_id: &str) {
        let mut cfg = config();
        cfg.writer_id = writer_id.into();
        assert!(matches!(cfg.validate(), Err(Error::InvalidWriterId(_))));
    }

    #[test_case(""; "empty")]
    #[test_case("pdq/hashes"; "separator")]
    fn test_config_rejects_record_type(record_type: &str) {
        let mut cfg = config();
        cfg.record_type = record_type.into();
        assert!(matches!(cfg.validate(), Err(Error::InvalidRecordType(_))));
    }

    #[test]
    fn test_config_rejects_zero_high_water_mark() {
        let mut cfg = config();
        cfg.high_water_mark = 0;
        assert!(matches!(cfg.validate(), Err(Error::InvalidHighWaterMark)));
    }
}
