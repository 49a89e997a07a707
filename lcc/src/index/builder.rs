use super::{Error, Index};
use crate::{
    bucket::{self, Buckets, Scan, Window},
    record::HashRecord,
    store::Store,
};
use commonware_runtime::Clock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Configuration for a [Builder].
#[derive(Clone, Debug)]
pub struct Config {
    /// The type of records to index.
    pub record_type: String,

    /// The width of the windows the records were bucketed with.
    pub bucket_width: Duration,

    /// How far back (from now) to read buckets.
    ///
    /// Must be at least twice `bucket_width` so that every rebuild covers at least one closed
    /// window.
    pub lookback: Duration,
}

/// Default lookback of a rebuild.
pub const DEFAULT_LOOKBACK: Duration = Duration::from_secs(24 * 60 * 60);

/// Builds an [Index] from the buckets of a record type over a trailing lookback.
#[derive(Clone)]
pub struct Builder<E: Clock, S: Store> {
    context: E,
    buckets: Buckets<S>,
    cfg: Config,
}

impl<E: Clock, S: Store> Builder<E, S> {
    /// Create a new [Builder] reading buckets from `store`.
    pub fn new(context: E, store: S, cfg: Config) -> Result<Self, Error> {
        bucket::validate_bucket_width(cfg.bucket_width)?;
        bucket::validate_record_type(&cfg.record_type)?;
        if cfg.lookback < cfg.bucket_width.saturating_mul(2) {
            return Err(Error::InvalidLookback(cfg.lookback, cfg.bucket_width));
        }
        Ok(Self {
            context,
            buckets: Buckets::new(store),
            cfg,
        })
    }

    /// The type of records indexed.
    pub fn record_type(&self) -> &str {
        &self.cfg.record_type
    }

    /// Return the range of window starts a rebuild would read at the current time.
    ///
    /// The range ends at the start of the window that is still open.
    pub fn range(&self) -> Result<(SystemTime, SystemTime), Error> {
        let now = self.context.current();
        let end = Window::containing(now, self.cfg.bucket_width)?.start;
        let start = now
            .checked_sub(self.cfg.lookback)
            .map_or(UNIX_EPOCH, |start| start.max(UNIX_EPOCH));
        Ok((start, end))
    }

    /// Read every record in range (skipping unreadable buckets).
    pub async fn scan(&self) -> Result<Scan<HashRecord>, Error> {
        let (start, end) = self.range()?;
        let scan = self
            .buckets
            .read_range(&self.cfg.record_type, start, end, self.cfg.bucket_width)
            .await?;
        debug!(
            record_type = %self.cfg.record_type,
            buckets = scan.buckets.len(),
            skipped = scan.skipped.len(),
            records = scan.records.len(),
            "scanned buckets"
        );
        Ok(scan)
    }

    /// Scan all buckets in range and build a fresh [Index] from their records.
    ///
    /// If there are no buckets in range, an empty index is returned.
    pub async fn rebuild(&self) -> Result<Index, Error> {
        let scan = self.scan().await?;
        Ok(Index::build(scan.records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bucket::{Bucketizer, Config as BucketConfig, DEFAULT_HIGH_WATER_MARK},
        store::Memory,
    };
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Metrics, Runner};

    const WIDTH: Duration = Duration::from_secs(300);

    fn config() -> Config {
        Config {
            record_type: "pdq_hashes".into(),
            bucket_width: WIDTH,
            lookback: DEFAULT_LOOKBACK,
        }
    }

    fn bucket_config(writer_id: &str) -> BucketConfig {
        BucketConfig {
            record_type: "pdq_hashes".into(),
            writer_id: writer_id.into(),
            bucket_width: WIDTH,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
        }
    }

    fn record(i: usize) -> HashRecord {
        HashRecord::new(format!("{i:064x}"), format!("content-{i}")).unwrap()
    }

    #[test_traced]
    fn test_rebuild_empty_storage() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let builder = Builder::new(context, Memory::default(), config()).unwrap();
            let index = builder.rebuild().await.unwrap();
            assert!(index.is_empty());
        });
    }

    #[test_traced]
    fn test_rebuild_end_to_end() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let store = Memory::default();
            let mut bucketizer =
                Bucketizer::new(context.clone(), store.clone(), bucket_config("w1")).unwrap();
            for i in 0..150 {
                bucketizer.add_record(record(i)).await.unwrap();
            }
            bucketizer.close().await.unwrap();

            // The window is still open, so nothing is indexed yet
            let builder = Builder::new(context.clone(), store.clone(), config()).unwrap();
            assert!(builder.rebuild().await.unwrap().is_empty());

            // Once the window closes, every record is indexed
            context.sleep(WIDTH).await;
            let index = builder.rebuild().await.unwrap();
            assert_eq!(index.len(), 150);
            let hash = record(42);
            assert_eq!(index.lookup(hash.hash()), vec!["content-42"]);
            let matches = index.query(hash.hash(), 0);
            assert_eq!(matches.len(), 1);
            assert_eq!(matches[0].content_id, "content-42");
        });
    }

    #[test_traced]
    fn test_rebuild_respects_lookback() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let store = Memory::default();
            let mut cfg = config();
            cfg.lookback = WIDTH * 4;
            let builder = Builder::new(context.clone(), store.clone(), cfg).unwrap();

            // Write one record per window across 10 windows
            let mut bucketizer =
                Bucketizer::new(context.clone(), store.clone(), bucket_config("w1")).unwrap();
            for i in 0..10 {
                bucketizer.add_record(record(i)).await.unwrap();
                context.sleep(WIDTH).await;
            }
            bucketizer.close().await.unwrap();

            // Only windows starting within the lookback (and already closed) are read
            let (start, end) = builder.range().unwrap();
            assert_eq!(start, UNIX_EPOCH + WIDTH * 6);
            assert_eq!(end, UNIX_EPOCH + WIDTH * 10);
            let index = builder.rebuild().await.unwrap();
            let indexed: Vec<_> = index.records().cloned().collect();
            assert_eq!(indexed, (6..10).map(record).collect::<Vec<_>>());
        });
    }

    #[test_traced]
    fn test_rebuild_keeps_duplicates_across_writers() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let store = Memory::default();
            for writer_id in ["w1", "w2"] {
                let mut bucketizer = Bucketizer::new(
                    context.with_label(writer_id),
                    store.clone(),
                    bucket_config(writer_id),
                )
                .unwrap();
                bucketizer.add_record(record(7)).await.unwrap();
                bucketizer.close().await.unwrap();
            }
            context.sleep(WIDTH).await;

            let builder = Builder::new(context, store, config()).unwrap();
            let index = builder.rebuild().await.unwrap();
            assert_eq!(
                index.lookup(record(7).hash()),
                vec!["content-7", "content-7"]
            );
        });
    }

    #[test_traced]
    fn test_invalid_config() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let mut cfg = config();
            cfg.lookback = Duration::ZERO;
            assert!(matches!(
                Builder::new(context.clone(), Memory::default(), cfg),
                Err(Error::InvalidLookback(_, _))
            ));

            // A lookback of a single window usually covers no closed window at all
            let mut cfg = config();
            cfg.lookback = cfg.bucket_width;
            assert!(matches!(
                Builder::new(context.clone(), Memory::default(), cfg),
                Err(Error::InvalidLookback(_, _))
            ));

            // Two windows always cover the last closed one
            let mut cfg = config();
            cfg.lookback = cfg.bucket_width * 2;
            let width = cfg.bucket_width;
            let builder = Builder::new(context.clone(), Memory::default(), cfg).unwrap();
            context.sleep(width * 5 + width / 2).await;
            let (start, end) = builder.range().unwrap();
            assert!(start <= end - width);

            let mut cfg = config();
            cfg.bucket_width = Duration::from_secs(1);
            assert!(matches!(
                Builder::new(context, Memory::default(), cfg),
                Err(Error::Bucket(bucket::Error::BucketWidthTooSmall(_)))
            ));
        });
    }
}
