use super::{metrics, Builder, BuilderConfig, Error, Index, Repository};
use crate::store::Store;
use commonware_runtime::{Clock, Handle, Metrics, Spawner};
use std::{path::PathBuf, time::Duration};
use tracing::{debug, info, warn};

/// Configuration for an [Indexer].
#[derive(Clone, Debug)]
pub struct Config {
    /// Which buckets to read on each rebuild.
    pub builder: BuilderConfig,

    /// Time to wait after a cycle before starting the next one.
    pub interval: Duration,
}

/// Phase of a rebuild cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Scanning,
    Building,
    Publishing,
}

impl Phase {
    fn value(&self) -> i64 {
        match self {
            Phase::Idle => 0,
            Phase::Scanning => 1,
            Phase::Building => 2,
            Phase::Publishing => 3,
        }
    }
}

/// The outcome of a successful rebuild cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Published {
    /// Path of the new snapshot.
    pub path: PathBuf,

    /// Number of entries in the new snapshot.
    pub entries: usize,

    /// Number of buckets in range that could not be read.
    pub skipped: usize,
}

/// Periodically rebuilds the index of a record type and publishes it as a new snapshot.
///
/// A failed cycle leaves the previously published snapshot as the latest and is retried on the
/// next interval.
pub struct Indexer<E: Clock + Spawner + Metrics, S: Store> {
    context: E,
    builder: Builder<E, S>,
    repository: Repository<E, S>,
    interval: Duration,

    phase: Phase,
    metrics: metrics::Metrics,
}

impl<E: Clock + Spawner + Metrics, S: Store> Indexer<E, S> {
    /// Create a new [Indexer] reading buckets from (and publishing snapshots to) `store`.
    pub fn new(context: E, store: S, cfg: Config) -> Result<Self, Error> {
        if cfg.interval.is_zero() {
            return Err(Error::InvalidInterval);
        }
        let builder = Builder::new(context.clone(), store.clone(), cfg.builder)?;
        let repository = Repository::new(context.clone(), store);
        let metrics = metrics::Metrics::init(context.clone());
        Ok(Self {
            context,
            builder,
            repository,
            interval: cfg.interval,
            phase: Phase::Idle,
            metrics,
        })
    }

    /// The phase of the current cycle.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The repository snapshots are published to.
    pub fn repository(&self) -> &Repository<E, S> {
        &self.repository
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.metrics.phase.set(phase.value());
    }

    /// Run a single rebuild cycle: scan, build, and publish.
    ///
    /// Any failure aborts the cycle and is returned. The phase is always reset to
    /// [Phase::Idle] afterwards.
    pub async fn cycle(&mut self) -> Result<Published, Error> {
        self.metrics.cycles.inc();
        let result = self.run_phases().await;
        self.set_phase(Phase::Idle);
        match &result {
            Ok(published) => {
                self.metrics.published.inc();
                self.metrics.entries.set(published.entries as i64);
            }
            Err(_) => {
                self.metrics.failures.inc();
            }
        }
        result
    }

    async fn run_phases(&mut self) -> Result<Published, Error> {
        self.set_phase(Phase::Scanning);
        let scan = self.builder.scan().await?;
        let skipped = scan.skipped.len();
        self.metrics.skipped_buckets.inc_by(skipped as u64);

        self.set_phase(Phase::Building);
        let index = Index::build(scan.records);
        debug!(
            record_type = self.builder.record_type(),
            entries = index.len(),
            "built index"
        );

        self.set_phase(Phase::Publishing);
        let path = self
            .repository
            .publish(self.builder.record_type(), &index)
            .await?;
        Ok(Published {
            path,
            entries: index.len(),
            skipped,
        })
    }

    /// Start running rebuild cycles every interval.
    ///
    /// Aborting the returned handle stops the indexer between (or during) phases. A snapshot is
    /// only ever visible once completely written.
    pub fn start(mut self) -> Handle<()> {
        self.context.spawn_ref()(self.run())
    }

    async fn run(mut self) {
        loop {
            match self.cycle().await {
                Ok(published) => {
                    info!(
                        record_type = self.builder.record_type(),
                        path = %published.path.display(),
                        entries = published.entries,
                        skipped = published.skipped,
                        "rebuild complete"
                    );
                }
                Err(err) => {
                    warn!(
                        record_type = self.builder.record_type(),
                        ?err,
                        "rebuild failed"
                    );
                }
            }
            self.context.sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bucket::{self, Bucketizer, Config as BucketConfig, DEFAULT_HIGH_WATER_MARK},
        index::{Snapshot, DEFAULT_LOOKBACK},
        record::HashRecord,
        store::{self, Disk, Memory},
    };
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, tokio, Runner};
    use rand::Rng;
    use std::{
        path::Path,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
    };

    const WIDTH: Duration = Duration::from_secs(60);

    /// A [Memory] store whose directory listings can be made to fail.
    #[derive(Clone, Default)]
    struct Flaky {
        inner: Memory,
        fail: Arc<AtomicBool>,
    }

    impl Store for Flaky {
        async fn append(&self, path: &Path, data: &[u8]) -> Result<(), store::Error> {
            self.inner.append(path, data).await
        }

        async fn create(&self, path: &Path, data: &[u8]) -> Result<(), store::Error> {
            self.inner.create(path, data).await
        }

        async fn read(&self, path: &Path) -> Result<Vec<u8>, store::Error> {
            self.inner.read(path).await
        }

        async fn list(&self, dir: &Path) -> Result<Vec<PathBuf>, store::Error> {
            if self.fail.load(Ordering::SeqCst) && !dir.ends_with("index") {
                return Err(store::Error::Io(
                    dir.into(),
                    std::io::Error::other("injected failure"),
                ));
            }
            self.inner.list(dir).await
        }

        async fn walk(&self, dir: &Path) -> Result<Vec<PathBuf>, store::Error> {
            self.inner.walk(dir).await
        }
    }

    /// A [Memory] store whose snapshot creation can be made to stall.
    #[derive(Clone)]
    struct Stalling<E: Clock> {
        context: E,
        inner: Memory,
        stall: Arc<AtomicBool>,
    }

    impl<E: Clock> Store for Stalling<E> {
        async fn append(&self, path: &Path, data: &[u8]) -> Result<(), store::Error> {
            self.inner.append(path, data).await
        }

        async fn create(&self, path: &Path, data: &[u8]) -> Result<(), store::Error> {
            if self.stall.load(Ordering::SeqCst) {
                self.context.sleep(Duration::from_secs(3_600)).await;
            }
            self.inner.create(path, data).await
        }

        async fn read(&self, path: &Path) -> Result<Vec<u8>, store::Error> {
            self.inner.read(path).await
        }

        async fn list(&self, dir: &Path) -> Result<Vec<PathBuf>, store::Error> {
            self.inner.list(dir).await
        }

        async fn walk(&self, dir: &Path) -> Result<Vec<PathBuf>, store::Error> {
            self.inner.walk(dir).await
        }
    }

    fn config() -> Config {
        Config {
            builder: BuilderConfig {
                record_type: "pdq_hashes".into(),
                bucket_width: WIDTH,
                lookback: DEFAULT_LOOKBACK,
            },
            interval: WIDTH,
        }
    }

    fn record(i: usize) -> HashRecord {
        HashRecord::new(format!("{i:064x}"), format!("content-{i}")).unwrap()
    }

    async fn write<E: Clock + Metrics, S: Store>(context: E, store: S, count: usize) {
        let cfg = BucketConfig {
            record_type: "pdq_hashes".into(),
            writer_id: "w1".into(),
            bucket_width: WIDTH,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
        };
        let mut bucketizer = Bucketizer::new(context, store, cfg).unwrap();
        for i in 0..count {
            bucketizer.add_record(record(i)).await.unwrap();
        }
        bucketizer.close().await.unwrap();
    }

    #[test_traced]
    fn test_cycle_publishes_snapshot() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let store = Memory::default();
            write(context.with_label("bucketizer"), store.clone(), 10).await;
            context.sleep(WIDTH).await;

            let mut indexer =
                Indexer::new(context.with_label("indexer"), store.clone(), config()).unwrap();
            assert_eq!(indexer.phase(), Phase::Idle);
            let published = indexer.cycle().await.unwrap();
            assert_eq!(indexer.phase(), Phase::Idle);
            assert_eq!(published.entries, 10);
            assert_eq!(published.skipped, 0);

            let latest = indexer.repository().get_latest("pdq_hashes").await.unwrap();
            assert_eq!(latest.index.len(), 10);
            assert_eq!(latest.index.lookup(record(3).hash()), vec!["content-3"]);

            let buffer = context.encode();
            assert!(buffer.contains("indexer_cycles_total 1"));
            assert!(buffer.contains("indexer_published_total 1"));
            assert!(buffer.contains("indexer_failures_total 0"));
            assert!(buffer.contains("indexer_entries 10"));
            assert!(buffer.contains("indexer_phase 0"));
        });
    }

    #[test_traced]
    fn test_failed_cycle_keeps_previous_snapshot() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let store = Flaky::default();
            write(context.with_label("bucketizer"), store.clone(), 5).await;
            context.sleep(WIDTH).await;

            let mut indexer =
                Indexer::new(context.with_label("indexer"), store.clone(), config()).unwrap();
            let first = indexer.cycle().await.unwrap();

            // Scanning fails: nothing new is published
            store.fail.store(true, Ordering::SeqCst);
            context.sleep(WIDTH).await;
            assert!(matches!(
                indexer.cycle().await,
                Err(Error::Bucket(bucket::Error::Store(_)))
            ));
            assert_eq!(indexer.phase(), Phase::Idle);
            let repository = indexer.repository();
            let listed = repository.list("pdq_hashes").await.unwrap();
            assert_eq!(listed, vec![first.path]);
            let latest = repository.get_latest("pdq_hashes").await.unwrap();
            assert_eq!(latest.index.len(), 5);
            assert!(context.encode().contains("indexer_failures_total 1"));

            // The next cycle recovers
            store.fail.store(false, Ordering::SeqCst);
            context.sleep(WIDTH).await;
            indexer.cycle().await.unwrap();
            let snapshots = indexer.repository().list("pdq_hashes").await.unwrap();
            assert_eq!(snapshots.len(), 2);
        });
    }

    #[test_traced]
    fn test_skipped_buckets_counted() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let store = Memory::default();
            write(context.with_label("bucketizer"), store.clone(), 3).await;
            store
                .append(Path::new("pdq_hashes/1970/1/1/0/0/w2.csv"), b"bad\n")
                .await
                .unwrap();
            context.sleep(WIDTH).await;

            let mut indexer =
                Indexer::new(context.with_label("indexer"), store, config()).unwrap();
            let published = indexer.cycle().await.unwrap();
            assert_eq!(published.entries, 3);
            assert_eq!(published.skipped, 1);
            assert!(context.encode().contains("indexer_skipped_buckets_total 1"));
        });
    }

    #[test_traced]
    fn test_periodic_rebuilds() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let store = Memory::default();
            write(context.with_label("bucketizer"), store.clone(), 20).await;

            let indexer =
                Indexer::new(context.with_label("indexer"), store.clone(), config()).unwrap();
            let repository = Repository::new(context.clone(), store.clone());
            let handle = indexer.start();

            // Cycles run at 0, 60, and 120 seconds
            context.sleep(WIDTH * 2 + WIDTH / 2).await;
            let snapshots = repository.list("pdq_hashes").await.unwrap();
            assert_eq!(snapshots.len(), 3);

            // The first cycle ran while the window was still open
            let first = Snapshot::decode(&store.read(&snapshots[0]).await.unwrap()).unwrap();
            assert!(first.index.is_empty());
            let latest = repository.get_latest("pdq_hashes").await.unwrap();
            assert_eq!(latest.index.len(), 20);

            // Once aborted, nothing else is published
            handle.abort();
            context.sleep(WIDTH * 5).await;
            assert_eq!(repository.list("pdq_hashes").await.unwrap().len(), 3);
        });
    }

    #[test_traced]
    fn test_abort_while_publishing() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let store = Stalling {
                context: context.with_label("store"),
                inner: Memory::default(),
                stall: Arc::default(),
            };
            write(context.with_label("bucketizer"), store.clone(), 5).await;
            context.sleep(WIDTH).await;

            let indexer =
                Indexer::new(context.with_label("indexer"), store.clone(), config()).unwrap();
            let repository = Repository::new(context.clone(), store.clone());
            let handle = indexer.start();

            // The first cycle publishes immediately
            context.sleep(WIDTH / 2).await;
            let snapshots = repository.list("pdq_hashes").await.unwrap();
            assert_eq!(snapshots.len(), 1);

            // The second cycle stalls while writing its snapshot
            store.stall.store(true, Ordering::SeqCst);
            context.sleep(WIDTH).await;
            assert!(context.encode().contains("indexer_phase 3"));
            handle.abort();

            // Long after the write would have completed, only the first snapshot is visible
            context.sleep(Duration::from_secs(7_200)).await;
            assert_eq!(repository.list("pdq_hashes").await.unwrap(), snapshots);
            let latest = repository.get_latest("pdq_hashes").await.unwrap();
            assert_eq!(latest.index.len(), 5);
        });
    }

    #[test_traced]
    fn test_interrupted_disk_publish_not_visible() {
        let root = std::env::temp_dir().join(format!(
            "lcc_indexer_{:016x}",
            rand::thread_rng().gen::<u64>()
        ));
        let executor = tokio::Runner::default();
        executor.start({
            let root = root.clone();
            |context| async move {
                let store = Disk::new(root.clone());
                let mut indexer =
                    Indexer::new(context.with_label("indexer"), store.clone(), config()).unwrap();
                let first = indexer.cycle().await.unwrap();

                // Publishing leaves nothing behind but the snapshot
                let dir = root.join("pdq_hashes").join("index");
                let files = |dir: &Path| {
                    let mut names: Vec<_> = std::fs::read_dir(dir)
                        .unwrap()
                        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
                        .collect();
                    names.sort();
                    names
                };
                let name = first.path.file_name().unwrap();
                let name = name.to_string_lossy().into_owned();
                assert_eq!(files(&dir), vec![name]);

                // A newer snapshot whose write was interrupted before being linked into place
                let newer = Snapshot {
                    record_type: "pdq_hashes".into(),
                    created_at: context.current() + Duration::from_secs(60),
                    index: Index::build(vec![record(1)]),
                };
                let encoded = newer.encode();
                let temporary = format!(".99999999999999999999.idx.{}.0.tmp", std::process::id());
                std::fs::write(dir.join(&temporary), &encoded[..encoded.len() / 2]).unwrap();
                assert_eq!(files(&dir).len(), 2);

                let repository = indexer.repository();
                assert_eq!(
                    repository.list("pdq_hashes").await.unwrap(),
                    vec![first.path.clone()]
                );
                let latest = repository.get_latest("pdq_hashes").await.unwrap();
                assert!(latest.index.is_empty());
            }
        });
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test_traced]
    fn test_invalid_interval() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let mut cfg = config();
            cfg.interval = Duration::ZERO;
            assert!(matches!(
                Indexer::new(context, Memory::default(), cfg),
                Err(Error::InvalidInterval)
            ));
        });
    }
}
