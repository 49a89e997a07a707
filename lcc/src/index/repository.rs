use super::{
    snapshot::{self, epoch_millis, Snapshot},
    Error, Index,
};
use crate::{
    bucket,
    store::{self, Store},
};
use commonware_runtime::Clock;
use std::{
    path::{Path, PathBuf},
    time::{Duration, UNIX_EPOCH},
};
use tracing::{debug, info, warn};

/// Directory (under the record type) holding snapshots.
const INDEX_DIR: &str = "index";

/// Extension of snapshot files.
const EXTENSION: &str = "idx";

/// Maximum number of snapshots that may share a timestamp.
const MAX_SUFFIX: u32 = 1024;

/// The position of a snapshot in publication order, parsed from its name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Name {
    millis: u64,
    suffix: u32,
}

impl Name {
    fn parse(path: &Path) -> Option<Self> {
        if path.extension()?.to_str()? != EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let (millis, suffix) = match stem.split_once('-') {
            Some((millis, suffix)) => (millis, suffix.parse().ok()?),
            None => (stem, 0),
        };
        if millis.len() != 20 || !millis.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            millis: millis.parse().ok()?,
            suffix,
        })
    }

    fn file_name(&self) -> String {
        match self.suffix {
            0 => format!("{:020}.{EXTENSION}", self.millis),
            suffix => format!("{:020}-{suffix}.{EXTENSION}", self.millis),
        }
    }
}

/// Persists index snapshots and loads the most recent one.
///
/// Snapshots are immutable: every publication creates a new file and no file is ever replaced.
#[derive(Clone)]
pub struct Repository<E: Clock, S: Store> {
    context: E,
    store: S,
}

impl<E: Clock, S: Store> Repository<E, S> {
    /// Create a new [Repository] over `store`.
    pub fn new(context: E, store: S) -> Self {
        Self { context, store }
    }

    fn dir(record_type: &str) -> Result<PathBuf, Error> {
        bucket::validate_record_type(record_type)?;
        Ok(Path::new(record_type).join(INDEX_DIR))
    }

    /// Write `index` as a new snapshot of `record_type` tagged with the current time.
    ///
    /// If a snapshot with the same timestamp already exists, the next free `-<n>` suffix is used.
    pub async fn publish(&self, record_type: &str, index: &Index) -> Result<PathBuf, Error> {
        let dir = Self::dir(record_type)?;
        let millis = epoch_millis(self.context.current());
        let snapshot = Snapshot {
            record_type: record_type.to_string(),
            created_at: UNIX_EPOCH + Duration::from_millis(millis),
            index: index.clone(),
        };
        let encoded = snapshot.encode();

        for suffix in 0..MAX_SUFFIX {
            let path = dir.join(Name { millis, suffix }.file_name());
            match self.store.create(&path, &encoded).await {
                Ok(()) => {
                    info!(
                        record_type,
                        path = %path.display(),
                        entries = index.len(),
                        "published snapshot"
                    );
                    return Ok(path);
                }
                Err(store::Error::AlreadyExists(_)) => {
                    debug!(path = %path.display(), "snapshot name taken");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(Error::NamesExhausted(millis))
    }

    /// Return the paths of every snapshot of `record_type`, oldest first.
    pub async fn list(&self, record_type: &str) -> Result<Vec<PathBuf>, Error> {
        Ok(self
            .names(record_type)
            .await?
            .into_iter()
            .map(|(_, path)| path)
            .collect())
    }

    async fn names(&self, record_type: &str) -> Result<Vec<(Name, PathBuf)>, Error> {
        let dir = Self::dir(record_type)?;
        let mut names = Vec::new();
        for path in self.store.list(&dir).await? {
            let Some(name) = Name::parse(&path) else {
                warn!(path = %path.display(), "ignoring unrecognized file in index directory");
                continue;
            };
            names.push((name, path));
        }
        names.sort();
        Ok(names)
    }

    /// Load the most recently published snapshot of `record_type`.
    ///
    /// Fails if there is no snapshot or if the most recent one cannot be decoded. An older
    /// snapshot is never substituted.
    pub async fn get_latest(&self, record_type: &str) -> Result<Snapshot, Error> {
        let Some((name, path)) = self.names(record_type).await?.pop() else {
            return Err(Error::NotFound(record_type.to_string()));
        };
        let data = self.store.read(&path).await?;
        let snapshot = Snapshot::decode(&data).map_err(|err| match err {
            snapshot::Error::UnsupportedVersion(version) => {
                Error::UnsupportedVersion(path.clone(), version)
            }
            err => Error::CorruptSnapshot(path.clone(), err),
        })?;

        // The embedded metadata is the source of truth and must agree with the name
        let created_at = epoch_millis(snapshot.created_at);
        if created_at != name.millis {
            return Err(Error::TimestampMismatch(path, created_at));
        }
        if snapshot.record_type != record_type {
            return Err(Error::RecordTypeMismatch(path, snapshot.record_type));
        }
        debug!(
            record_type,
            path = %path.display(),
            entries = snapshot.index.len(),
            "loaded snapshot"
        );
        Ok(snapshot)
    }
}
