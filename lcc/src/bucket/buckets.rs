use super::{
    align_up, bucket_dir, validate_bucket_width, validate_record_type, Error, Key, EXTENSION,
};
use crate::{record::Row, store::Store};
use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::{debug, warn};

/// Records read from every bucket in a range.
#[derive(Debug)]
pub struct Scan<R> {
    /// Decoded records, ordered by window and then by bucket path.
    pub records: Vec<R>,

    /// Buckets that were read and decoded.
    pub buckets: Vec<PathBuf>,

    /// Buckets that could not be read or decoded (and were skipped).
    pub skipped: Vec<PathBuf>,
}

/// Physical layout of buckets over a [Store].
///
/// The same key-to-path function is used to write buckets and to scan them.
#[derive(Clone)]
pub struct Buckets<S: Store> {
    store: S,
}

impl<S: Store> Buckets<S> {
    /// Create a new [Buckets] over `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Durably append `records` (in order) to the bucket identified by `key`.
    ///
    /// All records are written in a single store append. Appending no records is a no-op.
    pub async fn append<R: Row>(&self, key: &Key, records: &[R]) -> Result<(), Error> {
        if records.is_empty() {
            return Ok(());
        }
        let path = key.path()?;
        let mut data = String::new();
        for record in records {
            data.push_str(&record.to_line());
            data.push('\n');
        }
        self.store.append(&path, data.as_bytes()).await?;
        debug!(path = %path.display(), records = records.len(), "appended to bucket");
        Ok(())
    }

    /// Read every record in every bucket of `record_type` whose window starts in `[start, end)`.
    ///
    /// Windows are enumerated with the provided `bucket_width`. Buckets that cannot be read or
    /// decoded are skipped (and logged) rather than failing the scan. A bucket that is still being
    /// appended to is read as of the moment it is read (any torn trailing line is ignored).
    pub async fn read_range<R: Row>(
        &self,
        record_type: &str,
        start: SystemTime,
        end: SystemTime,
        bucket_width: Duration,
    ) -> Result<Scan<R>, Error> {
        validate_record_type(record_type)?;
        validate_bucket_width(bucket_width)?;

        let mut scan = Scan {
            records: Vec::new(),
            buckets: Vec::new(),
            skipped: Vec::new(),
        };
        let mut window_start = align_up(start.max(UNIX_EPOCH), bucket_width)?;
        while window_start < end {
            let dir = bucket_dir(record_type, window_start)?;
            for path in self.store.list(&dir).await? {
                if !is_bucket(&path) {
                    continue;
                }
                match self.read_bucket::<R>(&path).await {
                    Ok(records) => {
                        scan.records.extend(records);
                        scan.buckets.push(path);
                    }
                    Err(err) => {
                        warn!(path = %path.display(), ?err, "skipping unreadable bucket");
                        scan.skipped.push(path);
                    }
                }
            }
            window_start += bucket_width;
        }
        Ok(scan)
    }

    /// Return the paths of every bucket of `record_type`, regardless of window or writer.
    ///
    /// Paths are sorted, so repeated calls over unchanged storage return the same order.
    pub async fn list(&self, record_type: &str) -> Result<Vec<PathBuf>, Error> {
        validate_record_type(record_type)?;
        let paths = self.store.walk(Path::new(record_type)).await?;
        Ok(paths.into_iter().filter(|path| is_bucket(path)).collect())
    }

    /// Read and decode a single bucket.
    pub async fn read_bucket<R: Row>(&self, path: &Path) -> Result<Vec<R>, Error> {
        let data = self.store.read(path).await?;
        decode_bucket(path, &data)
    }
}

fn is_bucket(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(EXTENSION)
}

/// Decode all newline-terminated rows of a bucket.
fn decode_bucket<R: Row>(path: &Path, data: &[u8]) -> Result<Vec<R>, Error> {
    // Only consider complete lines
    let complete = match data.iter().rposition(|b| *b == b'\n') {
        Some(last) => &data[..=last],
        None => &[][..],
    };
    if complete.len() < data.len() {
        debug!(
            path = %path.display(),
            torn = data.len() - complete.len(),
            "ignoring incomplete trailing row"
        );
    }
    let text =
        std::str::from_utf8(complete).map_err(|_| Error::InvalidUtf8(path.into()))?;

    let mut records = Vec::new();
    for (line, row) in text.lines().enumerate() {
        if row.is_empty() {
            continue;
        }
        let record =
            R::from_line(row).map_err(|err| Error::InvalidRow(path.into(), line + 1, err))?;
        records.push(record);
    }
    Ok(records)
}
