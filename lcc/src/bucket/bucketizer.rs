use super::{metrics, Buckets, Config, Error, Key, Window};
use crate::{record::Row, store::Store};
use commonware_runtime::{Clock, Metrics};
use std::{path::PathBuf, time::Duration};
use tracing::{debug, error};

/// Buffers records for a single writer and flushes them into time-bucketed storage.
///
/// A [Bucketizer] is owned by exactly one producer: every mutating method takes `&mut self`, so
/// callers that need to share one across tasks must serialize access (see [crate::ingest::Actor]).
///
/// Any records still buffered when a [Bucketizer] is dropped are lost, so producers must call
/// [Bucketizer::close] (or [Bucketizer::drain]) on shutdown.
pub struct Bucketizer<E: Clock + Metrics, S: Store, R: Row> {
    context: E,
    buckets: Buckets<S>,

    record_type: String,
    writer_id: String,
    bucket_width: Duration,
    high_water_mark: usize,

    window: Window,
    buffer: Vec<R>,

    metrics: metrics::Metrics,
}

impl<E: Clock + Metrics, S: Store, R: Row> Bucketizer<E, S, R> {
    /// Create a new [Bucketizer] writing to `store`.
    ///
    /// Fails if the configuration is invalid.
    pub fn new(context: E, store: S, cfg: Config) -> Result<Self, Error> {
        cfg.validate()?;
        let window = Window::containing(context.current(), cfg.bucket_width)?;
        let metrics = metrics::Metrics::init(context.clone());
        Ok(Self {
            context,
            buckets: Buckets::new(store),
            record_type: cfg.record_type,
            writer_id: cfg.writer_id,
            bucket_width: cfg.bucket_width,
            high_water_mark: cfg.high_water_mark,
            window,
            buffer: Vec::with_capacity(cfg.high_water_mark),
            metrics,
        })
    }

    /// The type of records written.
    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// The identity of this writer.
    pub fn writer_id(&self) -> &str {
        &self.writer_id
    }

    /// The window currently being buffered.
    pub fn window(&self) -> Window {
        self.window
    }

    /// Records buffered but not yet flushed (in insertion order).
    pub fn buffered(&self) -> &[R] {
        &self.buffer
    }

    /// Add a record to the current window.
    ///
    /// If the buffer has reached the high-water mark or the current window has ended, the buffer
    /// is flushed before `record` is added (so `record` starts the next batch). If that flush
    /// fails, the error is returned and `record` is not buffered.
    pub async fn add_record(&mut self, record: R) -> Result<(), Error> {
        if self.buffer.len() >= self.high_water_mark || self.context.current() >= self.window.end {
            self.flush().await?;
        }
        self.buffer.push(record);
        self.metrics.records.inc();
        self.metrics.buffered.set(self.buffer.len() as i64);
        Ok(())
    }

    /// Add `records` to the current window as a single batch.
    ///
    /// If the batch would take the buffer past the high-water mark or the current window has
    /// ended, the buffer is flushed first so the batch is never split across flushes. If that
    /// flush fails, the error is returned and none of `records` are buffered.
    pub async fn add_batch(&mut self, records: Vec<R>) -> Result<(), Error> {
        if records.is_empty() {
            return Ok(());
        }
        if self.buffer.len() + records.len() > self.high_water_mark
            || self.context.current() >= self.window.end
        {
            self.flush().await?;
        }
        self.metrics.records.inc_by(records.len() as u64);
        self.buffer.extend(records);
        self.metrics.buffered.set(self.buffer.len() as i64);
        Ok(())
    }

    /// Remove the `count` most recently added records from the buffer.
    ///
    /// Used to withdraw a batch that was added before a later step of the same operation failed.
    /// Records that have already been flushed cannot be withdrawn.
    pub(crate) fn discard_last(&mut self, count: usize) {
        let len = self.buffer.len().saturating_sub(count);
        self.buffer.truncate(len);
        self.metrics.buffered.set(self.buffer.len() as i64);
    }

    /// Persist all buffered records to the bucket of the current window.
    ///
    /// On success the buffer is emptied and the window is advanced to the one containing the
    /// current time (which may skip windows if the writer was idle). On failure the buffer and
    /// window are left unchanged so the flush can be retried.
    pub async fn flush(&mut self) -> Result<(), Error> {
        let key = Key {
            record_type: self.record_type.clone(),
            window_start: self.window.start,
            writer_id: self.writer_id.clone(),
        };
        if let Err(err) = self.buckets.append(&key, &self.buffer).await {
            self.metrics.flush_failures.inc();
            return Err(err);
        }
        if !self.buffer.is_empty() {
            debug!(
                record_type = %self.record_type,
                writer_id = %self.writer_id,
                records = self.buffer.len(),
                "flushed bucket"
            );
            self.metrics.flushes.inc();
            self.metrics
                .flushed_records
                .inc_by(self.buffer.len() as u64);
            self.buffer.clear();
            self.metrics.buffered.set(0);
        }
        self.window = Window::containing(self.context.current(), self.bucket_width)?;
        Ok(())
    }

    /// Flush any buffered records regardless of the size or time triggers.
    ///
    /// Unlike [Bucketizer::close], a failed drain can be retried.
    pub async fn drain(&mut self) -> Result<(), Error> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.flush().await
    }

    /// Flush any buffered records and consume the [Bucketizer].
    pub async fn close(mut self) -> Result<(), Error> {
        self.drain().await
    }

    /// Return the paths of every bucket of `record_type` in storage (from any window or writer).
    pub async fn list_bucket_paths(&self, record_type: &str) -> Result<Vec<PathBuf>, Error> {
        self.buckets.list(record_type).await
    }
}

impl<E: Clock + Metrics, S: Store, R: Row> Drop for Bucketizer<E, S, R> {
    fn drop(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        error!(
            record_type = %self.record_type,
            writer_id = %self.writer_id,
            records = self.buffer.len(),
            "bucketizer dropped with unflushed records"
        );
    }
}
