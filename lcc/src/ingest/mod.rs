//! Route the signals computed from submissions into per-signal-type bucketizers.
//!
//! [Writers] holds one [Bucketizer] per configured [SignalType] and is owned by a single producer.
//! When several tasks produce records, an [Actor] owns the [Writers] and serializes requests sent
//! through cloned [Mailbox]es. Once every mailbox is dropped (or [Mailbox::close] is called), the
//! actor drains all buffered records before exiting.

use crate::{
    bucket::{self, Bucketizer},
    record::{self, HashRecord},
    store::Store,
    submission::{ContentType, Signal, SignalType, Submission},
};
use commonware_runtime::{Clock, Metrics};
use std::{collections::BTreeMap, time::Duration};
use thiserror::Error;
use tracing::{debug, error};

mod actor;
pub use actor::Actor;
mod ingress;
pub use ingress::Mailbox;
mod metrics;

/// Errors that can occur when ingesting signals.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no writer configured for signal type: {0}")]
    UnconfiguredSignalType(SignalType),
    #[error("signal type {signal_type} cannot be computed from {content_type:?} content")]
    UnsupportedSignalType {
        content_type: ContentType,
        signal_type: SignalType,
    },
    #[error("invalid record: {0}")]
    InvalidRecord(#[from] record::Error),
    #[error("bucket error: {0}")]
    Bucket(#[from] bucket::Error),
    #[error("ingestion closed")]
    Closed,
}

/// Configuration for [Writers] and the [Actor].
#[derive(Clone, Debug)]
pub struct Config {
    /// Identity of this writer, unique among all writers sharing the same storage.
    pub writer_id: String,

    /// Width of each bucket window.
    pub bucket_width: Duration,

    /// Number of buffered records (per signal type) that triggers a flush.
    pub high_water_mark: usize,

    /// Number of requests the [Actor] mailbox can hold before senders wait.
    pub mailbox_size: usize,

    /// Signal types a writer is created for.
    pub signal_types: Vec<SignalType>,
}

/// One [Bucketizer] per configured signal type.
pub struct Writers<E: Clock + Metrics, S: Store> {
    writers: BTreeMap<SignalType, Bucketizer<E, S, HashRecord>>,
}

impl<E: Clock + Metrics, S: Store> Writers<E, S> {
    /// Create a [Bucketizer] for every configured signal type.
    pub fn new(context: E, store: S, cfg: &Config) -> Result<Self, Error> {
        let mut writers = BTreeMap::new();
        for signal_type in cfg.signal_types.iter().copied() {
            if writers.contains_key(&signal_type) {
                continue;
            }
            let bucketizer = Bucketizer::new(
                context.with_label(signal_type.name()),
                store.clone(),
                bucket::Config {
                    record_type: signal_type.record_type(),
                    writer_id: cfg.writer_id.clone(),
                    bucket_width: cfg.bucket_width,
                    high_water_mark: cfg.high_water_mark,
                },
            )?;
            writers.insert(signal_type, bucketizer);
        }
        Ok(Self { writers })
    }

    /// The signal types records can be written for.
    pub fn signal_types(&self) -> impl Iterator<Item = SignalType> + '_ {
        self.writers.keys().copied()
    }

    /// The writer for `signal_type` (if configured).
    pub fn get(&self, signal_type: SignalType) -> Option<&Bucketizer<E, S, HashRecord>> {
        self.writers.get(&signal_type)
    }

    /// Buffer `record` in the writer for `signal_type`.
    pub async fn record(
        &mut self,
        signal_type: SignalType,
        record: HashRecord,
    ) -> Result<(), Error> {
        let writer = self
            .writers
            .get_mut(&signal_type)
            .ok_or(Error::UnconfiguredSignalType(signal_type))?;
        writer.add_record(record).await?;
        Ok(())
    }

    /// Buffer a record for every signal computed from `submission`, returning how many were
    /// buffered.
    ///
    /// Signals of bank submissions are never written to buckets. A submission is buffered in full
    /// or not at all: every signal is validated before any is buffered, the records of each writer
    /// are added as one batch, and batches already added are withdrawn if a later writer fails.
    pub async fn submit(
        &mut self,
        submission: &Submission,
        signals: Vec<Signal>,
    ) -> Result<usize, Error> {
        let Some(content_id) = submission.content_id() else {
            debug!(
                bank_id = submission.object_id(),
                signals = signals.len(),
                "skipping bank submission"
            );
            return Ok(0);
        };
        let content_type = submission.content_type();
        let mut batches: BTreeMap<SignalType, Vec<HashRecord>> = BTreeMap::new();
        let mut count = 0;
        for Signal { signal_type, value } in signals {
            if !content_type.supports(signal_type) {
                return Err(Error::UnsupportedSignalType {
                    content_type,
                    signal_type,
                });
            }
            if !self.writers.contains_key(&signal_type) {
                return Err(Error::UnconfiguredSignalType(signal_type));
            }
            batches
                .entry(signal_type)
                .or_default()
                .push(HashRecord::new(value, content_id)?);
            count += 1;
        }

        let mut added = Vec::with_capacity(batches.len());
        for (signal_type, batch) in batches {
            let len = batch.len();
            let writer = self
                .writers
                .get_mut(&signal_type)
                .ok_or(Error::UnconfiguredSignalType(signal_type))?;
            if let Err(err) = writer.add_batch(batch).await {
                for (signal_type, len) in added {
                    if let Some(writer) = self.writers.get_mut(&signal_type) {
                        writer.discard_last(len);
                    }
                }
                return Err(err.into());
            }
            added.push((signal_type, len));
        }
        Ok(count)
    }

    /// Flush every writer with buffered records.
    pub async fn flush(&mut self) -> Result<(), Error> {
        for writer in self.writers.values_mut() {
            writer.drain().await?;
        }
        Ok(())
    }

    /// Flush and close every writer.
    ///
    /// Every writer is closed even if an earlier one fails (the first error is returned).
    pub async fn close(self) -> Result<(), Error> {
        let mut result = Ok(());
        for (signal_type, writer) in self.writers {
            if let Err(err) = writer.close().await {
                error!(%signal_type, ?err, "failed to close writer");
                if result.is_ok() {
                    result = Err(err.into());
                }
            }
        }
        result
    }
}
