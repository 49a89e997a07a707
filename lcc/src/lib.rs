//! Buffer content hashes into time buckets and rebuild searchable indices from them.
//!
//! Producers hand [record::HashRecord]s to a [bucket::Bucketizer] (directly or through
//! [ingest::Writers]), which buffers them in memory and appends them to per-writer bucket files
//! grouped by fixed-width time windows. An [index::Indexer] periodically scans the buckets of
//! recently closed windows, builds an [index::Index], and publishes it as an immutable, versioned
//! snapshot. Readers load the most recent snapshot with [index::Repository::get_latest].
//!
//! All storage goes through the [store::Store] trait ([store::Disk] for a local or mounted
//! filesystem, [store::Memory] for tests and embedding). All time is read from the runtime
//! [commonware_runtime::Clock], so every component can be driven by the deterministic runtime.

pub mod bucket;
pub mod index;
pub mod ingest;
pub mod record;
pub mod store;
pub mod submission;
