//! Durable file storage addressed by relative paths.
//!
//! A [Store] is rooted somewhere (a directory on disk, or memory) and every path passed to it is
//! interpreted relative to that root. Paths use `/`-separated, normal components only.
//!
//! # Concurrency
//!
//! Appends to distinct paths may be issued concurrently. Appending to the same path from two
//! writers at once is not coordinated by the store and must be prevented by the caller (buckets
//! achieve this by including a unique writer identity in every path).

use std::{
    future::Future,
    io::Error as IoError,
    path::{Component, Path, PathBuf},
};
use thiserror::Error;

mod disk;
pub use disk::Disk;
mod memory;
pub use memory::Memory;

/// Errors that can occur when interacting with a [Store].
#[derive(Debug, Error)]
pub enum Error {
    #[error("path invalid (must be relative with normal components): {0}")]
    PathInvalid(PathBuf),
    #[error("file missing: {0}")]
    Missing(PathBuf),
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),
    #[error("io error at {0}: {1}")]
    Io(PathBuf, IoError),
}

/// Interface to durably append, create, read, and enumerate files.
pub trait Store: Clone + Send + Sync + 'static {
    /// Append `data` to the file at `path`, creating it (and any parent directories) if missing.
    ///
    /// An Ok result indicates the data is durably persisted. `data` is written in a single call so
    /// concurrent readers observe either none or a prefix of it.
    fn append(&self, path: &Path, data: &[u8]) -> impl Future<Output = Result<(), Error>> + Send;

    /// Create a new file at `path` containing `data`.
    ///
    /// Fails with [Error::AlreadyExists] rather than replacing an existing file. The file only
    /// becomes visible to [Store::read] and [Store::list] once it is completely written.
    fn create(&self, path: &Path, data: &[u8]) -> impl Future<Output = Result<(), Error>> + Send;

    /// Read the entire contents of the file at `path`.
    fn read(&self, path: &Path) -> impl Future<Output = Result<Vec<u8>, Error>> + Send;

    /// Return the files directly inside `dir`, sorted by name.
    ///
    /// A directory that does not exist is treated as empty.
    fn list(&self, dir: &Path) -> impl Future<Output = Result<Vec<PathBuf>, Error>> + Send;

    /// Return all files below `dir` (at any depth), sorted by path.
    ///
    /// A directory that does not exist is treated as empty.
    fn walk(&self, dir: &Path) -> impl Future<Output = Result<Vec<PathBuf>, Error>> + Send;
}

/// Ensure a path is relative and only contains normal components.
pub(crate) fn validate_path(path: &Path) -> Result<(), Error> {
    let mut components = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => components += 1,
            _ => return Err(Error::PathInvalid(path.into())),
        }
    }
    if components == 0 {
        return Err(Error::PathInvalid(path.into()));
    }
    Ok(())
}

/// Ensure a directory path is relative and only contains normal components (or is empty).
pub(crate) fn validate_dir(dir: &Path) -> Result<(), Error> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    validate_path(dir)
}
