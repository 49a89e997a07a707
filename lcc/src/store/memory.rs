use super::{validate_dir, validate_path, Error};
use std::{
    collections::{btree_map::Entry, BTreeMap},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

/// In-memory [super::Store] implementation.
///
/// Clones share the same underlying files.
#[derive(Clone, Default)]
pub struct Memory {
    files: Arc<Mutex<BTreeMap<PathBuf, Vec<u8>>>>,
}

impl super::Store for Memory {
    async fn append(&self, path: &Path, data: &[u8]) -> Result<(), Error> {
        validate_path(path)?;
        let mut files = self.files.lock().unwrap();
        files
            .entry(path.into())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    async fn create(&self, path: &Path, data: &[u8]) -> Result<(), Error> {
        validate_path(path)?;
        let mut files = self.files.lock().unwrap();
        match files.entry(path.into()) {
            Entry::Occupied(_) => Err(Error::AlreadyExists(path.into())),
            Entry::Vacant(entry) => {
                entry.insert(data.to_vec());
                Ok(())
            }
        }
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>, Error> {
        validate_path(path)?;
        let files = self.files.lock().unwrap();
        files
            .get(path)
            .cloned()
            .ok_or_else(|| Error::Missing(path.into()))
    }

    async fn list(&self, dir: &Path) -> Result<Vec<PathBuf>, Error> {
        validate_dir(dir)?;
        let files = self.files.lock().unwrap();
        Ok(files
            .keys()
            .filter(|path| path.parent() == Some(dir))
            .cloned()
            .collect())
    }

    async fn walk(&self, dir: &Path) -> Result<Vec<PathBuf>, Error> {
        validate_dir(dir)?;
        let files = self.files.lock().unwrap();
        Ok(files
            .keys()
            .filter(|path| path.starts_with(dir))
            .cloned()
            .collect())
    }
}
