use super::{validate_dir, validate_path, Error};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};
use tokio::{fs, io::AsyncWriteExt};

/// Prefix of files that are being written and must not be listed.
const HIDDEN_PREFIX: char = '.';

/// Distinguishes concurrent temporary files created by this process.
static TEMPORARY: AtomicU64 = AtomicU64::new(0);

/// [super::Store] implementation backed by a directory on the local filesystem.
///
/// Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct Disk {
    root: PathBuf,
}

impl Disk {
    /// Create a new [Disk] store rooted at `root` (created lazily on first write).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory all paths are relative to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn create_parent(&self, full: &Path) -> Result<(), Error> {
        let Some(parent) = full.parent() else {
            return Ok(());
        };
        fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::Io(parent.into(), e))
    }

    /// Collect all visible files below `dir` (relative to the root) into `files`.
    async fn walk_into(&self, dir: PathBuf, files: &mut Vec<PathBuf>) -> Result<(), Error> {
        // Iterate instead of recursing to avoid boxing futures
        let mut pending = vec![dir];
        while let Some(dir) = pending.pop() {
            let full = self.root.join(&dir);
            let mut entries = match fs::read_dir(&full).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::Io(full, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::Io(full.clone(), e))?
            {
                let name = entry.file_name();
                if name.to_string_lossy().starts_with(HIDDEN_PREFIX) {
                    continue;
                }
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| Error::Io(entry.path(), e))?;
                if file_type.is_dir() {
                    pending.push(dir.join(name));
                } else if file_type.is_file() {
                    files.push(dir.join(name));
                }
            }
        }
        Ok(())
    }
}

impl super::Store for Disk {
    async fn append(&self, path: &Path, data: &[u8]) -> Result<(), Error> {
        validate_path(path)?;
        let full = self.root.join(path);
        self.create_parent(&full).await?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full)
            .await
            .map_err(|e| Error::Io(full.clone(), e))?;
        file.write_all(data)
            .await
            .map_err(|e| Error::Io(full.clone(), e))?;
        file.flush().await.map_err(|e| Error::Io(full.clone(), e))?;
        file.sync_all().await.map_err(|e| Error::Io(full, e))
    }

    async fn create(&self, path: &Path, data: &[u8]) -> Result<(), Error> {
        validate_path(path)?;
        let full = self.root.join(path);
        self.create_parent(&full).await?;
        if fs::try_exists(&full)
            .await
            .map_err(|e| Error::Io(full.clone(), e))?
        {
            return Err(Error::AlreadyExists(path.into()));
        }

        // Write the contents to a hidden file
        let name = full
            .file_name()
            .ok_or_else(|| Error::PathInvalid(path.into()))?
            .to_string_lossy()
            .into_owned();
        let temporary = full.with_file_name(format!(
            "{HIDDEN_PREFIX}{name}.{}.{}.tmp",
            std::process::id(),
            TEMPORARY.fetch_add(1, Ordering::Relaxed)
        ));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temporary)
            .await
            .map_err(|e| Error::Io(temporary.clone(), e))?;
        let written = async {
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(e) = written {
            let _ = fs::remove_file(&temporary).await;
            return Err(Error::Io(temporary, e));
        }

        // Linking fails if the destination exists, so a concurrent creator can never be replaced
        let linked = fs::hard_link(&temporary, &full).await;
        let _ = fs::remove_file(&temporary).await;
        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(Error::AlreadyExists(path.into()))
            }
            Err(e) => Err(Error::Io(full, e)),
        }
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>, Error> {
        validate_path(path)?;
        let full = self.root.join(path);
        match fs::read(&full).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::Missing(path.into())),
            Err(e) => Err(Error::Io(full, e)),
        }
    }

    async fn list(&self, dir: &Path) -> Result<Vec<PathBuf>, Error> {
        validate_dir(dir)?;
        let full = self.root.join(dir);
        let mut entries = match fs::read_dir(&full).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(full, e)),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Io(full.clone(), e))?
        {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(HIDDEN_PREFIX) {
                continue;
            }
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| Error::Io(entry.path(), e))?;
            if file_type.is_file() {
                files.push(dir.join(name));
            }
        }
        files.sort();
        Ok(files)
    }

    async fn walk(&self, dir: &Path) -> Result<Vec<PathBuf>, Error> {
        validate_dir(dir)?;
        let mut files = Vec::new();
        self.walk_into(dir.into(), &mut files).await?;
        files.sort();
        Ok(files)
    }
}
