// Cross-process path locks.
//
// Each path maps to a lock file named by the SHA-256 of the path bytes
// inside a shared lock directory. Holding the exclusive advisory lock on
// that file is holding the path. Lock files are created on first use and
// never removed, so a fresh creation can never race a live holder.
//
// Two paths whose keys collide share a lock. That over-serializes but
// never lets two holders in at once. Locks are not reentrant: taking the
// same key twice from one thread deadlocks, which is why `acquire_chain`
// deduplicates keys.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use log::debug;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Lock key for `path`: lowercase hex SHA-256 of its bytes.
pub fn lock_key(path: &Path) -> String {
    let digest = Sha256::digest(path.as_os_str().as_encoded_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
}

impl LockManager {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Block until `path` is held exclusively.
    pub fn acquire(&self, path: &Path) -> Result<PathLock> {
        self.acquire_key(lock_key(path), path)
    }

    /// Hold `parent`, then every child in ascending index order.
    ///
    /// Every multi-lock operation goes through here so the acquisition
    /// order is the same everywhere.
    pub fn acquire_chain(&self, parent: &Path, children: &[PathBuf]) -> Result<ChainLock> {
        let mut held: Vec<PathLock> = Vec::with_capacity(children.len() + 1);
        for path in std::iter::once(parent).chain(children.iter().map(PathBuf::as_path)) {
            let key = lock_key(path);
            if held.iter().any(|l| l.key == key) {
                continue;
            }
            held.push(self.acquire_key(key, path)?);
        }
        Ok(ChainLock { held })
    }

    fn acquire_key(&self, key: String, path: &Path) -> Result<PathLock> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.dir.join(&key))?;
        file.lock()?;
        debug!("locked {} ({})", path.display(), &key[..12]);
        Ok(PathLock { file, key })
    }
}

/// An exclusively held path. Dropping it releases the lock.
#[derive(Debug)]
pub struct PathLock {
    file: File,
    key: String,
}

impl PathLock {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        debug!("unlocked {}", &self.key[..12]);
    }
}

/// Locks held for a whole chain, released in reverse order.
#[derive(Debug)]
pub struct ChainLock {
    held: Vec<PathLock>,
}

impl ChainLock {
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.held.iter().map(PathLock::key)
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ChainLock {
    fn drop(&mut self) {
        while let Some(lock) = self.held.pop() {
            drop(lock);
        }
    }
}
