//! Cross-process locking for the `.tick` directory
//!
//! Readers take a shared lock, writers and cache rebuilds take an exclusive
//! lock, both on the dedicated `.tick/lock` file (fs2/flock). Acquisition
//! blocks until the lock is granted; the returned guard unlocks on drop.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{Error, Result};

/// Lock mode held by a [`LockGuard`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LockMode::Shared => "shared",
            LockMode::Exclusive => "exclusive",
        }
    }
}

fn is_lock_contended(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }

    // On Windows, fs2/libc can surface lock/sharing violations as "Other".
    #[cfg(windows)]
    {
        matches!(err.raw_os_error(), Some(32) | Some(33))
    }
    #[cfg(not(windows))]
    {
        false
    }
}

/// Hands out shared and exclusive locks on one lock file
#[derive(Debug, Clone)]
pub struct LockManager {
    path: PathBuf,
}

impl LockManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until a shared (reader) lock is held
    pub fn shared(&self) -> Result<LockGuard> {
        self.acquire(LockMode::Shared)
    }

    /// Block until the exclusive (writer) lock is held
    pub fn exclusive(&self) -> Result<LockGuard> {
        self.acquire(LockMode::Exclusive)
    }

    /// Try to take a shared lock without waiting
    ///
    /// Returns `Ok(None)` if a writer holds the lock.
    pub fn try_shared(&self) -> Result<Option<LockGuard>> {
        self.try_acquire(LockMode::Shared)
    }

    /// Try to take the exclusive lock without waiting
    ///
    /// Returns `Ok(None)` if any other holder exists.
    pub fn try_exclusive(&self) -> Result<Option<LockGuard>> {
        self.try_acquire(LockMode::Exclusive)
    }

    fn open(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        Ok(file)
    }

    fn acquire(&self, mode: LockMode) -> Result<LockGuard> {
        let file = self.open()?;
        let locked = match mode {
            LockMode::Shared => FileExt::lock_shared(&file),
            LockMode::Exclusive => FileExt::lock_exclusive(&file),
        };
        if let Err(err) = locked {
            debug!(path = %self.path.display(), error = %err, "lock acquisition failed");
            return Err(Error::LockFailed(self.path.clone()));
        }

        debug!(path = %self.path.display(), mode = mode.as_str(), "lock acquired");
        Ok(LockGuard {
            file,
            path: self.path.clone(),
            mode,
        })
    }

    fn try_acquire(&self, mode: LockMode) -> Result<Option<LockGuard>> {
        let file = self.open()?;
        let locked = match mode {
            LockMode::Shared => FileExt::try_lock_shared(&file),
            LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
        };
        match locked {
            Ok(()) => Ok(Some(LockGuard {
                file,
                path: self.path.clone(),
                mode,
            })),
            Err(err) if is_lock_contended(&err) => Ok(None),
            Err(err) => Err(Error::Io(err)),
        }
    }
}

/// A held lock; released when dropped
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl LockGuard {
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(path = %self.path.display(), mode = self.mode.as_str(), "lock released");
    }
}
