//! Project layout for the `.tick` directory
//!
//! ```text
//! <project>/.tick/
//! ├── tasks.jsonl   # authoritative task log
//! ├── cache.db      # disposable SQLite projection
//! ├── lock          # shared/exclusive lock file
//! └── config.toml   # optional configuration
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{Config, CONFIG_FILE};
use crate::error::{Error, Result};

pub const TICK_DIR: &str = ".tick";
pub const TASKS_FILE: &str = "tasks.jsonl";
pub const CACHE_FILE: &str = "cache.db";
pub const LOCK_FILE: &str = "lock";

/// Paths inside one `.tick` directory
#[derive(Debug, Clone)]
pub struct Storage {
    tick_dir: PathBuf,
}

impl Storage {
    /// Wrap an existing `.tick` directory
    pub fn new(tick_dir: impl Into<PathBuf>) -> Self {
        Self {
            tick_dir: tick_dir.into(),
        }
    }

    /// Walk up from `start` until a directory containing `.tick/` is found
    pub fn discover(start: &Path) -> Result<Self> {
        let mut current = Some(start);
        while let Some(dir) = current {
            let candidate = dir.join(TICK_DIR);
            if candidate.is_dir() {
                return Ok(Self::new(candidate));
            }
            current = dir.parent();
        }
        Err(Error::NotInitialized(start.to_path_buf()))
    }

    /// Create `.tick/` with an empty log and a default config
    ///
    /// Fails if the project already has a `.tick` directory.
    pub fn init(project_root: &Path) -> Result<Self> {
        let tick_dir = project_root.join(TICK_DIR);
        if tick_dir.exists() {
            return Err(Error::AlreadyInitialized(tick_dir));
        }

        fs::create_dir_all(&tick_dir)?;
        let storage = Self::new(tick_dir);
        fs::write(storage.tasks_file(), b"")?;
        Config::default().save(&storage.config_file())?;
        Ok(storage)
    }

    // =========================================================================
    // Paths
    // =========================================================================

    pub fn tick_dir(&self) -> &Path {
        &self.tick_dir
    }

    /// Directory containing `.tick/`
    pub fn project_root(&self) -> &Path {
        self.tick_dir.parent().unwrap_or(&self.tick_dir)
    }

    pub fn tasks_file(&self) -> PathBuf {
        self.tick_dir.join(TASKS_FILE)
    }

    pub fn cache_file(&self) -> PathBuf {
        self.tick_dir.join(CACHE_FILE)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.tick_dir.join(LOCK_FILE)
    }

    pub fn config_file(&self) -> PathBuf {
        self.tick_dir.join(CONFIG_FILE)
    }

    pub fn load_config(&self) -> Result<Config> {
        Config::load_from_dir(&self.tick_dir)
    }
}
