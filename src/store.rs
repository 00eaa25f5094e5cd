//! The two entry points to task data: `query` and `mutate`
//!
//! `query` runs a read-only closure against a fresh cache under a shared
//! lock. `mutate` runs a transformation over the full task list under the
//! exclusive lock, validates the result, rewrites the log atomically and
//! rebuilds the cache before releasing the lock.

use std::path::Path;

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::cache::{self, Cache};
use crate::config::Config;
use crate::deps;
use crate::error::{Error, Result};
use crate::jsonl::{self, LogContents};
use crate::lock::LockManager;
use crate::query;
use crate::resolve;
use crate::storage::Storage;
use crate::task::Task;

/// Handle to one `.tick` project
#[derive(Debug, Clone)]
pub struct Store {
    storage: Storage,
    config: Config,
    locks: LockManager,
}

impl Store {
    pub fn open(storage: Storage) -> Result<Self> {
        if !storage.tick_dir().is_dir() {
            return Err(Error::NotInitialized(storage.tick_dir().to_path_buf()));
        }
        let config = storage.load_config()?;
        let locks = LockManager::new(storage.lock_file());
        Ok(Self {
            storage,
            config,
            locks,
        })
    }

    /// Open the project containing `start` (or one of its ancestors)
    pub fn discover(start: &Path) -> Result<Self> {
        Self::open(Storage::discover(start)?)
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    fn read_log(&self) -> Result<LogContents> {
        let mut log = jsonl::read_all(&self.storage.tasks_file())?;
        log.normalize_ids();
        if !log.is_clean() {
            warn!(
                path = %self.storage.tasks_file().display(),
                lines = ?log.issues.iter().map(|issue| issue.line).collect::<Vec<_>>(),
                "skipping malformed task log lines"
            );
        }
        Ok(log)
    }

    // =========================================================================
    // Query
    // =========================================================================

    /// Run a read-only closure against an up-to-date cache
    ///
    /// Readers share the lock. If the cache is stale the shared lock is
    /// traded for the exclusive one, the cache is rebuilt, and the closure
    /// runs while the exclusive lock is still held.
    pub fn query<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let cache_path = self.storage.cache_file();
        {
            let _shared = self.locks.shared()?;
            let log = self.read_log()?;
            if let Some(cache) = Cache::open_if_fresh(&cache_path, &log.bytes) {
                return f(cache.conn());
            }
        }

        let _exclusive = self.locks.exclusive()?;
        let log = self.read_log()?;
        let cache = Cache::ensure_fresh(&cache_path, &log.tasks, &log.bytes)?;
        f(cache.conn())
    }

    /// Resolve a full or partial id against the current task set
    pub fn resolve_id(&self, input: &str) -> Result<String> {
        self.query(|conn| resolve::resolve_id(query::task_ids(conn)?, input))
    }

    // =========================================================================
    // Mutate
    // =========================================================================

    /// Apply `f` to the full task list and persist the result
    ///
    /// Nothing is written if `f` fails or the result breaks a graph
    /// invariant. A log with malformed lines is refused so that rewriting it
    /// cannot silently drop records.
    pub fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Vec<Task>) -> Result<T>,
    {
        let tasks_path = self.storage.tasks_file();
        let cache_path = self.storage.cache_file();

        let _exclusive = self.locks.exclusive()?;
        let mut log = jsonl::read_all(&tasks_path)?;
        if !log.is_clean() {
            return Err(Error::CorruptLog {
                path: tasks_path,
                lines: log.issues.iter().map(|issue| issue.line).collect(),
            });
        }
        log.normalize_ids();

        let mut cache = Cache::ensure_fresh(&cache_path, &log.tasks, &log.bytes)?;

        let mut tasks = log.tasks;
        let output = f(&mut tasks)?;
        deps::validate_task_set(&tasks)?;

        let bytes = jsonl::write_all(&tasks_path, &tasks)?;
        debug!(path = %tasks_path.display(), tasks = tasks.len(), "task log written");

        // The log is authoritative; a stale cache is rebuilt on next access.
        if let Err(err) = cache.rebuild(&tasks, &bytes) {
            warn!(path = %cache_path.display(), error = %err, "cache update failed after write");
        }
        Ok(output)
    }

    /// Delete the cache and rebuild it from the log; returns the task count
    pub fn rebuild(&self) -> Result<usize> {
        let cache_path = self.storage.cache_file();
        let _exclusive = self.locks.exclusive()?;
        let log = self.read_log()?;
        cache::remove_files(&cache_path)?;
        let mut cache = Cache::open(&cache_path)?;
        cache.rebuild(&log.tasks, &log.bytes)?;
        Ok(log.tasks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{now, Status};
    use std::fs;
    use tempfile::TempDir;

    fn init() -> (TempDir, Store) {
        let temp = TempDir::new().unwrap();
        let storage = Storage::init(temp.path()).unwrap();
        let store = Store::open(storage).unwrap();
        (temp, store)
    }

    fn add(store: &Store, id: &str) {
        let id = id.to_string();
        store
            .mutate(|tasks| {
                tasks.push(Task::new(id.clone(), format!("Task {id}"), 2, now()));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn mutate_persists_and_query_sees_it() {
        let (_temp, store) = init();
        add(&store, "tick-aaaaaa");

        let raw = fs::read_to_string(store.storage().tasks_file()).unwrap();
        assert!(raw.contains("tick-aaaaaa"));

        let ids = store.query(|conn| query::task_ids(conn)).unwrap();
        assert_eq!(ids, vec!["tick-aaaaaa"]);
    }

    #[test]
    fn failed_transform_writes_nothing() {
        let (_temp, store) = init();
        add(&store, "tick-aaaaaa");
        let before = fs::read(store.storage().tasks_file()).unwrap();

        let result: Result<()> = store.mutate(|tasks| {
            tasks.clear();
            Err(Error::Validation("nope".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(fs::read(store.storage().tasks_file()).unwrap(), before);
    }

    #[test]
    fn invariant_violation_writes_nothing() {
        let (_temp, store) = init();
        add(&store, "tick-aaaaaa");
        let before = fs::read(store.storage().tasks_file()).unwrap();

        let err = store
            .mutate(|tasks| {
                tasks[0].blocked_by.push("tick-ffffff".to_string());
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(fs::read(store.storage().tasks_file()).unwrap(), before);
    }

    #[test]
    fn external_edit_is_picked_up() {
        let (_temp, store) = init();
        add(&store, "tick-aaaaaa");

        let mut task = Task::new("tick-bbbbbb", "External", 1, now());
        task.status = Status::Done;
        let mut raw = fs::read(store.storage().tasks_file()).unwrap();
        raw.extend(jsonl::serialize(&[task]).unwrap());
        fs::write(store.storage().tasks_file(), raw).unwrap();

        let ids = store.query(|conn| query::task_ids(conn)).unwrap();
        assert_eq!(ids, vec!["tick-aaaaaa", "tick-bbbbbb"]);
    }

    #[test]
    fn malformed_log_blocks_writes_but_not_reads() {
        let (_temp, store) = init();
        add(&store, "tick-aaaaaa");
        let mut raw = fs::read_to_string(store.storage().tasks_file()).unwrap();
        raw.push_str("{broken\n");
        fs::write(store.storage().tasks_file(), raw).unwrap();

        let ids = store.query(|conn| query::task_ids(conn)).unwrap();
        assert_eq!(ids, vec!["tick-aaaaaa"]);

        let err = store.mutate(|_| Ok(())).unwrap_err();
        match err {
            Error::CorruptLog { lines, .. } => assert_eq!(lines, vec![2]),
            other => panic!("expected corrupt log, got {other:?}"),
        }
    }

    #[test]
    fn rebuild_recreates_deleted_cache() {
        let (_temp, store) = init();
        add(&store, "tick-aaaaaa");
        add(&store, "tick-bbbbbb");
        fs::remove_file(store.storage().cache_file()).unwrap();

        assert_eq!(store.rebuild().unwrap(), 2);
        assert!(store.storage().cache_file().exists());
        let stored = cache::stored_watermark(&store.storage().cache_file()).unwrap();
        let bytes = fs::read(store.storage().tasks_file()).unwrap();
        assert_eq!(stored, Some(cache::watermark(&bytes)));
    }

    #[test]
    fn resolve_id_uses_current_tasks() {
        let (_temp, store) = init();
        add(&store, "tick-a3f1b2");
        add(&store, "tick-a3f1b3");
        assert_eq!(store.resolve_id("a3f1b3").unwrap(), "tick-a3f1b3");
        assert!(matches!(
            store.resolve_id("a3f"),
            Err(Error::Ambiguous { .. })
        ));
    }

    #[test]
    fn hand_edited_upper_case_ids_resolve_and_edit() {
        let (_temp, store) = init();
        let mut first = Task::new("TICK-A1B2C3", "Upper", 2, now());
        first.blocked_by = vec!["Tick-FFFFFF".to_string()];
        let second = Task::new("TICK-FFFFFF", "Blocker", 2, now());
        fs::write(
            store.storage().tasks_file(),
            jsonl::serialize(&[first, second]).unwrap(),
        )
        .unwrap();

        assert_eq!(store.resolve_id("tick-a1b2c3").unwrap(), "tick-a1b2c3");
        let blocked = store.query(query::blocked).unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].id, "tick-a1b2c3");

        store
            .mutate(|tasks| {
                tasks[0].title = "Renamed".to_string();
                Ok(())
            })
            .unwrap();
        let raw = fs::read_to_string(store.storage().tasks_file()).unwrap();
        assert!(raw.contains(r#""id":"tick-a1b2c3""#));
        assert!(raw.contains(r#""blocked_by":["tick-ffffff"]"#));
        assert!(!raw.contains("TICK"));
    }

    #[test]
    fn open_requires_initialized_project() {
        let temp = TempDir::new().unwrap();
        let err = Store::open(Storage::new(temp.path().join(".tick"))).unwrap_err();
        assert!(matches!(err, Error::NotInitialized(_)));
    }
}
