//! SQLite projection of the task log
//!
//! The cache is disposable: it is rebuilt whenever the SHA-256 of the log
//! bytes differs from the `jsonl_hash` stored in `metadata`, and deleted
//! and recreated when it cannot be opened or read. Callers must hold the
//! exclusive lock for anything that writes to it.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::Result;
use crate::task::{timestamp, Task};

pub const HASH_KEY: &str = "jsonl_hash";
pub const SCHEMA_KEY: &str = "schema_version";
pub const SCHEMA_VERSION: &str = "1";

const METADATA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS metadata (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);
"#;

const TASK_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
  id TEXT PRIMARY KEY,
  title TEXT NOT NULL,
  status TEXT NOT NULL,
  priority INTEGER NOT NULL,
  description TEXT,
  task_type TEXT,
  parent TEXT,
  created TEXT NOT NULL,
  updated TEXT NOT NULL,
  closed TEXT
);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_priority ON tasks(priority);
CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent);

CREATE TABLE IF NOT EXISTS dependencies (
  task_id TEXT NOT NULL,
  blocked_by TEXT NOT NULL,
  position INTEGER NOT NULL,
  PRIMARY KEY (task_id, blocked_by)
);
CREATE INDEX IF NOT EXISTS idx_dependencies_blocked_by ON dependencies(blocked_by);

CREATE TABLE IF NOT EXISTS task_tags (
  task_id TEXT NOT NULL,
  tag TEXT NOT NULL,
  position INTEGER NOT NULL,
  PRIMARY KEY (task_id, tag)
);
CREATE INDEX IF NOT EXISTS idx_task_tags_tag ON task_tags(tag);

CREATE TABLE IF NOT EXISTS task_refs (
  task_id TEXT NOT NULL,
  position INTEGER NOT NULL,
  ref_value TEXT NOT NULL,
  PRIMARY KEY (task_id, position)
);

CREATE TABLE IF NOT EXISTS task_notes (
  task_id TEXT NOT NULL,
  position INTEGER NOT NULL,
  text TEXT NOT NULL,
  created TEXT NOT NULL,
  PRIMARY KEY (task_id, position)
);
"#;

const DROP_TASK_TABLES_SQL: &str = r#"
DROP TABLE IF EXISTS task_notes;
DROP TABLE IF EXISTS task_refs;
DROP TABLE IF EXISTS task_tags;
DROP TABLE IF EXISTS dependencies;
DROP TABLE IF EXISTS tasks;
"#;

/// Hex-encoded SHA-256 of the exact log bytes
pub fn watermark(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for b in digest {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// An open cache database
pub struct Cache {
    conn: Connection,
    path: PathBuf,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("path", &self.path).finish()
    }
}

impl Cache {
    /// Open (creating if needed) the cache at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(METADATA_SQL)?;
        conn.execute_batch(TASK_TABLES_SQL)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Delete whatever is at `path` and open a fresh, empty cache
    pub fn recreate(path: &Path) -> Result<Self> {
        remove_files(path)?;
        Self::open(path)
    }

    /// Open the cache and rebuild it if it does not match `bytes`
    ///
    /// A cache that cannot be opened or read is deleted and rebuilt.
    pub fn ensure_fresh(path: &Path, tasks: &[Task], bytes: &[u8]) -> Result<Self> {
        let cache = match Self::open(path) {
            Ok(cache) => cache,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cache unreadable, recreating");
                Self::recreate(path)?
            }
        };

        let (mut cache, fresh) = match cache.is_fresh(bytes) {
            Ok(fresh) => (cache, fresh),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cache freshness check failed, recreating");
                drop(cache);
                (Self::recreate(path)?, false)
            }
        };

        if !fresh {
            debug!(path = %path.display(), tasks = tasks.len(), "cache stale, rebuilding");
            cache.rebuild(tasks, bytes)?;
        }
        Ok(cache)
    }

    /// Open the cache read-only if it exists and matches `bytes`
    ///
    /// Never writes. Any failure reads as "not fresh" so the caller falls
    /// back to [`Cache::ensure_fresh`] under the exclusive lock.
    pub fn open_if_fresh(path: &Path, bytes: &[u8]) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).ok()?;
        let cache = Self {
            conn,
            path: path.to_path_buf(),
        };
        match cache.is_fresh(bytes) {
            Ok(true) => Some(cache),
            Ok(false) => None,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "cache freshness check failed");
                None
            }
        }
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored watermark, if any
    pub fn stored_hash(&self) -> Result<Option<String>> {
        read_metadata(&self.conn, HASH_KEY)
    }

    /// True when the stored watermark matches `bytes` and the schema is current
    pub fn is_fresh(&self, bytes: &[u8]) -> Result<bool> {
        let schema = read_metadata(&self.conn, SCHEMA_KEY)?;
        if schema.as_deref() != Some(SCHEMA_VERSION) {
            return Ok(false);
        }
        let stored = self.stored_hash()?;
        Ok(stored.as_deref() == Some(watermark(bytes).as_str()))
    }

    /// Replace every row with `tasks` and record the watermark of `bytes`
    ///
    /// Runs in one transaction; readers never see a partial rebuild.
    /// If an id appears more than once, its last record wins.
    pub fn rebuild(&mut self, tasks: &[Task], bytes: &[u8]) -> Result<()> {
        let mut last_index: HashMap<&str, usize> = HashMap::with_capacity(tasks.len());
        for (idx, task) in tasks.iter().enumerate() {
            last_index.insert(task.id.as_str(), idx);
        }

        let tx = self.conn.transaction()?;
        tx.execute_batch(DROP_TASK_TABLES_SQL)?;
        tx.execute_batch(TASK_TABLES_SQL)?;
        {
            let mut insert_task = tx.prepare(
                "INSERT INTO tasks (id, title, status, priority, description, task_type, parent, created, updated, closed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            let mut insert_dep = tx.prepare(
                "INSERT OR IGNORE INTO dependencies (task_id, blocked_by, position) VALUES (?1, ?2, ?3)",
            )?;
            let mut insert_tag = tx.prepare(
                "INSERT OR IGNORE INTO task_tags (task_id, tag, position) VALUES (?1, ?2, ?3)",
            )?;
            let mut insert_ref = tx.prepare(
                "INSERT INTO task_refs (task_id, position, ref_value) VALUES (?1, ?2, ?3)",
            )?;
            let mut insert_note = tx.prepare(
                "INSERT INTO task_notes (task_id, position, text, created) VALUES (?1, ?2, ?3, ?4)",
            )?;

            for (idx, task) in tasks.iter().enumerate() {
                if last_index.get(task.id.as_str()) != Some(&idx) {
                    continue;
                }
                insert_task.execute(params![
                    task.id,
                    task.title,
                    task.status.as_str(),
                    task.priority,
                    task.description,
                    task.task_type.map(|kind| kind.as_str()),
                    task.parent,
                    timestamp::format(&task.created),
                    timestamp::format(&task.updated),
                    task.closed.as_ref().map(timestamp::format),
                ])?;
                for (position, blocker) in task.blocked_by.iter().enumerate() {
                    insert_dep.execute(params![task.id, blocker, position as i64])?;
                }
                for (position, tag) in task.tags.iter().enumerate() {
                    insert_tag.execute(params![task.id, tag, position as i64])?;
                }
                for (position, value) in task.refs.iter().enumerate() {
                    insert_ref.execute(params![task.id, position as i64, value])?;
                }
                for (position, note) in task.notes.iter().enumerate() {
                    insert_note.execute(params![
                        task.id,
                        position as i64,
                        note.text,
                        timestamp::format(&note.created)
                    ])?;
                }
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![HASH_KEY, watermark(bytes)],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![SCHEMA_KEY, SCHEMA_VERSION],
        )?;
        tx.commit()?;

        debug!(path = %self.path.display(), tasks = last_index.len(), "cache rebuilt");
        Ok(())
    }
}

fn read_metadata(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(value)
}

/// Read the stored watermark without creating or repairing anything
///
/// Returns `Ok(None)` when the cache file does not exist or holds no hash.
pub fn stored_watermark(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let has_metadata: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'metadata'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if has_metadata.is_none() {
        return Ok(None);
    }
    read_metadata(&conn, HASH_KEY)
}

/// Delete the cache file and any SQLite side files
pub fn remove_files(path: &Path) -> Result<()> {
    let mut targets = vec![path.to_path_buf()];
    for suffix in ["-journal", "-wal", "-shm"] {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        targets.push(PathBuf::from(side));
    }
    for target in targets {
        match fs::remove_file(&target) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonl;
    use crate::task::{now, Status};
    use tempfile::TempDir;

    fn sample_tasks() -> Vec<Task> {
        let mut a = Task::new("tick-aaaaaa", "A", 1, now());
        a.tags = vec!["backend".to_string()];
        let mut b = Task::new("tick-bbbbbb", "B", 2, now());
        b.blocked_by = vec!["tick-aaaaaa".to_string()];
        b.status = Status::InProgress;
        vec![a, b]
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn watermark_is_hex_sha256() {
        assert_eq!(
            watermark(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(watermark(b"a"), watermark(b"b"));
    }

    #[test]
    fn rebuild_populates_tables_and_watermark() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cache.db");
        let tasks = sample_tasks();
        let bytes = jsonl::serialize(&tasks).unwrap();

        let mut cache = Cache::open(&path).unwrap();
        assert!(!cache.is_fresh(&bytes).unwrap());
        cache.rebuild(&tasks, &bytes).unwrap();

        assert!(cache.is_fresh(&bytes).unwrap());
        assert_eq!(count(cache.conn(), "tasks"), 2);
        assert_eq!(count(cache.conn(), "dependencies"), 1);
        assert_eq!(count(cache.conn(), "task_tags"), 1);
        assert_eq!(stored_watermark(&path).unwrap(), Some(watermark(&bytes)));
    }

    #[test]
    fn ensure_fresh_detects_changed_bytes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cache.db");
        let mut tasks = sample_tasks();
        let bytes = jsonl::serialize(&tasks).unwrap();
        Cache::ensure_fresh(&path, &tasks, &bytes).unwrap();

        tasks.pop();
        let bytes = jsonl::serialize(&tasks).unwrap();
        let cache = Cache::ensure_fresh(&path, &tasks, &bytes).unwrap();
        assert_eq!(count(cache.conn(), "tasks"), 1);
        assert_eq!(count(cache.conn(), "dependencies"), 0);
    }

    #[test]
    fn corrupt_file_is_replaced() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cache.db");
        fs::write(&path, b"definitely not a sqlite database, just garbage bytes").unwrap();

        let tasks = sample_tasks();
        let bytes = jsonl::serialize(&tasks).unwrap();
        let cache = Cache::ensure_fresh(&path, &tasks, &bytes).unwrap();
        assert_eq!(count(cache.conn(), "tasks"), 2);
    }

    #[test]
    fn duplicate_ids_keep_last_record() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cache.db");
        let first = Task::new("tick-aaaaaa", "old", 2, now());
        let second = Task::new("tick-aaaaaa", "new", 2, now());
        let tasks = vec![first, second];
        let bytes = jsonl::serialize(&tasks).unwrap();

        let cache = Cache::ensure_fresh(&path, &tasks, &bytes).unwrap();
        let title: String = cache
            .conn()
            .query_row("SELECT title FROM tasks WHERE id = 'tick-aaaaaa'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(title, "new");
    }

    #[test]
    fn stored_watermark_of_missing_file_is_none() {
        let temp = TempDir::new().unwrap();
        assert_eq!(stored_watermark(&temp.path().join("cache.db")).unwrap(), None);
    }
}
