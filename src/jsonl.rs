//! The task log: one JSON object per line in `tasks.jsonl`
//!
//! Reads are tolerant: a malformed line is reported as a [`ParseIssue`]
//! and the remaining lines are still returned. Writes replace the whole file
//! atomically (temp file in the same directory, fsync, rename).

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::Result;
use crate::task::Task;

/// A line of the log that could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseIssue {
    /// 1-based line number
    pub line: usize,
    pub message: String,
}

/// Parsed log plus the exact bytes it was parsed from
#[derive(Debug, Clone, Default)]
pub struct LogContents {
    pub bytes: Vec<u8>,
    pub tasks: Vec<Task>,
    pub issues: Vec<ParseIssue>,
}

impl LogContents {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Ids are case-insensitive; hand-edited records may use any case
    pub fn normalize_ids(&mut self) {
        for task in &mut self.tasks {
            task.normalize_ids();
        }
    }
}

/// Parse log bytes, collecting malformed lines instead of failing
pub fn parse(bytes: Vec<u8>) -> LogContents {
    let mut tasks = Vec::new();
    let mut issues = Vec::new();

    for (idx, raw) in bytes.split(|byte| *byte == b'\n').enumerate() {
        let line = idx + 1;
        let text = match std::str::from_utf8(raw) {
            Ok(text) => text.trim(),
            Err(err) => {
                issues.push(ParseIssue {
                    line,
                    message: format!("invalid UTF-8: {err}"),
                });
                continue;
            }
        };
        if text.is_empty() {
            continue;
        }
        match serde_json::from_str::<Task>(text) {
            Ok(task) => tasks.push(task),
            Err(err) => issues.push(ParseIssue {
                line,
                message: err.to_string(),
            }),
        }
    }

    LogContents {
        bytes,
        tasks,
        issues,
    }
}

/// Read and parse the log; a missing file reads as empty
pub fn read_all(path: &Path) -> Result<LogContents> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(err) => return Err(err.into()),
    };
    Ok(parse(bytes))
}

/// Serialize tasks one per line, in order
pub fn serialize(tasks: &[Task]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for task in tasks {
        serde_json::to_writer(&mut out, task)?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Atomically replace the log with `bytes`
pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

/// Atomically replace the log with `tasks`, returning the bytes written
pub fn write_all(path: &Path, tasks: &[Task]) -> Result<Vec<u8>> {
    let bytes = serialize(tasks)?;
    write_bytes(path, &bytes)?;
    Ok(bytes)
}
