//! Error types for tick
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, unknown or ambiguous id, missing project)
//! - 3: Rejected (invariant violation, invalid status transition, failed checks)
//! - 4: Operation failed (io, sqlite, lock, corrupt log)

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the tick CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const REJECTED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for tick operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Not a tick project (no .tick directory found from {0})")]
    NotInitialized(PathBuf),

    #[error("Tick project already initialized at {0}")]
    AlreadyInitialized(PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("task '{0}' not found")]
    NotFound(String),

    #[error("ambiguous task id '{input}': {}", .candidates.join(", "))]
    Ambiguous {
        input: String,
        candidates: Vec<String>,
    },

    // Rejections (exit code 3)
    #[error("{0}")]
    Validation(String),

    #[error("doctor found {0} error(s)")]
    ChecksFailed(usize),

    // Operation failures (exit code 4)
    #[error("Corrupt task log {}: malformed line(s) {}", .path.display(), format_lines(.lines))]
    CorruptLog { path: PathBuf, lines: Vec<usize> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),
}

fn format_lines(lines: &[usize]) -> String {
    lines
        .iter()
        .map(|line| line.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // User errors
            Error::NotInitialized(_)
            | Error::AlreadyInitialized(_)
            | Error::InvalidConfig(_)
            | Error::InvalidArgument(_)
            | Error::NotFound(_)
            | Error::Ambiguous { .. } => exit_codes::USER_ERROR,

            // Rejections
            Error::Validation(_) | Error::ChecksFailed(_) => exit_codes::REJECTED,

            // Operation failures
            Error::CorruptLog { .. }
            | Error::Io(_)
            | Error::Json(_)
            | Error::Sqlite(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Structured details for machine-readable error output
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::Ambiguous { input, candidates } => Some(serde_json::json!({
                "input": input,
                "candidates": candidates,
            })),
            Error::CorruptLog { path, lines } => Some(serde_json::json!({
                "path": path.display().to_string(),
                "lines": lines,
            })),
            _ => None,
        }
    }
}

/// Result type alias for tick operations
pub type Result<T> = std::result::Result<T, Error>;
