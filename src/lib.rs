//! tick - local, file-based task tracking
//!
//! This library provides the core of the tick CLI: a durable JSONL task log,
//! a disposable SQLite query cache kept consistent with it, and the locking
//! protocol that lets several processes read and write the same project.
//!
//! # Core Concepts
//!
//! - **Log**: `.tick/tasks.jsonl`, the authoritative record of every task
//! - **Cache**: `.tick/cache.db`, rebuilt whenever the log's SHA-256 changes
//! - **Ready**: an open task with no unresolved blocker, no open child and
//!   no blocked ancestor
//! - **Partial ids**: any unique prefix of an id's hex part resolves to it
//!
//! # Module Organization
//!
//! - `task`: Task model, field validation, id generation, status transitions
//! - `jsonl`: Reading and atomically rewriting the task log
//! - `lock`: Shared/exclusive advisory locks on `.tick/lock`
//! - `cache`: SQLite projection and freshness watermark
//! - `query`: List filters, detail, stats, ready/blocked resolution
//! - `deps`: Dependency and hierarchy validation, cycle detection
//! - `resolve`: Partial id resolution
//! - `store`: The query and mutation entry points
//! - `ops`: Create, update, transition, dependency, note and removal operations
//! - `diagnostics`: Read-only health checks
//! - `migrate`: Importing tasks from other trackers
//! - `storage`: `.tick/` discovery and layout
//! - `config`: `.tick/config.toml`
//! - `cli`, `output`: Command-line interface and output envelope

pub mod cache;
pub mod cli;
pub mod config;
pub mod deps;
pub mod diagnostics;
pub mod error;
pub mod jsonl;
pub mod lock;
pub mod migrate;
pub mod ops;
pub mod output;
pub mod query;
pub mod resolve;
pub mod storage;
pub mod store;
pub mod task;

pub use error::{Error, Result};
pub use store::Store;
