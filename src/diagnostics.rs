//! Health checks over the raw task log and cache (`tick doctor`)
//!
//! Checks read the log as it is on disk, including lines the pipeline would
//! refuse, and never modify anything. Every check runs; a failing check does
//! not stop the others.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::warn;

use crate::cache;
use crate::deps;
use crate::error::Result;
use crate::jsonl::{self, LogContents};
use crate::store::Store;
use crate::task::{is_valid_id, Status, Task};

const CACHE_CHECK: &str = "Cache";
const MANUAL_FIX: &str = "Manual fix required";
const REBUILD_CACHE: &str = "Run `tick rebuild` to refresh cache";

/// Errors affect the exit status; warnings do not
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Outcome of one check; a failing check may yield several results
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl CheckResult {
    fn pass(name: &str, severity: Severity) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            severity,
            details: None,
            suggestion: None,
        }
    }

    fn fail(name: &str, severity: Severity, details: String, suggestion: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            severity,
            details: Some(details),
            suggestion: Some(suggestion.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub results: Vec<CheckResult>,
}

impl Report {
    pub fn error_count(&self) -> usize {
        self.failures(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.failures(Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    fn failures(&self, severity: Severity) -> usize {
        self.results
            .iter()
            .filter(|result| !result.passed && result.severity == severity)
            .count()
    }
}

/// Run every check against the project under a shared lock
///
/// A cache that cannot be opened is reported as a failed cache check; the
/// remaining checks still run.
pub fn run(store: &Store) -> Result<Report> {
    let _shared = store.locks().shared()?;
    let log = jsonl::read_all(&store.storage().tasks_file())?;
    let cache_path = store.storage().cache_file();
    let report = match cache::stored_watermark(&cache_path) {
        Ok(stored) => check_all(&log, stored.as_deref()),
        Err(err) => {
            warn!(path = %cache_path.display(), error = %err, "cache unreadable");
            let cache = CheckResult::fail(
                CACHE_CHECK,
                Severity::Error,
                format!("cache.db is unreadable: {err}"),
                REBUILD_CACHE,
            );
            run_checks(&log, vec![cache])
        }
    };
    Ok(report)
}

/// Pure check runner over an already-read log and stored cache watermark
pub fn check_all(log: &LogContents, stored_watermark: Option<&str>) -> Report {
    run_checks(log, check_cache(&log.bytes, stored_watermark))
}

fn run_checks(log: &LogContents, cache_results: Vec<CheckResult>) -> Report {
    let raw = log.tasks.as_slice();
    // Graph checks compare ids case-insensitively, like the store does
    let tasks: Vec<Task> = raw
        .iter()
        .cloned()
        .map(|mut task| {
            task.normalize_ids();
            task
        })
        .collect();
    let tasks = tasks.as_slice();

    let mut results = cache_results;
    results.extend(check_syntax(log));
    results.extend(check_id_format(raw));
    results.extend(check_duplicate_ids(tasks));
    results.extend(check_orphaned_parents(tasks));
    results.extend(check_orphaned_dependencies(tasks));
    results.extend(check_self_references(tasks));
    results.extend(check_cycles(tasks));
    results.extend(check_child_blocked_by_parent(tasks));
    results.extend(check_done_parents(tasks));
    Report { results }
}

fn check_cache(bytes: &[u8], stored: Option<&str>) -> Vec<CheckResult> {
    let current = cache::watermark(bytes);
    match stored {
        Some(hash) if hash == current => vec![CheckResult::pass(CACHE_CHECK, Severity::Error)],
        Some(_) => vec![CheckResult::fail(
            CACHE_CHECK,
            Severity::Error,
            "cache is stale (hash mismatch with tasks.jsonl)".to_string(),
            REBUILD_CACHE,
        )],
        None => vec![CheckResult::fail(
            CACHE_CHECK,
            Severity::Error,
            "cache.db is missing or has no stored hash".to_string(),
            REBUILD_CACHE,
        )],
    }
}

fn check_syntax(log: &LogContents) -> Vec<CheckResult> {
    const NAME: &str = "JSONL syntax";
    if log.is_clean() {
        return vec![CheckResult::pass(NAME, Severity::Error)];
    }
    log.issues
        .iter()
        .map(|issue| {
            CheckResult::fail(
                NAME,
                Severity::Error,
                format!("line {}: {}", issue.line, issue.message),
                MANUAL_FIX,
            )
        })
        .collect()
}

fn check_id_format(tasks: &[Task]) -> Vec<CheckResult> {
    const NAME: &str = "ID format";
    collect_or_pass(
        NAME,
        Severity::Error,
        tasks
            .iter()
            .filter(|task| !is_valid_id(&task.id))
            .map(|task| {
                CheckResult::fail(
                    NAME,
                    Severity::Error,
                    format!("invalid ID format: {:?}", task.id),
                    MANUAL_FIX,
                )
            })
            .collect(),
    )
}

fn check_duplicate_ids(tasks: &[Task]) -> Vec<CheckResult> {
    const NAME: &str = "ID uniqueness";
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for task in tasks {
        let key = task.id.to_lowercase();
        let count = counts.entry(key.clone()).or_insert(0);
        if *count == 0 {
            order.push(key);
        }
        *count += 1;
    }

    collect_or_pass(
        NAME,
        Severity::Error,
        order
            .into_iter()
            .filter_map(|id| {
                let count = counts.get(&id).copied().unwrap_or(0);
                (count > 1).then(|| {
                    CheckResult::fail(
                        NAME,
                        Severity::Error,
                        format!("duplicate ID {id} appears {count} times"),
                        MANUAL_FIX,
                    )
                })
            })
            .collect(),
    )
}

fn check_orphaned_parents(tasks: &[Task]) -> Vec<CheckResult> {
    const NAME: &str = "Orphaned parents";
    let ids = id_set(tasks);
    collect_or_pass(
        NAME,
        Severity::Error,
        tasks
            .iter()
            .filter_map(|task| {
                let parent = task.parent.as_deref()?;
                (!ids.contains(parent)).then(|| {
                    CheckResult::fail(
                        NAME,
                        Severity::Error,
                        format!("{} references non-existent parent {parent}", task.id),
                        MANUAL_FIX,
                    )
                })
            })
            .collect(),
    )
}

fn check_orphaned_dependencies(tasks: &[Task]) -> Vec<CheckResult> {
    const NAME: &str = "Orphaned dependencies";
    let ids = id_set(tasks);
    let mut failures = Vec::new();
    for task in tasks {
        for blocker in &task.blocked_by {
            if !ids.contains(blocker.as_str()) {
                failures.push(CheckResult::fail(
                    NAME,
                    Severity::Error,
                    format!("{} depends on non-existent task {blocker}", task.id),
                    MANUAL_FIX,
                ));
            }
        }
    }
    collect_or_pass(NAME, Severity::Error, failures)
}

fn check_self_references(tasks: &[Task]) -> Vec<CheckResult> {
    const NAME: &str = "Self-referential dependencies";
    collect_or_pass(
        NAME,
        Severity::Error,
        tasks
            .iter()
            .filter(|task| task.is_blocked_by(&task.id))
            .map(|task| {
                CheckResult::fail(
                    NAME,
                    Severity::Error,
                    format!("{} depends on itself", task.id),
                    MANUAL_FIX,
                )
            })
            .collect(),
    )
}

fn check_cycles(tasks: &[Task]) -> Vec<CheckResult> {
    const NAME: &str = "Dependency cycles";
    collect_or_pass(
        NAME,
        Severity::Error,
        deps::find_cycles(tasks)
            .into_iter()
            // Self-loops are reported by their own check
            .filter(|cycle| cycle.len() > 2)
            .map(|cycle| {
                CheckResult::fail(
                    NAME,
                    Severity::Error,
                    format!("dependency cycle: {}", cycle.join(" → ")),
                    MANUAL_FIX,
                )
            })
            .collect(),
    )
}

fn check_child_blocked_by_parent(tasks: &[Task]) -> Vec<CheckResult> {
    const NAME: &str = "Child blocked by parent";
    collect_or_pass(
        NAME,
        Severity::Error,
        tasks
            .iter()
            .filter_map(|task| {
                let parent = task.parent.as_deref()?;
                task.is_blocked_by(parent).then(|| {
                    CheckResult::fail(
                        NAME,
                        Severity::Error,
                        format!("{} is blocked by its parent {parent}", task.id),
                        "Manual fix required - a child blocked by its parent can never become ready",
                    )
                })
            })
            .collect(),
    )
}

fn check_done_parents(tasks: &[Task]) -> Vec<CheckResult> {
    const NAME: &str = "Parent done with open children";
    let by_id: HashMap<&str, &Task> = tasks.iter().map(|task| (task.id.as_str(), task)).collect();
    collect_or_pass(
        NAME,
        Severity::Warning,
        tasks
            .iter()
            .filter(|task| matches!(task.status, Status::Open | Status::InProgress))
            .filter_map(|task| {
                let parent = by_id.get(task.parent.as_deref()?)?;
                (parent.status == Status::Done).then(|| {
                    CheckResult::fail(
                        NAME,
                        Severity::Warning,
                        format!(
                            "{} is done but has open child {}",
                            parent.id, task.id
                        ),
                        "Review whether parent was completed prematurely",
                    )
                })
            })
            .collect(),
    )
}

fn id_set(tasks: &[Task]) -> HashSet<&str> {
    tasks.iter().map(|task| task.id.as_str()).collect()
}

fn collect_or_pass(name: &str, severity: Severity, failures: Vec<CheckResult>) -> Vec<CheckResult> {
    if failures.is_empty() {
        vec![CheckResult::pass(name, severity)]
    } else {
        failures
    }
}
