//! Import tasks from other trackers
//!
//! A [`Provider`] yields normalized [`MigratedTask`] records; the [`Engine`]
//! validates each one and hands it to a [`TaskCreator`]. Records succeed or
//! fail independently: one bad record never aborts the rest.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::store::Store;
use crate::task::{
    generate_id, normalize_description, now, validate_title, Status, Task, MAX_PRIORITY,
    MIN_PRIORITY,
};

const UNTITLED: &str = "(untitled)";

/// A task as produced by a provider, before defaults are applied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigratedTask {
    pub title: String,
    /// Defaults to `open`
    pub status: Option<Status>,
    /// Defaults to the configured priority
    pub priority: Option<u8>,
    pub description: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub closed: Option<DateTime<Utc>>,
}

impl MigratedTask {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "title is required and cannot be empty".to_string(),
            ));
        }
        if let Some(priority) = self.priority {
            if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
                return Err(Error::InvalidArgument(format!(
                    "priority must be between {MIN_PRIORITY} and {MAX_PRIORITY}, got {priority}"
                )));
            }
        }
        Ok(())
    }

    fn display_title(&self) -> String {
        let title = self.title.trim();
        if title.is_empty() {
            UNTITLED.to_string()
        } else {
            title.to_string()
        }
    }
}

/// A source system tasks can be imported from
pub trait Provider {
    fn name(&self) -> &str;
    fn tasks(&self) -> Result<Vec<MigratedTask>>;
}

/// Persists one imported record, returning the new task id
pub trait TaskCreator {
    fn create_task(&self, task: &MigratedTask) -> Result<String>;
}

impl TaskCreator for Store {
    fn create_task(&self, record: &MigratedTask) -> Result<String> {
        let title = validate_title(&record.title)?;
        let status = record.status.unwrap_or(Status::Open);
        let priority = record.priority.unwrap_or(self.config().default_priority);
        let description = normalize_description(record.description.as_deref());
        let created = record.created.unwrap_or_else(now);
        let updated = record.updated.unwrap_or(created);
        let closed = if status.is_closed() {
            Some(record.closed.unwrap_or(updated))
        } else {
            None
        };
        let prefix = self.config().prefix();

        self.mutate(move |tasks| {
            let id = {
                let existing: HashSet<&str> = tasks.iter().map(|task| task.id.as_str()).collect();
                generate_id(&prefix, &existing)?
            };
            let mut task = Task::new(id.clone(), title, priority, created);
            task.status = status;
            task.description = description;
            task.updated = updated;
            task.closed = closed;
            tasks.push(task);
            Ok(id)
        })
    }
}

/// Validates records without writing anything
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRun;

impl TaskCreator for DryRun {
    fn create_task(&self, _task: &MigratedTask) -> Result<String> {
        Ok(String::new())
    }
}

/// Outcome of importing one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportResult {
    pub title: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImportResult {
    pub fn failed_count(results: &[ImportResult]) -> usize {
        results.iter().filter(|result| !result.success).count()
    }
}

pub struct Engine<C> {
    creator: C,
}

impl<C: TaskCreator> Engine<C> {
    pub fn new(creator: C) -> Self {
        Self { creator }
    }

    /// Import every record from `provider`
    ///
    /// Only a failure to read the provider itself is returned as an error.
    pub fn run(&self, provider: &dyn Provider) -> Result<Vec<ImportResult>> {
        let records = provider.tasks()?;
        debug!(provider = provider.name(), records = records.len(), "importing tasks");

        let results = records
            .iter()
            .map(|record| {
                let title = record.display_title();
                let outcome = record
                    .validate()
                    .and_then(|()| self.creator.create_task(record));
                match outcome {
                    Ok(id) => ImportResult {
                        title,
                        success: true,
                        id: (!id.is_empty()).then_some(id),
                        error: None,
                    },
                    Err(err) => ImportResult {
                        title,
                        success: false,
                        id: None,
                        error: Some(err.to_string()),
                    },
                }
            })
            .collect();
        Ok(results)
    }
}

/// Providers available by name
#[derive(Default)]
pub struct Registry {
    providers: BTreeMap<String, Box<dyn Provider>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Box<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Sorted provider names
    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub fn get(&self, name: &str) -> Result<&dyn Provider> {
        match self.providers.get(name) {
            Some(provider) => Ok(provider.as_ref()),
            None => {
                let mut message = format!("Unknown provider \"{name}\"\n\nAvailable providers:");
                for available in self.names() {
                    message.push_str("\n  - ");
                    message.push_str(available);
                }
                Err(Error::InvalidArgument(message))
            }
        }
    }
}
