//! Task operations built on [`Store::mutate`]
//!
//! Every operation validates its inputs first, then resolves ids and edits
//! the task list inside a single mutation, so resolution and the write see
//! the same snapshot.

use std::collections::HashSet;

use serde::Serialize;

use crate::deps;
use crate::error::{Error, Result};
use crate::resolve;
use crate::store::Store;
use crate::task::{
    generate_id, normalize_description, normalize_refs, normalize_tags, now, validate_note_text,
    validate_priority, validate_title, Note, Task, TaskType, Transition, TransitionResult,
};

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub title: String,
    /// Defaults to the configured priority
    pub priority: Option<u8>,
    pub description: Option<String>,
    pub task_type: Option<TaskType>,
    pub tags: Vec<String>,
    pub refs: Vec<String>,
    pub parent: Option<String>,
    /// Tasks the new task waits on (ids or comma lists)
    pub blocked_by: Vec<String>,
    /// Tasks that should wait on the new task (ids or comma lists)
    pub blocks: Vec<String>,
}

/// Field changes for [`Store::update`]; `Some(None)` clears a field
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<u8>,
    pub task_type: Option<Option<TaskType>>,
    pub tags: Option<Vec<String>>,
    pub refs: Option<Vec<String>>,
    pub parent: Option<Option<String>>,
    pub blocks: Vec<String>,
}

impl UpdateOptions {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.task_type.is_none()
            && self.tags.is_none()
            && self.refs.is_none()
            && self.parent.is_none()
            && self.blocks.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalResult {
    pub removed: Vec<String>,
    /// Surviving tasks whose `blocked_by` lost an entry
    pub dependencies_updated: Vec<String>,
}

fn resolve_in(tasks: &[Task], input: &str) -> Result<String> {
    resolve::resolve_id(tasks.iter().map(|task| task.id.as_str()), input)
}

fn resolve_all(tasks: &[Task], inputs: &[String]) -> Result<Vec<String>> {
    let ids: Vec<&str> = tasks.iter().map(|task| task.id.as_str()).collect();
    let mut resolved: Vec<String> = Vec::new();
    for input in inputs {
        for id in resolve::resolve_id_list(&ids, input)? {
            if !resolved.contains(&id) {
                resolved.push(id);
            }
        }
    }
    Ok(resolved)
}

fn index_of(tasks: &[Task], id: &str) -> Result<usize> {
    tasks
        .iter()
        .position(|task| task.id == id)
        .ok_or_else(|| Error::NotFound(id.to_string()))
}

/// Make `target` wait on `blocker`, validating the new edge first
fn add_edge(tasks: &mut [Task], target: &str, blocker: &str) -> Result<bool> {
    let idx = index_of(tasks, target)?;
    if tasks[idx].is_blocked_by(blocker) {
        return Ok(false);
    }
    deps::validate_dependency(tasks, target, blocker)?;
    tasks[idx].blocked_by.push(blocker.to_string());
    tasks[idx].updated = now();
    Ok(true)
}

impl Store {
    /// Create a task and return it as persisted
    pub fn create(&self, options: CreateOptions) -> Result<Task> {
        let title = validate_title(&options.title)?;
        let priority =
            validate_priority(options.priority.unwrap_or(self.config().default_priority))?;
        let description = normalize_description(options.description.as_deref());
        let tags = normalize_tags(&options.tags)?;
        let refs = normalize_refs(&options.refs)?;
        let prefix = self.config().prefix();

        self.mutate(move |tasks| {
            let parent = options
                .parent
                .as_deref()
                .map(|parent| resolve_in(tasks, parent))
                .transpose()?;
            let blocked_by = resolve_all(tasks, &options.blocked_by)?;
            let blocks = resolve_all(tasks, &options.blocks)?;

            let id = {
                let existing: HashSet<&str> = tasks.iter().map(|task| task.id.as_str()).collect();
                generate_id(&prefix, &existing)?
            };

            let mut task = Task::new(id.clone(), title, priority, now());
            task.description = description;
            task.task_type = options.task_type;
            task.tags = tags;
            task.refs = refs;
            task.parent = parent;
            tasks.push(task);

            deps::validate_dependencies(tasks, &id, &blocked_by)?;
            let idx = index_of(tasks, &id)?;
            tasks[idx].blocked_by = blocked_by;
            for target in &blocks {
                add_edge(tasks, target, &id)?;
            }

            Ok(tasks[idx].clone())
        })
    }

    /// Apply field changes to one task
    pub fn update(&self, input: &str, options: UpdateOptions) -> Result<Task> {
        if options.is_empty() {
            return Err(Error::InvalidArgument(
                "nothing to update: pass at least one field to change".to_string(),
            ));
        }
        let title = options.title.as_deref().map(validate_title).transpose()?;
        let priority = options.priority.map(validate_priority).transpose()?;
        let description = options
            .description
            .as_ref()
            .map(|value| normalize_description(value.as_deref()));
        let tags = options.tags.as_deref().map(normalize_tags).transpose()?;
        let refs = options.refs.as_deref().map(normalize_refs).transpose()?;

        self.mutate(move |tasks| {
            let id = resolve_in(tasks, input)?;
            let parent = match options.parent.as_ref() {
                Some(Some(parent)) => Some(Some(resolve_in(tasks, parent)?)),
                Some(None) => Some(None),
                None => None,
            };
            let blocks = resolve_all(tasks, &options.blocks)?;

            let idx = index_of(tasks, &id)?;
            {
                let task = &mut tasks[idx];
                if let Some(title) = title {
                    task.title = title;
                }
                if let Some(description) = description {
                    task.description = description;
                }
                if let Some(priority) = priority {
                    task.priority = priority;
                }
                if let Some(task_type) = options.task_type {
                    task.task_type = task_type;
                }
                if let Some(tags) = tags {
                    task.tags = tags;
                }
                if let Some(refs) = refs {
                    task.refs = refs;
                }
                if let Some(parent) = parent {
                    task.parent = parent;
                }
                task.updated = now();
            }

            for target in &blocks {
                add_edge(tasks, target, &id)?;
            }

            Ok(tasks[idx].clone())
        })
    }

    /// Move a task through the status state machine
    pub fn transition(&self, input: &str, transition: Transition) -> Result<TransitionResult> {
        self.mutate(|tasks| {
            let id = resolve_in(tasks, input)?;
            let idx = index_of(tasks, &id)?;
            transition.apply(&mut tasks[idx], now())
        })
    }

    /// Make `task` wait on `blocker`
    pub fn add_dependency(&self, task: &str, blocker: &str) -> Result<Task> {
        self.mutate(|tasks| {
            let task_id = resolve_in(tasks, task)?;
            let blocker_id = resolve_in(tasks, blocker)?;
            let idx = index_of(tasks, &task_id)?;
            if tasks[idx].is_blocked_by(&blocker_id) {
                return Err(Error::Validation(format!(
                    "{task_id} is already blocked by {blocker_id}"
                )));
            }
            add_edge(tasks, &task_id, &blocker_id)?;
            Ok(tasks[idx].clone())
        })
    }

    /// Remove `blocker` from `task`'s blockers
    pub fn remove_dependency(&self, task: &str, blocker: &str) -> Result<Task> {
        self.mutate(|tasks| {
            let task_id = resolve_in(tasks, task)?;
            let blocker_id = resolve_in(tasks, blocker)?;
            let idx = index_of(tasks, &task_id)?;
            let entry = &mut tasks[idx];
            let before = entry.blocked_by.len();
            entry.blocked_by.retain(|id| id != &blocker_id);
            if entry.blocked_by.len() == before {
                return Err(Error::Validation(format!(
                    "{blocker_id} is not a dependency of {task_id}"
                )));
            }
            entry.updated = now();
            Ok(entry.clone())
        })
    }

    /// Append a note to a task
    pub fn add_note(&self, input: &str, text: &str) -> Result<Task> {
        let text = validate_note_text(text)?;
        self.mutate(move |tasks| {
            let id = resolve_in(tasks, input)?;
            let idx = index_of(tasks, &id)?;
            let at = now();
            let task = &mut tasks[idx];
            task.notes.push(Note { text, created: at });
            task.updated = at;
            Ok(task.clone())
        })
    }

    /// Remove the note at 1-based `index`, returning it
    pub fn remove_note(&self, input: &str, index: usize) -> Result<Note> {
        self.mutate(|tasks| {
            let id = resolve_in(tasks, input)?;
            let idx = index_of(tasks, &id)?;
            let task = &mut tasks[idx];
            if task.notes.is_empty() {
                return Err(Error::InvalidArgument(format!("task {id} has no notes")));
            }
            if index == 0 || index > task.notes.len() {
                return Err(Error::InvalidArgument(format!(
                    "note index {index} is out of range (task {id} has {} notes)",
                    task.notes.len()
                )));
            }
            let note = task.notes.remove(index - 1);
            task.updated = now();
            Ok(note)
        })
    }

    /// Delete tasks and strip them from every surviving task's blockers
    ///
    /// A task whose children are not removed with it cannot be removed.
    pub fn remove(&self, inputs: &[String]) -> Result<RemovalResult> {
        self.mutate(|tasks| {
            let removed = resolve_all(tasks, inputs)?;
            if removed.is_empty() {
                return Err(Error::InvalidArgument(
                    "at least one task id is required".to_string(),
                ));
            }
            let doomed: HashSet<&str> = removed.iter().map(String::as_str).collect();

            for id in &removed {
                let orphans: Vec<&str> = tasks
                    .iter()
                    .filter(|task| task.parent.as_deref() == Some(id.as_str()))
                    .filter(|task| !doomed.contains(task.id.as_str()))
                    .map(|task| task.id.as_str())
                    .collect();
                if !orphans.is_empty() {
                    return Err(Error::Validation(format!(
                        "cannot remove {id} - it has children: {}",
                        orphans.join(", ")
                    )));
                }
            }

            tasks.retain(|task| !doomed.contains(task.id.as_str()));

            let at = now();
            let mut dependencies_updated = Vec::new();
            for task in tasks.iter_mut() {
                let before = task.blocked_by.len();
                task.blocked_by.retain(|id| !doomed.contains(id.as_str()));
                if task.blocked_by.len() != before {
                    task.updated = at;
                    dependencies_updated.push(task.id.clone());
                }
            }

            Ok(RemovalResult {
                removed: removed.clone(),
                dependencies_updated,
            })
        })
    }
}
