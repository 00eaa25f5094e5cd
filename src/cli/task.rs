//! tick task command implementations.

use serde::Serialize;

use crate::error::Result;
use crate::ops::{CreateOptions, RemovalResult, UpdateOptions};
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::query::{self, ListFilter, Readiness, Stats, TaskDetail, TaskSummary};
use crate::store::Store;
use crate::task::{timestamp, Note, Status, Task, TaskType, Transition, TransitionResult};

pub struct CreateArgs {
    pub title: String,
    pub priority: Option<u8>,
    pub description: Option<String>,
    pub task_type: Option<String>,
    pub tags: Vec<String>,
    pub refs: Vec<String>,
    pub parent: Option<String>,
    pub blocked_by: Vec<String>,
    pub blocks: Vec<String>,
}

/// `Some(None)` clears the field
pub struct UpdateArgs {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<u8>,
    pub task_type: Option<Option<String>>,
    pub tags: Option<Option<Vec<String>>>,
    pub refs: Option<Option<Vec<String>>>,
    pub parent: Option<Option<String>>,
    pub blocks: Vec<String>,
}

pub struct ListArgs {
    pub status: Option<String>,
    pub priority: Option<u8>,
    pub task_type: Option<String>,
    pub parent: Option<String>,
    /// Each entry is a comma-separated AND group
    pub tags: Vec<String>,
    pub ready: bool,
    pub blocked: bool,
}

#[derive(Serialize)]
struct TaskListOutput {
    total: usize,
    tasks: Vec<TaskSummary>,
}

#[derive(Serialize)]
struct RebuildOutput {
    tasks: usize,
}

#[derive(Serialize)]
struct NoteRemovedOutput {
    id: String,
    index: usize,
    note: Note,
}

pub fn run_create(store: &Store, args: CreateArgs, output: OutputOptions) -> Result<()> {
    let task_type = args.task_type.as_deref().map(str::parse::<TaskType>).transpose()?;
    let task = store.create(CreateOptions {
        title: args.title,
        priority: args.priority,
        description: args.description,
        task_type,
        tags: args.tags,
        refs: args.refs,
        parent: args.parent,
        blocked_by: args.blocked_by,
        blocks: args.blocks,
    })?;

    let mut human = HumanOutput::new(format!("Created {}", task.id));
    push_task_fields(&mut human, &task);
    human.push_next_step(format!("tick start {}", task.id));

    emit_success(output, "create", &task, Some(&human))
}

pub fn run_update(store: &Store, args: UpdateArgs, output: OutputOptions) -> Result<()> {
    let task_type = match args.task_type {
        Some(Some(raw)) => Some(Some(raw.parse::<TaskType>()?)),
        Some(None) => Some(None),
        None => None,
    };
    let task = store.update(
        &args.id,
        UpdateOptions {
            title: args.title,
            description: args.description,
            priority: args.priority,
            task_type,
            tags: args.tags.map(Option::unwrap_or_default),
            refs: args.refs.map(Option::unwrap_or_default),
            parent: args.parent,
            blocks: args.blocks,
        },
    )?;

    let mut human = HumanOutput::new(format!("Updated {}", task.id));
    push_task_fields(&mut human, &task);

    emit_success(output, "update", &task, Some(&human))
}

pub fn run_show(store: &Store, id: &str, output: OutputOptions) -> Result<()> {
    let detail = store.query(|conn| {
        let ids = query::task_ids(conn)?;
        let resolved = crate::resolve::resolve_id(&ids, id)?;
        query::detail(conn, &resolved)
    })?;

    let mut human = HumanOutput::new(format!("{} {}", detail.task.id, detail.task.title));
    push_detail_fields(&mut human, &detail);

    emit_success(output, "show", &detail, Some(&human))
}

pub fn run_list(store: &Store, args: ListArgs, output: OutputOptions) -> Result<()> {
    let status = args.status.as_deref().map(str::parse::<Status>).transpose()?;
    let task_type = args.task_type.as_deref().map(str::parse::<TaskType>).transpose()?;
    let readiness = if args.ready {
        Readiness::Ready
    } else if args.blocked {
        Readiness::Blocked
    } else {
        Readiness::Any
    };
    let tag_groups = parse_tag_groups(&args.tags);

    let tasks = store.query(|conn| {
        let parent = match args.parent.as_deref() {
            Some(raw) => Some(crate::resolve::resolve_id(query::task_ids(conn)?, raw)?),
            None => None,
        };
        let filter = ListFilter {
            status,
            priority: args.priority,
            task_type,
            parent,
            tag_groups,
            readiness,
        };
        query::list(conn, &filter)
    })?;

    emit_task_list(output, "list", "Tasks", tasks)
}

pub fn run_ready(store: &Store, output: OutputOptions) -> Result<()> {
    let tasks = store.query(query::ready)?;
    emit_task_list(output, "ready", "Ready tasks", tasks)
}

pub fn run_blocked(store: &Store, output: OutputOptions) -> Result<()> {
    let tasks = store.query(query::blocked)?;
    emit_task_list(output, "blocked", "Blocked tasks", tasks)
}

pub fn run_stats(store: &Store, output: OutputOptions) -> Result<()> {
    let stats = store.query(query::stats)?;

    let mut human = HumanOutput::new("Task stats");
    push_stats_fields(&mut human, &stats);

    emit_success(output, "stats", &stats, Some(&human))
}

pub fn run_transition(
    store: &Store,
    id: &str,
    transition: Transition,
    output: OutputOptions,
) -> Result<()> {
    let result = store.transition(id, transition)?;
    let human = transition_human(&result);
    emit_success(output, transition.command(), &result, Some(&human))
}

pub fn run_dep_add(store: &Store, task: &str, blocker: &str, output: OutputOptions) -> Result<()> {
    let task = store.add_dependency(task, blocker)?;
    let mut human = HumanOutput::new(format!("Added dependency to {}", task.id));
    human.push_field("Blocked by", task.blocked_by.join(", "));
    emit_success(output, "dep add", &task, Some(&human))
}

pub fn run_dep_rm(store: &Store, task: &str, blocker: &str, output: OutputOptions) -> Result<()> {
    let task = store.remove_dependency(task, blocker)?;
    let mut human = HumanOutput::new(format!("Removed dependency from {}", task.id));
    human.push_field(
        "Blocked by",
        if task.blocked_by.is_empty() {
            "none".to_string()
        } else {
            task.blocked_by.join(", ")
        },
    );
    emit_success(output, "dep rm", &task, Some(&human))
}

pub fn run_note_add(store: &Store, id: &str, text: &str, output: OutputOptions) -> Result<()> {
    let task = store.add_note(id, text)?;
    let mut human = HumanOutput::new(format!("Added note to {}", task.id));
    human.push_field("Notes", task.notes.len().to_string());
    emit_success(output, "note add", &task, Some(&human))
}

pub fn run_note_rm(store: &Store, id: &str, index: usize, output: OutputOptions) -> Result<()> {
    let resolved = store.resolve_id(id)?;
    let note = store.remove_note(&resolved, index)?;
    let mut human = HumanOutput::new(format!("Removed note {index} from {resolved}"));
    human.push_line("Note", note.text.clone());
    let data = NoteRemovedOutput {
        id: resolved,
        index,
        note,
    };
    emit_success(output, "note rm", &data, Some(&human))
}

pub fn run_remove(store: &Store, ids: &[String], output: OutputOptions) -> Result<()> {
    let result = store.remove(ids)?;
    let human = removal_human(&result);
    emit_success(output, "remove", &result, Some(&human))
}

pub fn run_rebuild(store: &Store, output: OutputOptions) -> Result<()> {
    let tasks = store.rebuild()?;
    let mut human = HumanOutput::new("Cache rebuilt");
    human.push_field("Tasks", tasks.to_string());
    emit_success(output, "rebuild", &RebuildOutput { tasks }, Some(&human))
}

fn emit_task_list(
    output: OutputOptions,
    command: &str,
    header: &str,
    tasks: Vec<TaskSummary>,
) -> Result<()> {
    let mut human = HumanOutput::new(header);
    human.push_field("Total", tasks.len().to_string());
    for task in &tasks {
        human.push_line("Tasks", summary_line(task));
    }

    let data = TaskListOutput {
        total: tasks.len(),
        tasks,
    };
    emit_success(output, command, &data, Some(&human))
}

/// `a,b` means both tags; each flag occurrence is an alternative
fn parse_tag_groups(raw: &[String]) -> Vec<Vec<String>> {
    raw.iter()
        .map(|group| {
            group
                .split(',')
                .map(|tag| tag.trim().to_lowercase())
                .filter(|tag| !tag.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|group| !group.is_empty())
        .collect()
}

fn summary_line(task: &TaskSummary) -> String {
    let mut line = format!("[{}][P{}] {} {}", task.status, task.priority, task.id, task.title);
    if let Some(task_type) = task.task_type {
        line.push_str(&format!(" ({task_type})"));
    }
    line
}

fn push_task_fields(human: &mut HumanOutput, task: &Task) {
    human.push_field("Title", task.title.clone());
    human.push_field("Status", task.status.to_string());
    human.push_field("Priority", task.priority.to_string());
    if let Some(task_type) = task.task_type {
        human.push_field("Type", task_type.to_string());
    }
    if let Some(parent) = task.parent.as_ref() {
        human.push_field("Parent", parent.clone());
    }
    if !task.blocked_by.is_empty() {
        human.push_field("Blocked by", task.blocked_by.join(", "));
    }
    if !task.tags.is_empty() {
        human.push_field("Tags", task.tags.join(", "));
    }
}

fn push_detail_fields(human: &mut HumanOutput, detail: &TaskDetail) {
    let task = &detail.task;
    push_task_fields(human, task);
    if let Some(title) = detail.parent_title.as_ref() {
        human.push_field("Parent title", title.clone());
    }
    if !task.refs.is_empty() {
        human.push_field("Refs", task.refs.join(", "));
    }
    human.push_field("Created", timestamp::format(&task.created));
    human.push_field("Updated", timestamp::format(&task.updated));
    if let Some(closed) = task.closed.as_ref() {
        human.push_field("Closed", timestamp::format(closed));
    }
    if let Some(description) = task.description.as_ref() {
        for line in description.lines() {
            human.push_line("Description", line);
        }
    }
    for blocker in &detail.blockers {
        human.push_line(
            "Blocked by",
            format!("{} [{}] {}", blocker.id, blocker.status, blocker.title),
        );
    }
    for child in &detail.children {
        human.push_line(
            "Children",
            format!("{} [{}] {}", child.id, child.status, child.title),
        );
    }
    for (idx, note) in task.notes.iter().enumerate() {
        human.push_line(
            "Notes",
            format!("{}. [{}] {}", idx + 1, timestamp::format(&note.created), note.text),
        );
    }
}

fn push_stats_fields(human: &mut HumanOutput, stats: &Stats) {
    human.push_field("Total", stats.total.to_string());
    human.push_field("Open", stats.open.to_string());
    human.push_field("In progress", stats.in_progress.to_string());
    human.push_field("Done", stats.done.to_string());
    human.push_field("Cancelled", stats.cancelled.to_string());
    human.push_field("Ready", stats.ready.to_string());
    human.push_field("Blocked", stats.blocked.to_string());
    for (priority, count) in stats.by_priority.iter().enumerate() {
        human.push_line("By priority", format!("P{priority}: {count}"));
    }
}

fn transition_human(result: &TransitionResult) -> HumanOutput {
    let mut human = HumanOutput::new(format!("{}: {} → {}", result.id, result.from, result.to));
    if result.to == Status::InProgress {
        human.push_next_step(format!("tick done {}", result.id));
    }
    human
}

fn removal_human(result: &RemovalResult) -> HumanOutput {
    let mut human = HumanOutput::new(format!("Removed {} task(s)", result.removed.len()));
    for id in &result.removed {
        human.push_line("Removed", id.clone());
    }
    if !result.dependencies_updated.is_empty() {
        human.push_field(
            "Dependencies updated",
            result.dependencies_updated.join(", "),
        );
    }
    human
}
