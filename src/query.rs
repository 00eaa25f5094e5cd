//! Read-only queries over the cache
//!
//! Every function takes a connection to a cache that the caller has already
//! brought up to date (see `Store::query`).
//!
//! A task is *ready* when it is open, every blocker is done or cancelled,
//! it has no open or in-progress child, and no ancestor in its parent chain
//! has an unresolved blocker. An open task that is not ready is *blocked*.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, Type, Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::task::{timestamp, Note, Status, Task, TaskType, MAX_PRIORITY};

/// Common table expressions shared by readiness queries.
///
/// `ancestry` pairs every task with every task above it in the parent
/// chain; `UNION` keeps it finite even if the chain loops.
const ANCESTRY_CTE: &str = r#"
ancestry(task_id, ancestor_id) AS (
  SELECT id, parent FROM tasks WHERE parent IS NOT NULL
  UNION
  SELECT a.task_id, p.parent
  FROM ancestry a JOIN tasks p ON p.id = a.ancestor_id
  WHERE p.parent IS NOT NULL
),
blocked_ancestry(task_id) AS (
  SELECT DISTINCT a.task_id
  FROM ancestry a
  JOIN dependencies d ON d.task_id = a.ancestor_id
  JOIN tasks b ON b.id = d.blocked_by
  WHERE b.status NOT IN ('done', 'cancelled')
)"#;

const DESCENDANTS_CTE: &str = r#"
descendants(id) AS (
  SELECT id FROM tasks WHERE parent = ?
  UNION
  SELECT c.id FROM tasks c JOIN descendants d ON c.parent = d.id
)"#;

/// Conditions that, together with `status = 'open'`, make task `t` ready
const READY_CONDITIONS: &str = r#"(
  NOT EXISTS (
    SELECT 1 FROM dependencies d JOIN tasks b ON b.id = d.blocked_by
    WHERE d.task_id = t.id AND b.status NOT IN ('done', 'cancelled')
  )
  AND NOT EXISTS (
    SELECT 1 FROM tasks c WHERE c.parent = t.id AND c.status IN ('open', 'in_progress')
  )
  AND t.id NOT IN (SELECT task_id FROM blocked_ancestry)
)"#;

// =========================================================================
// Result types
// =========================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub id: String,
    pub title: String,
    pub status: Status,
    pub priority: u8,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub task_type: Option<TaskType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(with = "timestamp")]
    pub created: DateTime<Utc>,
}

/// A blocker or child as shown in task detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelatedTask {
    pub id: String,
    pub title: String,
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: Task,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_title: Option<String>,
    pub blockers: Vec<RelatedTask>,
    pub children: Vec<RelatedTask>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total: usize,
    pub open: usize,
    pub in_progress: usize,
    pub done: usize,
    pub cancelled: usize,
    pub ready: usize,
    pub blocked: usize,
    /// Task counts indexed by priority 0..=4
    pub by_priority: [usize; MAX_PRIORITY as usize + 1],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Readiness {
    #[default]
    Any,
    Ready,
    Blocked,
}

/// Filters for [`list`]; all set filters must hold
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<Status>,
    pub priority: Option<u8>,
    pub task_type: Option<TaskType>,
    /// Restrict to descendants of this (resolved) task id, excluding it
    pub parent: Option<String>,
    /// Tags within a group must all match; any group may match
    pub tag_groups: Vec<Vec<String>>,
    pub readiness: Readiness,
}

impl ListFilter {
    pub fn ready() -> Self {
        Self {
            readiness: Readiness::Ready,
            ..Self::default()
        }
    }

    pub fn blocked() -> Self {
        Self {
            readiness: Readiness::Blocked,
            ..Self::default()
        }
    }
}

// =========================================================================
// Row decoding
// =========================================================================

impl FromSql for Status {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        raw.parse()
            .map_err(|_| FromSqlError::Other(format!("invalid status '{raw}'").into()))
    }
}

impl FromSql for TaskType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        raw.parse()
            .map_err(|_| FromSqlError::Other(format!("invalid task type '{raw}'").into()))
    }
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    timestamp::parse(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn optional_timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        timestamp::parse(&raw)
            .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
    })
    .transpose()
}

fn related_rows(conn: &Connection, sql: &str, id: &str) -> Result<Vec<RelatedTask>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![id], |row| {
        Ok(RelatedTask {
            id: row.get(0)?,
            title: row.get(1)?,
            status: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn string_column(conn: &Connection, sql: &str, id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn task_exists(conn: &Connection, id: &str) -> Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM tasks WHERE id = ?1", params![id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

// =========================================================================
// Queries
// =========================================================================

/// All task ids, sorted
pub fn task_ids(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM tasks ORDER BY id")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Tasks matching `filter`, ordered by priority then creation time
pub fn list(conn: &Connection, filter: &ListFilter) -> Result<Vec<TaskSummary>> {
    let mut values: Vec<Value> = Vec::new();
    let mut ctes = vec![ANCESTRY_CTE];
    let mut conditions: Vec<String> = Vec::new();

    if let Some(parent) = filter.parent.as_deref() {
        if !task_exists(conn, parent)? {
            return Err(Error::NotFound(parent.to_string()));
        }
        ctes.push(DESCENDANTS_CTE);
        values.push(Value::Text(parent.to_string()));
        conditions.push("t.id IN (SELECT id FROM descendants)".to_string());
        conditions.push("t.id != ?".to_string());
        values.push(Value::Text(parent.to_string()));
    }

    if let Some(status) = filter.status {
        conditions.push("t.status = ?".to_string());
        values.push(Value::Text(status.as_str().to_string()));
    }
    if let Some(priority) = filter.priority {
        conditions.push("t.priority = ?".to_string());
        values.push(Value::Integer(i64::from(priority)));
    }
    if let Some(task_type) = filter.task_type {
        conditions.push("t.task_type = ?".to_string());
        values.push(Value::Text(task_type.as_str().to_string()));
    }

    let groups: Vec<String> = filter
        .tag_groups
        .iter()
        .filter(|group| !group.is_empty())
        .map(|group| {
            let clauses: Vec<&str> = group
                .iter()
                .map(|tag| {
                    values.push(Value::Text(tag.clone()));
                    "EXISTS (SELECT 1 FROM task_tags tg WHERE tg.task_id = t.id AND tg.tag = ?)"
                })
                .collect();
            format!("({})", clauses.join(" AND "))
        })
        .collect();
    if !groups.is_empty() {
        conditions.push(format!("({})", groups.join(" OR ")));
    }

    match filter.readiness {
        Readiness::Any => {}
        Readiness::Ready => conditions.push(format!("t.status = 'open' AND {READY_CONDITIONS}")),
        Readiness::Blocked => {
            conditions.push(format!("t.status = 'open' AND NOT {READY_CONDITIONS}"))
        }
    }

    let mut sql = format!(
        "WITH RECURSIVE {}\nSELECT t.id, t.title, t.status, t.priority, t.task_type, t.parent, t.created\nFROM tasks t",
        ctes.join(",")
    );
    if !conditions.is_empty() {
        sql.push_str("\nWHERE ");
        sql.push_str(&conditions.join("\n  AND "));
    }
    sql.push_str("\nORDER BY t.priority ASC, t.created ASC, t.id ASC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
        Ok(TaskSummary {
            id: row.get(0)?,
            title: row.get(1)?,
            status: row.get(2)?,
            priority: row.get(3)?,
            task_type: row.get(4)?,
            parent: row.get(5)?,
            created: timestamp_at(row, 6)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Open tasks that can be worked on now
pub fn ready(conn: &Connection) -> Result<Vec<TaskSummary>> {
    list(conn, &ListFilter::ready())
}

/// Open tasks that are waiting on something
pub fn blocked(conn: &Connection) -> Result<Vec<TaskSummary>> {
    list(conn, &ListFilter::blocked())
}

/// Reassemble a full task record from the cache
pub fn load_task(conn: &Connection, id: &str) -> Result<Task> {
    let task = conn
        .query_row(
            "SELECT id, title, status, priority, description, task_type, parent, created, updated, closed
             FROM tasks WHERE id = ?1",
            params![id],
            |row| {
                Ok(Task {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    status: row.get(2)?,
                    priority: row.get(3)?,
                    description: row.get(4)?,
                    task_type: row.get(5)?,
                    tags: Vec::new(),
                    refs: Vec::new(),
                    notes: Vec::new(),
                    blocked_by: Vec::new(),
                    parent: row.get(6)?,
                    created: timestamp_at(row, 7)?,
                    updated: timestamp_at(row, 8)?,
                    closed: optional_timestamp_at(row, 9)?,
                })
            },
        )
        .optional()?;
    let mut task = task.ok_or_else(|| Error::NotFound(id.to_string()))?;

    task.blocked_by = string_column(
        conn,
        "SELECT blocked_by FROM dependencies WHERE task_id = ?1 ORDER BY position",
        id,
    )?;
    task.tags = string_column(
        conn,
        "SELECT tag FROM task_tags WHERE task_id = ?1 ORDER BY position",
        id,
    )?;
    task.refs = string_column(
        conn,
        "SELECT ref_value FROM task_refs WHERE task_id = ?1 ORDER BY position",
        id,
    )?;

    let mut stmt =
        conn.prepare("SELECT text, created FROM task_notes WHERE task_id = ?1 ORDER BY position")?;
    let notes = stmt.query_map(params![id], |row| {
        Ok(Note {
            text: row.get(0)?,
            created: timestamp_at(row, 1)?,
        })
    })?;
    task.notes = notes.collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(task)
}

/// One task with its parent title, direct blockers and direct children
pub fn detail(conn: &Connection, id: &str) -> Result<TaskDetail> {
    let task = load_task(conn, id)?;

    let parent_title = match task.parent.as_deref() {
        Some(parent) => conn
            .query_row(
                "SELECT title FROM tasks WHERE id = ?1",
                params![parent],
                |row| row.get::<_, String>(0),
            )
            .optional()?,
        None => None,
    };

    let blockers = related_rows(
        conn,
        "SELECT b.id, b.title, b.status
         FROM dependencies d JOIN tasks b ON b.id = d.blocked_by
         WHERE d.task_id = ?1
         ORDER BY d.position",
        id,
    )?;
    let children = related_rows(
        conn,
        "SELECT id, title, status FROM tasks WHERE parent = ?1
         ORDER BY priority ASC, created ASC, id ASC",
        id,
    )?;

    Ok(TaskDetail {
        task,
        parent_title,
        blockers,
        children,
    })
}

/// Aggregate counts by status, priority and readiness
pub fn stats(conn: &Connection) -> Result<Stats> {
    let mut stats = Stats::default();

    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, Status>(0)?, row.get::<_, i64>(1)?)))?;
    for row in rows {
        let (status, count) = row?;
        let count = usize::try_from(count).unwrap_or(0);
        stats.total += count;
        match status {
            Status::Open => stats.open = count,
            Status::InProgress => stats.in_progress = count,
            Status::Done => stats.done = count,
            Status::Cancelled => stats.cancelled = count,
        }
    }

    let mut stmt = conn.prepare("SELECT priority, COUNT(*) FROM tasks GROUP BY priority")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;
    for row in rows {
        let (priority, count) = row?;
        if let Some(slot) = usize::try_from(priority)
            .ok()
            .and_then(|idx| stats.by_priority.get_mut(idx))
        {
            *slot = usize::try_from(count).unwrap_or(0);
        }
    }

    stats.ready = count_where(conn, &format!("t.status = 'open' AND {READY_CONDITIONS}"))?;
    stats.blocked = count_where(conn, &format!("t.status = 'open' AND NOT {READY_CONDITIONS}"))?;
    Ok(stats)
}

fn count_where(conn: &Connection, condition: &str) -> Result<usize> {
    let sql = format!("WITH RECURSIVE {ANCESTRY_CTE}\nSELECT COUNT(*) FROM tasks t WHERE {condition}");
    let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(usize::try_from(count).unwrap_or(0))
}
