//! Task model, field validation, id generation, and the status state machine

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const MAX_TITLE_LEN: usize = 500;
pub const MAX_NOTE_LEN: usize = 500;
pub const MAX_TAG_LEN: usize = 30;
pub const MAX_TAGS: usize = 10;
pub const MAX_REF_LEN: usize = 200;
pub const MAX_REFS: usize = 10;
pub const MIN_PRIORITY: u8 = 0;
pub const MAX_PRIORITY: u8 = 4;

/// Number of random bytes in a generated id (six hex characters)
const ID_RANDOM_BYTES: usize = 3;
const ID_GENERATION_ATTEMPTS: usize = 5;

// =========================================================================
// Timestamps
// =========================================================================

/// Current time at the second precision used in the log
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// `YYYY-MM-DDTHH:MM:SSZ` (de)serialization for UTC timestamps
pub mod timestamp {
    use chrono::{DateTime, SubsecRound, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

    pub fn format(value: &DateTime<Utc>) -> String {
        value.format(FORMAT).to_string()
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(raw).map(|parsed| parsed.with_timezone(&Utc).trunc_subsecs(0))
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => serializer.serialize_str(&super::format(value)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw: Option<String> = Option::deserialize(deserializer)?;
            match raw {
                Some(raw) => super::parse(&raw).map(Some).map_err(serde::de::Error::custom),
                None => Ok(None),
            }
        }
    }
}

// =========================================================================
// Status and type
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Open,
    InProgress,
    Done,
    Cancelled,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Open,
        Status::InProgress,
        Status::Done,
        Status::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::InProgress => "in_progress",
            Status::Done => "done",
            Status::Cancelled => "cancelled",
        }
    }

    /// Done and cancelled tasks no longer block anything
    pub fn is_closed(self) -> bool {
        matches!(self, Status::Done | Status::Cancelled)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Status::Open),
            "in_progress" | "in-progress" => Ok(Status::InProgress),
            "done" => Ok(Status::Done),
            "cancelled" | "canceled" => Ok(Status::Cancelled),
            other => Err(Error::InvalidArgument(format!(
                "invalid status '{other}' (expected open|in_progress|done|cancelled)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Bug,
    Feature,
    Task,
    Chore,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Bug => "bug",
            TaskType::Feature => "feature",
            TaskType::Task => "task",
            TaskType::Chore => "chore",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bug" => Ok(TaskType::Bug),
            "feature" => Ok(TaskType::Feature),
            "task" => Ok(TaskType::Task),
            "chore" => Ok(TaskType::Chore),
            other => Err(Error::InvalidArgument(format!(
                "invalid type '{other}' (expected bug|feature|task|chore)"
            ))),
        }
    }
}

// =========================================================================
// Records
// =========================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub text: String,
    #[serde(with = "timestamp")]
    pub created: DateTime<Utc>,
}

/// One line of `tasks.jsonl`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: Status,
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<TaskType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<Note>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(with = "timestamp")]
    pub created: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated: DateTime<Utc>,
    #[serde(
        default,
        with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub closed: Option<DateTime<Utc>>,
}

impl Task {
    /// A fresh open task; the title is expected to be validated already
    pub fn new(id: impl Into<String>, title: impl Into<String>, priority: u8, at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: Status::Open,
            priority,
            description: None,
            task_type: None,
            tags: Vec::new(),
            refs: Vec::new(),
            notes: Vec::new(),
            blocked_by: Vec::new(),
            parent: None,
            created: at,
            updated: at,
            closed: None,
        }
    }

    pub fn is_blocked_by(&self, id: &str) -> bool {
        self.blocked_by.iter().any(|blocker| blocker == id)
    }

    /// Lower-case the id and every id reference (`parent`, `blocked_by`)
    pub fn normalize_ids(&mut self) {
        self.id = normalize_id(&self.id);
        if let Some(parent) = self.parent.as_mut() {
            *parent = normalize_id(parent);
        }
        for blocker in &mut self.blocked_by {
            *blocker = normalize_id(blocker);
        }
    }
}

// =========================================================================
// Field validation
// =========================================================================

/// Trim and validate a title
pub fn validate_title(raw: &str) -> Result<String> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(Error::InvalidArgument("title cannot be empty".to_string()));
    }
    if title.contains('\n') || title.contains('\r') {
        return Err(Error::InvalidArgument(
            "title cannot contain newlines".to_string(),
        ));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(Error::InvalidArgument(format!(
            "title exceeds {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(title.to_string())
}

pub fn validate_priority(priority: u8) -> Result<u8> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(Error::InvalidArgument(format!(
            "priority must be between {MIN_PRIORITY} and {MAX_PRIORITY}, got {priority}"
        )));
    }
    Ok(priority)
}

/// Treat blank descriptions as absent
pub fn normalize_description(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn is_kebab_case(tag: &str) -> bool {
    !tag.is_empty()
        && tag
            .split('-')
            .all(|part| !part.is_empty() && part.chars().all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit()))
}

/// Lowercase, trim, validate and dedup tags, keeping first occurrences
pub fn normalize_tags<S: AsRef<str>>(raw: &[S]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut tags = Vec::new();
    for tag in raw {
        let tag = tag.as_ref().trim().to_lowercase();
        if tag.is_empty() {
            continue;
        }
        if tag.chars().count() > MAX_TAG_LEN {
            return Err(Error::InvalidArgument(format!(
                "tag '{tag}' exceeds {MAX_TAG_LEN} characters"
            )));
        }
        if !is_kebab_case(&tag) {
            return Err(Error::InvalidArgument(format!(
                "tag '{tag}' must be kebab-case (lowercase letters, digits, single hyphens)"
            )));
        }
        if seen.insert(tag.clone()) {
            tags.push(tag);
        }
    }
    if tags.len() > MAX_TAGS {
        return Err(Error::InvalidArgument(format!(
            "too many tags ({}, max {MAX_TAGS})",
            tags.len()
        )));
    }
    Ok(tags)
}

/// Trim, validate and dedup external references
pub fn normalize_refs<S: AsRef<str>>(raw: &[S]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut refs = Vec::new();
    for value in raw {
        let value = value.as_ref().trim();
        if value.is_empty() {
            continue;
        }
        if value.chars().count() > MAX_REF_LEN {
            return Err(Error::InvalidArgument(format!(
                "ref exceeds {MAX_REF_LEN} characters"
            )));
        }
        if value.contains(',') || value.chars().any(char::is_whitespace) {
            return Err(Error::InvalidArgument(format!(
                "ref '{value}' cannot contain commas or whitespace"
            )));
        }
        if seen.insert(value.to_string()) {
            refs.push(value.to_string());
        }
    }
    if refs.len() > MAX_REFS {
        return Err(Error::InvalidArgument(format!(
            "too many refs ({}, max {MAX_REFS})",
            refs.len()
        )));
    }
    Ok(refs)
}

pub fn validate_note_text(raw: &str) -> Result<String> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(Error::InvalidArgument("note text cannot be empty".to_string()));
    }
    if text.chars().count() > MAX_NOTE_LEN {
        return Err(Error::InvalidArgument(format!(
            "note text exceeds {MAX_NOTE_LEN} characters"
        )));
    }
    Ok(text.to_string())
}

// =========================================================================
// Ids
// =========================================================================

pub fn normalize_id(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// `<alphanumeric prefix>-<six lowercase hex chars>`
pub fn is_valid_id(id: &str) -> bool {
    let Some((prefix, suffix)) = id.rsplit_once('-') else {
        return false;
    };
    !prefix.is_empty()
        && prefix
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit())
        && suffix.len() == ID_RANDOM_BYTES * 2
        && suffix
            .chars()
            .all(|ch| ch.is_ascii_digit() || ('a'..='f').contains(&ch))
}

fn random_suffix() -> String {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    bytes[..ID_RANDOM_BYTES]
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Generate an id not present in `existing`, retrying on collision
pub fn generate_id(prefix: &str, existing: &HashSet<&str>) -> Result<String> {
    generate_id_with(prefix, existing, random_suffix)
}

fn generate_id_with(
    prefix: &str,
    existing: &HashSet<&str>,
    mut suffix: impl FnMut() -> String,
) -> Result<String> {
    for _ in 0..ID_GENERATION_ATTEMPTS {
        let id = format!("{prefix}-{}", suffix());
        if !existing.contains(id.as_str()) {
            return Ok(id);
        }
    }
    Err(Error::Validation(format!(
        "failed to generate unique id after {ID_GENERATION_ATTEMPTS} attempts"
    )))
}

// =========================================================================
// Status transitions
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Done,
    Cancel,
    Reopen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionResult {
    pub id: String,
    pub from: Status,
    pub to: Status,
}

impl Transition {
    pub fn command(self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Done => "done",
            Transition::Cancel => "cancel",
            Transition::Reopen => "reopen",
        }
    }

    pub fn target(self) -> Status {
        match self {
            Transition::Start => Status::InProgress,
            Transition::Done => Status::Done,
            Transition::Cancel => Status::Cancelled,
            Transition::Reopen => Status::Open,
        }
    }

    pub fn allowed_from(self, status: Status) -> bool {
        match self {
            Transition::Start => status == Status::Open,
            Transition::Done => matches!(status, Status::Open | Status::InProgress),
            Transition::Cancel => status != Status::Cancelled,
            Transition::Reopen => status.is_closed(),
        }
    }

    /// Move `task` to the target status, or leave it untouched on error
    pub fn apply(self, task: &mut Task, at: DateTime<Utc>) -> Result<TransitionResult> {
        let from = task.status;
        if !self.allowed_from(from) {
            return Err(Error::Validation(format!(
                "cannot {} task {} - status is '{}'",
                self.command(),
                task.id,
                from
            )));
        }

        let to = self.target();
        task.status = to;
        task.updated = at;
        task.closed = if to.is_closed() { Some(at) } else { None };

        Ok(TransitionResult {
            id: task.id.clone(),
            from,
            to,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(status: Status) -> Task {
        let mut task = Task::new("tick-a1b2c3", "Sample", 2, now());
        task.status = status;
        task
    }

    #[test]
    fn serializes_without_empty_optionals() {
        let at = timestamp::parse("2025-01-08T10:30:00Z").expect("parse");
        let task = Task::new("tick-a1b2c3", "Write tests", 1, at);
        let line = serde_json::to_string(&task).expect("serialize");
        assert_eq!(
            line,
            r#"{"id":"tick-a1b2c3","title":"Write tests","status":"open","priority":1,"created":"2025-01-08T10:30:00Z","updated":"2025-01-08T10:30:00Z"}"#
        );
    }

    #[test]
    fn deserializes_full_record() {
        let line = r#"{"id":"tick-a1b2c3","title":"Fix","status":"in_progress","priority":0,"description":"d","type":"bug","tags":["backend"],"notes":[{"text":"n","created":"2025-01-08T10:31:00Z"}],"blocked_by":["tick-000001"],"parent":"tick-000002","created":"2025-01-08T10:30:00Z","updated":"2025-01-08T10:32:00Z"}"#;
        let task: Task = serde_json::from_str(line).expect("parse");
        assert_eq!(task.status, Status::InProgress);
        assert_eq!(task.task_type, Some(TaskType::Bug));
        assert_eq!(task.notes.len(), 1);
        assert_eq!(task.parent.as_deref(), Some("tick-000002"));
        assert!(task.closed.is_none());
    }

    #[test]
    fn title_rules() {
        assert_eq!(validate_title("  Ship it  ").expect("valid"), "Ship it");
        assert!(validate_title("   ").is_err());
        assert!(validate_title("two\nlines").is_err());
        assert!(validate_title(&"x".repeat(MAX_TITLE_LEN)).is_ok());
        assert!(validate_title(&"x".repeat(MAX_TITLE_LEN + 1)).is_err());
    }

    #[test]
    fn priority_range() {
        assert!(validate_priority(0).is_ok());
        assert!(validate_priority(4).is_ok());
        assert!(validate_priority(5).is_err());
    }

    #[test]
    fn tags_are_normalized_and_deduplicated() {
        let tags = normalize_tags(&[" Backend ", "api-v2", "backend", ""]).expect("valid");
        assert_eq!(tags, vec!["backend".to_string(), "api-v2".to_string()]);
        assert!(normalize_tags(&["bad_tag"]).is_err());
        assert!(normalize_tags(&["-lead"]).is_err());
        assert!(normalize_tags(&["double--dash"]).is_err());

        let many: Vec<String> = (0..11).map(|idx| format!("t{idx}")).collect();
        assert!(normalize_tags(&many).is_err());
    }

    #[test]
    fn refs_reject_whitespace_and_commas() {
        let refs = normalize_refs(&["gh-12", "https://example.com/x", "gh-12"]).expect("valid");
        assert_eq!(refs.len(), 2);
        assert!(normalize_refs(&["a b"]).is_err());
        assert!(normalize_refs(&["a,b"]).is_err());
    }

    #[test]
    fn id_format() {
        assert!(is_valid_id("tick-a1b2c3"));
        assert!(is_valid_id("proj2-000fff"));
        assert!(!is_valid_id("tick-A1B2C3"));
        assert!(!is_valid_id("tick-a1b2"));
        assert!(!is_valid_id("a1b2c3"));
        assert!(!is_valid_id("-a1b2c3"));
    }

    #[test]
    fn generated_ids_are_well_formed() {
        let id = generate_id("tick", &HashSet::new()).expect("id");
        assert!(is_valid_id(&id), "{id}");
    }

    #[test]
    fn id_generation_retries_then_gives_up() {
        let existing: HashSet<&str> = ["tick-aaaaaa"].into_iter().collect();
        let mut calls = 0;
        let id = generate_id_with("tick", &existing, || {
            calls += 1;
            if calls == 1 { "aaaaaa".to_string() } else { "bbbbbb".to_string() }
        })
        .expect("second attempt");
        assert_eq!(id, "tick-bbbbbb");

        let err = generate_id_with("tick", &existing, || "aaaaaa".to_string()).expect_err("exhausted");
        assert!(err.to_string().contains("after 5 attempts"));
    }

    #[test]
    fn transition_table() {
        use Status::*;
        use Transition::*;
        let cases = [
            (Start, Open, true),
            (Start, InProgress, false),
            (Start, Status::Done, false),
            (Transition::Done, Open, true),
            (Transition::Done, InProgress, true),
            (Transition::Done, Status::Done, false),
            (Cancel, Open, true),
            (Cancel, InProgress, true),
            (Cancel, Status::Done, true),
            (Cancel, Cancelled, false),
            (Reopen, Status::Done, true),
            (Reopen, Cancelled, true),
            (Reopen, Open, false),
            (Reopen, InProgress, false),
        ];
        for (transition, from, allowed) in cases {
            assert_eq!(transition.allowed_from(from), allowed, "{transition:?} from {from}");
        }
    }

    #[test]
    fn closing_sets_and_reopen_clears_closed() {
        let mut task = sample(Status::InProgress);
        let at = now();
        let result = Transition::Done.apply(&mut task, at).expect("done");
        assert_eq!(result.from, Status::InProgress);
        assert_eq!(task.closed, Some(at));

        Transition::Reopen.apply(&mut task, at).expect("reopen");
        assert_eq!(task.status, Status::Open);
        assert!(task.closed.is_none());
    }

    #[test]
    fn invalid_transition_leaves_task_untouched() {
        let mut task = sample(Status::Done);
        let before = task.clone();
        let err = Transition::Start.apply(&mut task, now()).expect_err("invalid");
        assert_eq!(
            err.to_string(),
            "cannot start task tick-a1b2c3 - status is 'done'"
        );
        assert_eq!(task, before);
    }
}
