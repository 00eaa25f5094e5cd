mod support;

use std::collections::BTreeSet;
use std::fs;

use tick::cache;
use tick::error::Error;
use tick::jsonl;
use tick::ops::{CreateOptions, UpdateOptions};
use tick::query::{self, ListFilter, TaskSummary};
use tick::task::{timestamp, Note, Status, Task, TaskType, Transition};

use support::TestProject;

fn id_set(tasks: &[TaskSummary]) -> BTreeSet<String> {
    tasks.iter().map(|task| task.id.clone()).collect()
}

fn set(ids: &[&String]) -> BTreeSet<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

fn child_of(project: &TestProject, title: &str, parent: &str, blocked_by: &[&String]) -> Task {
    project
        .create_with(CreateOptions {
            title: title.to_string(),
            parent: Some(parent.to_string()),
            blocked_by: blocked_by.iter().map(|id| id.to_string()).collect(),
            ..CreateOptions::default()
        })
        .expect("create child")
}

#[test]
fn chained_dependencies_release_one_task_at_a_time() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::init()?;
    let store = project.store();

    let e = project.create("Epic")?;
    let a = child_of(&project, "A", &e.id, &[]);
    let b = child_of(&project, "B", &e.id, &[&a.id]);
    let c = child_of(&project, "C", &e.id, &[&b.id]);
    let d = child_of(&project, "D", &e.id, &[&b.id, &c.id]);

    let ready = store.query(query::ready)?;
    assert_eq!(id_set(&ready), set(&[&a.id]));
    let blocked = store.query(query::blocked)?;
    assert_eq!(id_set(&blocked), set(&[&b.id, &c.id, &d.id, &e.id]));

    let steps = [(&a, &b), (&b, &c), (&c, &d), (&d, &e)];
    for (finished, next) in steps {
        store.transition(&finished.id, Transition::Done)?;
        let ready = store.query(query::ready)?;
        assert_eq!(id_set(&ready), set(&[&next.id]), "after finishing {}", finished.title);
    }

    store.transition(&e.id, Transition::Done)?;
    assert!(store.query(query::ready)?.is_empty());
    let done = store.query(|conn| {
        query::list(
            conn,
            &ListFilter {
                status: Some(Status::Done),
                ..ListFilter::default()
            },
        )
    })?;
    assert_eq!(done.len(), 5);
    Ok(())
}

#[test]
fn blocked_ancestor_blocks_descendants() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::init()?;
    let store = project.store();

    let gate = project.create("Gate")?;
    let epic = project.create_with(CreateOptions {
        title: "Epic".to_string(),
        blocked_by: vec![gate.id.clone()],
        ..CreateOptions::default()
    })?;
    let story = child_of(&project, "Story", &epic.id, &[]);
    let leaf = child_of(&project, "Leaf", &story.id, &[]);

    let ready = store.query(query::ready)?;
    assert_eq!(id_set(&ready), set(&[&gate.id]));
    let blocked = store.query(query::blocked)?;
    assert!(id_set(&blocked).contains(&leaf.id));

    store.transition(&gate.id, Transition::Cancel)?;
    let ready = store.query(query::ready)?;
    assert_eq!(id_set(&ready), set(&[&leaf.id]));
    Ok(())
}

#[test]
fn ready_and_blocked_partition_open_tasks() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::init()?;
    let store = project.store();

    let a = project.create("A")?;
    project.create_with(CreateOptions {
        title: "B".to_string(),
        blocked_by: vec![a.id.clone()],
        ..CreateOptions::default()
    })?;
    let c = project.create("C")?;
    store.transition(&c.id, Transition::Start)?;
    child_of(&project, "child", &a.id, &[]);

    let stats = store.query(query::stats)?;
    let ready = store.query(query::ready)?;
    let blocked = store.query(query::blocked)?;
    assert_eq!(stats.ready, ready.len());
    assert_eq!(stats.blocked, blocked.len());
    assert_eq!(stats.open, ready.len() + blocked.len());
    assert!(ready.iter().chain(blocked.iter()).all(|task| task.status == Status::Open));
    assert!(id_set(&ready).is_disjoint(&id_set(&blocked)));
    Ok(())
}

#[test]
fn cycle_rejection_leaves_both_tasks_unchanged() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::init()?;
    let store = project.store();

    let a = project.create("A")?;
    let b = project.create("B")?;
    store.add_dependency(&a.id, &b.id)?;
    let before = project.read_log()?;

    let err = store.add_dependency(&b.id, &a.id).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(
        err.to_string(),
        format!("cannot add dependency - creates cycle: {} → {} → {}", b.id, a.id, b.id)
    );

    assert_eq!(project.read_log()?, before);
    let a_now = store.query(|conn| query::load_task(conn, &a.id))?;
    let b_now = store.query(|conn| query::load_task(conn, &b.id))?;
    assert_eq!(a_now.blocked_by, vec![b.id.clone()]);
    assert!(b_now.blocked_by.is_empty());
    Ok(())
}

#[test]
fn removal_strips_blocked_by_and_nothing_else() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::init()?;
    let store = project.store();

    let gone = project.create("Gone")?;
    let keep = project.create("Keep")?;
    let waiting = project.create_with(CreateOptions {
        title: "Waiting".to_string(),
        blocked_by: vec![gone.id.clone(), keep.id.clone()],
        tags: vec!["backend".to_string()],
        ..CreateOptions::default()
    })?;
    let before = store.query(|conn| query::load_task(conn, &waiting.id))?;

    let result = store.remove(&[gone.id.clone()])?;
    assert_eq!(result.removed, vec![gone.id.clone()]);
    assert_eq!(result.dependencies_updated, vec![waiting.id.clone()]);

    let after = store.query(|conn| query::load_task(conn, &waiting.id))?;
    assert_eq!(after.blocked_by, vec![keep.id.clone()]);
    assert_eq!(after.title, before.title);
    assert_eq!(after.tags, before.tags);
    assert_eq!(after.status, before.status);
    assert_eq!(after.created, before.created);
    assert!(!project.read_log()?.contains(&gone.id));
    Ok(())
}

#[test]
fn log_round_trips_every_field() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::init()?;
    let at = timestamp::parse("2025-02-03T04:05:06Z")?;

    let mut parent = Task::new("tick-000001", "Parent", 0, at);
    parent.status = Status::Done;
    parent.closed = Some(at);
    let mut full = Task::new("tick-abcdef", "Everything", 3, at);
    full.description = Some("multi\nline".to_string());
    full.task_type = Some(TaskType::Feature);
    full.tags = vec!["ui".to_string(), "needs-review".to_string()];
    full.refs = vec!["gh-12".to_string(), "https://example.com/x".to_string()];
    full.notes = vec![Note {
        text: "first".to_string(),
        created: at,
    }];
    full.blocked_by = vec!["tick-000001".to_string()];
    full.parent = None;
    let tasks = vec![parent, full];

    jsonl::write_all(&project.tasks_file(), &tasks)?;
    let log = jsonl::read_all(&project.tasks_file())?;
    assert!(log.is_clean());
    assert_eq!(log.tasks, tasks);

    let loaded = project.store().query(|conn| query::load_task(conn, "tick-abcdef"))?;
    assert_eq!(loaded, tasks[1]);
    Ok(())
}

#[test]
fn rebuild_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::init()?;
    let store = project.store();
    let a = project.create("A")?;
    project.create_with(CreateOptions {
        title: "B".to_string(),
        blocked_by: vec![a.id.clone()],
        ..CreateOptions::default()
    })?;

    store.rebuild()?;
    let first_hash = cache::stored_watermark(&project.cache_file())?;
    let first_list = store.query(|conn| query::list(conn, &ListFilter::default()))?;
    let first_stats = store.query(query::stats)?;

    store.rebuild()?;
    let second_hash = cache::stored_watermark(&project.cache_file())?;
    let second_list = store.query(|conn| query::list(conn, &ListFilter::default()))?;
    let second_stats = store.query(query::stats)?;

    assert_eq!(first_hash, second_hash);
    assert_eq!(first_hash, Some(cache::watermark(&fs::read(project.tasks_file())?)));
    assert_eq!(first_list, second_list);
    assert_eq!(first_stats, second_stats);
    Ok(())
}

#[test]
fn other_handles_see_committed_changes() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::init()?;
    let other = project.reopen()?;

    let task = project.create("Shared")?;
    let seen = other.query(|conn| query::load_task(conn, &task.id))?;
    assert_eq!(seen.title, "Shared");

    other.update(
        &task.id,
        UpdateOptions {
            title: Some("Renamed elsewhere".to_string()),
            ..UpdateOptions::default()
        },
    )?;
    let seen = project.store().query(|conn| query::load_task(conn, &task.id))?;
    assert_eq!(seen.title, "Renamed elsewhere");
    Ok(())
}

#[test]
fn corrupt_cache_is_replaced_silently() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::init()?;
    let task = project.create("Survivor")?;
    fs::write(project.cache_file(), b"this is not a sqlite database")?;

    let ids = project.store().query(query::task_ids)?;
    assert_eq!(ids, vec![task.id.clone()]);
    Ok(())
}

#[test]
fn partial_ids_resolve_inside_operations() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::init()?;
    let task = project.create("Short")?;
    let hex = task.id.rsplit_once('-').map(|(_, hex)| hex).unwrap_or_default();

    let result = project.store().transition(&hex[..4], Transition::Start)?;
    assert_eq!(result.id, task.id);

    let err = project.store().transition("zzz", Transition::Done).unwrap_err();
    assert_eq!(err.to_string(), "task 'zzz' not found");
    Ok(())
}
