//! Dependency-graph validation
//!
//! `blocked_by` edges point from a task to each of its blockers. The graph
//! must stay acyclic, and a task may not be blocked by its own parent or
//! child. Checks run over the full candidate task set before anything is
//! written.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{Error, Result};
use crate::task::Task;

fn index(tasks: &[Task]) -> HashMap<&str, &Task> {
    tasks.iter().map(|task| (task.id.as_str(), task)).collect()
}

fn format_path(path: &[&str]) -> String {
    path.join(" → ")
}

/// Check that `task_id` may be blocked by `blocker_id`
pub fn validate_dependency(tasks: &[Task], task_id: &str, blocker_id: &str) -> Result<()> {
    if task_id == blocker_id {
        return Err(Error::Validation(format!(
            "cannot add dependency - creates cycle: {}",
            format_path(&[task_id, task_id])
        )));
    }

    let by_id = index(tasks);
    let task = by_id
        .get(task_id)
        .ok_or_else(|| Error::NotFound(task_id.to_string()))?;
    let blocker = by_id
        .get(blocker_id)
        .ok_or_else(|| Error::NotFound(blocker_id.to_string()))?;

    if task.parent.as_deref() == Some(blocker_id) {
        return Err(Error::Validation(format!(
            "cannot add dependency - {task_id} cannot be blocked by its parent {blocker_id}"
        )));
    }
    if blocker.parent.as_deref() == Some(task_id) {
        return Err(Error::Validation(format!(
            "cannot add dependency - {task_id} cannot be blocked by its child {blocker_id}"
        )));
    }

    if let Some(path) = path_between(&by_id, blocker_id, task_id) {
        let mut cycle = vec![task_id];
        cycle.extend(path);
        return Err(Error::Validation(format!(
            "cannot add dependency - creates cycle: {}",
            format_path(&cycle)
        )));
    }

    Ok(())
}

/// Check a batch of new blockers for one task before any edge is written
///
/// Every new edge starts at `task_id`, so no two of them can close a cycle
/// together; each is checked against `tasks` as given. Blockers already on
/// the task are skipped.
pub fn validate_dependencies<S: AsRef<str>>(tasks: &[Task], task_id: &str, blockers: &[S]) -> Result<()> {
    let task = tasks
        .iter()
        .find(|task| task.id == task_id)
        .ok_or_else(|| Error::NotFound(task_id.to_string()))?;
    for blocker in blockers {
        let blocker = blocker.as_ref();
        if !task.is_blocked_by(blocker) {
            validate_dependency(tasks, task_id, blocker)?;
        }
    }
    Ok(())
}

/// Breadth-first search along `blocked_by` edges, returning the id path
/// `from → … → to` if `to` is reachable
fn path_between<'a>(by_id: &HashMap<&'a str, &'a Task>, from: &'a str, to: &str) -> Option<Vec<&'a str>> {
    let mut came_from: HashMap<&str, &str> = HashMap::new();
    let mut visited: HashSet<&str> = HashSet::from([from]);
    let mut queue = VecDeque::from([from]);

    while let Some(current) = queue.pop_front() {
        if current == to {
            let mut path = vec![current];
            let mut cursor = current;
            while let Some(&prev) = came_from.get(cursor) {
                path.push(prev);
                cursor = prev;
            }
            path.reverse();
            return Some(path);
        }
        let Some(task) = by_id.get(current) else {
            continue;
        };
        for next in &task.blocked_by {
            let Some((&next, _)) = by_id.get_key_value(next.as_str()) else {
                continue;
            };
            if visited.insert(next) {
                came_from.insert(next, current);
                queue.push_back(next);
            }
        }
    }
    None
}

// =========================================================================
// Whole-set invariants
// =========================================================================

/// Validate every structural invariant of a task set
///
/// Returns the first violation found, scanning tasks in log order.
pub fn validate_task_set(tasks: &[Task]) -> Result<()> {
    let mut by_id: HashMap<&str, &Task> = HashMap::with_capacity(tasks.len());
    for task in tasks {
        if by_id.insert(task.id.as_str(), task).is_some() {
            return Err(Error::Validation(format!("duplicate task id: {}", task.id)));
        }
    }

    for task in tasks {
        let mut seen = HashSet::new();
        for blocker in &task.blocked_by {
            if blocker == &task.id {
                return Err(Error::Validation(format!(
                    "task {} cannot be blocked by itself",
                    task.id
                )));
            }
            if !by_id.contains_key(blocker.as_str()) {
                return Err(Error::Validation(format!(
                    "task {} is blocked by unknown task {}",
                    task.id, blocker
                )));
            }
            if !seen.insert(blocker.as_str()) {
                return Err(Error::Validation(format!(
                    "task {} lists blocker {} more than once",
                    task.id, blocker
                )));
            }
        }

        if let Some(parent_id) = task.parent.as_deref() {
            if parent_id == task.id {
                return Err(Error::Validation(format!(
                    "task {} cannot be its own parent",
                    task.id
                )));
            }
            let Some(parent) = by_id.get(parent_id) else {
                return Err(Error::Validation(format!(
                    "task {} has unknown parent {}",
                    task.id, parent_id
                )));
            };
            if task.is_blocked_by(parent_id) {
                return Err(Error::Validation(format!(
                    "task {} cannot be blocked by its parent {}",
                    task.id, parent_id
                )));
            }
            if parent.is_blocked_by(&task.id) {
                return Err(Error::Validation(format!(
                    "task {} cannot be blocked by its child {}",
                    parent_id, task.id
                )));
            }
        }
    }

    if let Some(cycle) = cycles_in(tasks, &by_id, true).into_iter().next() {
        return Err(Error::Validation(format!(
            "dependency cycle: {}",
            format_path(&cycle)
        )));
    }

    for task in tasks {
        if let Some(chain) = parent_loop(&by_id, task) {
            return Err(Error::Validation(format!(
                "parent cycle: {}",
                format_path(&chain)
            )));
        }
    }

    Ok(())
}

fn parent_loop<'a>(by_id: &HashMap<&'a str, &'a Task>, start: &'a Task) -> Option<Vec<&'a str>> {
    let mut chain = vec![start.id.as_str()];
    let mut seen = HashSet::from([start.id.as_str()]);
    let mut current = start;
    while let Some(parent_id) = current.parent.as_deref() {
        let parent = *by_id.get(parent_id)?;
        chain.push(parent.id.as_str());
        if !seen.insert(parent.id.as_str()) {
            return Some(chain);
        }
        current = parent;
    }
    None
}

// =========================================================================
// Cycle search
// =========================================================================

/// Every dependency cycle reachable by depth-first search, each reported
/// once as `a → b → … → a` starting from its smallest id
pub fn find_cycles(tasks: &[Task]) -> Vec<Vec<String>> {
    let by_id = index(tasks);
    cycles_in(tasks, &by_id, false)
        .into_iter()
        .map(|cycle| cycle.into_iter().map(str::to_string).collect())
        .collect()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

fn cycles_in<'a>(tasks: &'a [Task], by_id: &HashMap<&'a str, &'a Task>, first_only: bool) -> Vec<Vec<&'a str>> {
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut found: Vec<Vec<&str>> = Vec::new();
    let mut seen: HashSet<Vec<&str>> = HashSet::new();

    for task in tasks {
        if marks.contains_key(task.id.as_str()) {
            continue;
        }
        // Iterative DFS: (node, next edge index)
        let mut stack: Vec<(&str, usize)> = vec![(task.id.as_str(), 0)];
        marks.insert(task.id.as_str(), Mark::Visiting);

        while let Some((node, edge)) = stack.last().copied() {
            let blockers = by_id.get(node).map(|t| t.blocked_by.as_slice()).unwrap_or(&[]);
            if edge >= blockers.len() {
                marks.insert(node, Mark::Done);
                stack.pop();
                continue;
            }
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }

            let Some((&next, _)) = by_id.get_key_value(blockers[edge].as_str()) else {
                continue;
            };
            match marks.get(next) {
                None => {
                    marks.insert(next, Mark::Visiting);
                    stack.push((next, 0));
                }
                Some(Mark::Visiting) => {
                    let start = stack.iter().position(|(id, _)| *id == next).unwrap_or(0);
                    let mut cycle: Vec<&str> = stack[start..].iter().map(|(id, _)| *id).collect();
                    let min = cycle
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, id)| **id)
                        .map(|(idx, _)| idx)
                        .unwrap_or(0);
                    cycle.rotate_left(min);
                    if seen.insert(cycle.clone()) {
                        let first = cycle[0];
                        cycle.push(first);
                        found.push(cycle);
                        if first_only {
                            return found;
                        }
                    }
                }
                Some(Mark::Done) => {}
            }
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::now;

    fn task(id: &str, blocked_by: &[&str], parent: Option<&str>) -> Task {
        let mut task = Task::new(id, id, 2, now());
        task.blocked_by = blocked_by.iter().map(|id| id.to_string()).collect();
        task.parent = parent.map(str::to_string);
        task
    }

    #[test]
    fn batch_fails_on_first_bad_blocker() {
        let tasks = vec![
            task("tick-aaaaaa", &["tick-bbbbbb"], None),
            task("tick-bbbbbb", &[], None),
            task("tick-cccccc", &["tick-aaaaaa"], None),
        ];
        validate_dependencies(&tasks, "tick-aaaaaa", &["tick-bbbbbb"]).unwrap();

        let err = validate_dependencies(&tasks, "tick-bbbbbb", &["tick-cccccc"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot add dependency - creates cycle: tick-bbbbbb → tick-cccccc → tick-aaaaaa → tick-bbbbbb"
        );

        let err = validate_dependencies(&tasks, "tick-ffffff", &["tick-aaaaaa"]).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn rejects_self_dependency() {
        let tasks = vec![task("tick-aaaaaa", &[], None)];
        let err = validate_dependency(&tasks, "tick-aaaaaa", "tick-aaaaaa").unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot add dependency - creates cycle: tick-aaaaaa → tick-aaaaaa"
        );
    }

    #[test]
    fn rejects_direct_cycle_with_path() {
        let tasks = vec![
            task("tick-aaaaaa", &["tick-bbbbbb"], None),
            task("tick-bbbbbb", &[], None),
        ];
        let err = validate_dependency(&tasks, "tick-bbbbbb", "tick-aaaaaa").unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot add dependency - creates cycle: tick-bbbbbb → tick-aaaaaa → tick-bbbbbb"
        );
    }

    #[test]
    fn rejects_transitive_cycle() {
        let tasks = vec![
            task("tick-aaaaaa", &["tick-bbbbbb"], None),
            task("tick-bbbbbb", &["tick-cccccc"], None),
            task("tick-cccccc", &[], None),
        ];
        let err = validate_dependency(&tasks, "tick-cccccc", "tick-aaaaaa").unwrap_err();
        assert!(err
            .to_string()
            .ends_with("tick-cccccc → tick-aaaaaa → tick-bbbbbb → tick-cccccc"));
    }

    #[test]
    fn rejects_parent_child_edges_both_ways() {
        let tasks = vec![
            task("tick-aaaaaa", &[], None),
            task("tick-bbbbbb", &[], Some("tick-aaaaaa")),
        ];
        let err = validate_dependency(&tasks, "tick-bbbbbb", "tick-aaaaaa").unwrap_err();
        assert!(err.to_string().contains("blocked by its parent"));
        let err = validate_dependency(&tasks, "tick-aaaaaa", "tick-bbbbbb").unwrap_err();
        assert!(err.to_string().contains("blocked by its child"));
    }

    #[test]
    fn accepts_diamond() {
        let tasks = vec![
            task("tick-aaaaaa", &[], None),
            task("tick-bbbbbb", &["tick-aaaaaa"], None),
            task("tick-cccccc", &["tick-aaaaaa"], None),
            task("tick-dddddd", &["tick-bbbbbb"], None),
        ];
        validate_dependency(&tasks, "tick-dddddd", "tick-cccccc").unwrap();
        validate_task_set(&tasks).unwrap();
    }

    #[test]
    fn unknown_endpoints_are_not_found() {
        let tasks = vec![task("tick-aaaaaa", &[], None)];
        let err = validate_dependency(&tasks, "tick-aaaaaa", "tick-ffffff").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn task_set_invariants() {
        let dup = vec![task("tick-aaaaaa", &[], None), task("tick-aaaaaa", &[], None)];
        assert!(validate_task_set(&dup).unwrap_err().to_string().contains("duplicate"));

        let dangling = vec![task("tick-aaaaaa", &["tick-ffffff"], None)];
        assert!(validate_task_set(&dangling).unwrap_err().to_string().contains("unknown task"));

        let orphan = vec![task("tick-aaaaaa", &[], Some("tick-ffffff"))];
        assert!(validate_task_set(&orphan).unwrap_err().to_string().contains("unknown parent"));

        let cyclic = vec![
            task("tick-aaaaaa", &["tick-bbbbbb"], None),
            task("tick-bbbbbb", &["tick-aaaaaa"], None),
        ];
        assert!(validate_task_set(&cyclic).unwrap_err().to_string().contains("dependency cycle"));

        let parent_loop = vec![
            task("tick-aaaaaa", &[], Some("tick-bbbbbb")),
            task("tick-bbbbbb", &[], Some("tick-aaaaaa")),
        ];
        assert!(validate_task_set(&parent_loop).unwrap_err().to_string().contains("parent cycle"));

        let parent_blocks_child = vec![
            task("tick-aaaaaa", &["tick-bbbbbb"], None),
            task("tick-bbbbbb", &[], Some("tick-aaaaaa")),
        ];
        assert!(validate_task_set(&parent_blocks_child)
            .unwrap_err()
            .to_string()
            .contains("blocked by its child"));
    }

    #[test]
    fn find_cycles_reports_each_once() {
        let tasks = vec![
            task("tick-cccccc", &["tick-aaaaaa"], None),
            task("tick-aaaaaa", &["tick-bbbbbb"], None),
            task("tick-bbbbbb", &["tick-cccccc"], None),
            task("tick-dddddd", &["tick-dddddd"], None),
        ];
        let cycles = find_cycles(&tasks);
        assert_eq!(cycles.len(), 2);
        assert_eq!(
            cycles[0],
            vec!["tick-aaaaaa", "tick-bbbbbb", "tick-cccccc", "tick-aaaaaa"]
        );
        assert_eq!(cycles[1], vec!["tick-dddddd", "tick-dddddd"]);
    }
}
