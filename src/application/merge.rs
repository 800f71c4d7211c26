//! Id-keyed reconciliation over an ordered task collection.
//!
//! Both the direct-response path and the change-feed path go through these,
//! so each one must converge to the same state whatever order they run in.

use crate::domain::task::{Task, TaskId};

pub fn contains_id(tasks: &[Task], id: TaskId) -> bool {
    tasks.iter().any(|t| t.id == id)
}

/// Prepends `task` unless its id is already present. Returns whether it was added.
pub fn insert_front_if_absent(tasks: &mut Vec<Task>, task: Task) -> bool {
    if contains_id(tasks, task.id) {
        return false;
    }
    tasks.insert(0, task);
    true
}

/// Replaces the entry with the same id in place, unless the held row is
/// newer than `task`. Returns whether the id was found.
pub fn replace_unless_stale(tasks: &mut [Task], task: Task) -> bool {
    match tasks.iter_mut().find(|t| t.id == task.id) {
        Some(slot) => {
            if slot.updated_at <= task.updated_at {
                *slot = task;
            }
            true
        }
        None => false,
    }
}

pub fn remove_by_id(tasks: &mut Vec<Task>, id: TaskId) -> bool {
    take_by_id(tasks, id).is_some()
}

pub fn take_by_id(tasks: &mut Vec<Task>, id: TaskId) -> Option<Task> {
    let pos = tasks.iter().position(|t| t.id == id)?;
    Some(tasks.remove(pos))
}

/// Moves `task` to the front, dropping any stale copy with the same id.
pub fn upsert_front(tasks: &mut Vec<Task>, task: Task) {
    remove_by_id(tasks, task.id);
    tasks.insert(0, task);
}
