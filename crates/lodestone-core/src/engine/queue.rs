//! Priority queue shared by all download workers
//!
//! Ordered by priority (highest first), then by insertion order. Entries of
//! paused runs stay in place and are skipped by `pop_where`.

use lodestone_types::TaskPriority;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A queued reference to a task of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub version_id: String,
    pub task_id: Uuid,
    pub priority: TaskPriority,
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    entries: BTreeMap<(Reverse<TaskPriority>, u64), QueueEntry>,
    next_seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, version_id: &str, task_id: Uuid, priority: TaskPriority) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            (Reverse(priority), seq),
            QueueEntry {
                version_id: version_id.to_string(),
                task_id,
                priority,
            },
        );
    }

    /// Remove and return the first entry whose run is eligible
    pub fn pop_where<F>(&mut self, mut eligible: F) -> Option<QueueEntry>
    where
        F: FnMut(&str) -> bool,
    {
        let key = self
            .entries
            .iter()
            .find(|(_, entry)| eligible(&entry.version_id))
            .map(|(key, _)| *key)?;
        self.entries.remove(&key)
    }

    /// Drop every entry of `version_id`, returning the task ids
    pub fn remove_version(&mut self, version_id: &str) -> Vec<Uuid> {
        let mut removed = Vec::new();
        self.entries.retain(|_, entry| {
            if entry.version_id == version_id {
                removed.push(entry.task_id);
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn len_for(&self, version_id: &str) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.version_id == version_id)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_first_then_fifo() {
        let mut queue = TaskQueue::new();
        let low = Uuid::new_v4();
        let normal_a = Uuid::new_v4();
        let normal_b = Uuid::new_v4();
        let high = Uuid::new_v4();
        queue.push("v", low, TaskPriority::Low);
        queue.push("v", normal_a, TaskPriority::Normal);
        queue.push("v", high, TaskPriority::High);
        queue.push("v", normal_b, TaskPriority::Normal);

        let order: Vec<Uuid> = std::iter::from_fn(|| queue.pop_where(|_| true))
            .map(|e| e.task_id)
            .collect();
        assert_eq!(order, vec![high, normal_a, normal_b, low]);
    }

    #[test]
    fn ineligible_runs_are_skipped_not_dropped() {
        let mut queue = TaskQueue::new();
        let paused = Uuid::new_v4();
        let active = Uuid::new_v4();
        queue.push("paused", paused, TaskPriority::High);
        queue.push("active", active, TaskPriority::Low);

        let next = queue.pop_where(|v| v != "paused").unwrap();
        assert_eq!(next.task_id, active);
        assert_eq!(queue.len_for("paused"), 1);
        assert!(queue.pop_where(|v| v != "paused").is_none());
    }

    #[test]
    fn remove_version_only_touches_that_run() {
        let mut queue = TaskQueue::new();
        queue.push("a", Uuid::new_v4(), TaskPriority::Normal);
        queue.push("b", Uuid::new_v4(), TaskPriority::Normal);
        queue.push("a", Uuid::new_v4(), TaskPriority::Low);

        assert_eq!(queue.remove_version("a").len(), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.len_for("a"), 0);
    }
}
