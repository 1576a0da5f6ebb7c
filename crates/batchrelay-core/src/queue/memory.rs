//! In-memory task queue.

use super::{Task, TaskStatus};
use crate::domain::TaskId;
use crate::observability::StatusCounts;

/// Ordered sequence of the current batch's tasks.
///
/// The queue never reorders: dispatch order is insertion order, which is
/// also `original_index` order for a freshly started batch.
#[derive(Debug, Clone, Default)]
pub struct TaskQueue {
    tasks: Vec<Task>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Drop the current contents and install a new batch.
    pub fn replace(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks;
    }

    /// Remove every task, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let n = self.tasks.len();
        self.tasks.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Look a task up by the id the page assigned to it.
    ///
    /// Only tasks whose `external_id` was established earlier can match.
    pub fn find_by_external_id(&self, external_id: &str) -> Option<TaskId> {
        self.tasks
            .iter()
            .find(|t| t.external_id.as_deref() == Some(external_id))
            .map(|t| t.id)
    }

    /// First runnable task, in queue order.
    pub fn next_pending(&self) -> Option<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.status.is_runnable())
            .min_by_key(|t| t.original_index)
            .map(|t| t.id)
    }

    /// Is the task still waiting to be dispatched?
    pub fn is_pending(&self, id: TaskId) -> bool {
        self.get(id)
            .is_some_and(|t| t.status == TaskStatus::Pending)
    }

    /// True when the batch is non-empty and nothing is left to do.
    pub fn all_terminal(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.iter().all(|t| t.status.is_terminal())
    }

    /// Number of tasks currently owned by the agent.
    pub fn active_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.status.is_active()).count()
    }

    pub fn counts_by_status(&self) -> StatusCounts {
        StatusCounts::tally(&self.tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AspectRatio;
    use chrono::Utc;

    fn batch(n: u32) -> Vec<Task> {
        let now = Utc::now();
        (1..=n)
            .map(|i| Task::new(TaskId::generate(), i, format!("p{i}"), AspectRatio::Square, 1, now))
            .collect()
    }

    #[test]
    fn next_pending_follows_insertion_order() {
        let mut queue = TaskQueue::new();
        let tasks = batch(3);
        let ids: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();
        queue.replace(tasks);

        assert_eq!(queue.next_pending(), Some(ids[0]));
        queue.get_mut(ids[0]).unwrap().mark_submitting(Utc::now());
        assert_eq!(queue.next_pending(), Some(ids[1]));
        assert_eq!(queue.active_count(), 1);
    }

    #[test]
    fn external_id_lookup_requires_prior_assignment() {
        let mut queue = TaskQueue::new();
        let tasks = batch(2);
        let first = tasks[0].id;
        queue.replace(tasks);

        assert_eq!(queue.find_by_external_id("gen_x"), None);
        queue.get_mut(first).unwrap().mark_submitted("gen_x", Utc::now());
        assert_eq!(queue.find_by_external_id("gen_x"), Some(first));
    }

    #[test]
    fn all_terminal_is_false_for_empty_queue() {
        let mut queue = TaskQueue::new();
        assert!(!queue.all_terminal());

        queue.replace(batch(1));
        let id = queue.tasks()[0].id;
        queue.get_mut(id).unwrap().mark_failed("x", Utc::now());
        assert!(queue.all_terminal());
        assert_eq!(queue.counts_by_status().failed, 1);
        assert_eq!(queue.clear(), 1);
        assert!(queue.is_empty());
    }
}
