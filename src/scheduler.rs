//! Virtual-time task scheduler
//!
//! Detectors, the countdown and the draft autosave are registered as periodic
//! tasks. The owner pulls due tasks one at a time with [`Scheduler::pop_due`]
//! and runs each to completion, so two tasks due in the same instant are
//! strictly serialized: earliest due time first, registration order on ties.

use chrono::{DateTime, Duration, Utc};

/// Handle to a registered task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

/// A task whose due time has been reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueTask<K> {
    pub id: TaskId,
    pub kind: K,
    /// Instant the task was scheduled for (the tick's logical time)
    pub due: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct PeriodicTask<K> {
    id: TaskId,
    kind: K,
    period: Duration,
    next_due: DateTime<Utc>,
}

/// Registry of periodic tasks keyed by a caller-defined kind
#[derive(Debug, Clone)]
pub struct Scheduler<K> {
    tasks: Vec<PeriodicTask<K>>,
    next_id: u64,
}

impl<K> Default for Scheduler<K> {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            next_id: 0,
        }
    }
}

impl<K: Copy> Scheduler<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task that first fires one `period` after `start`
    pub fn every(&mut self, kind: K, period: Duration, start: DateTime<Utc>) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.tasks.push(PeriodicTask {
            id,
            kind,
            period,
            next_due: start + period,
        });
        id
    }

    /// Remove a task. Cancelling an unknown or already-cancelled task is a no-op
    /// and returns false.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        self.tasks.len() != before
    }

    /// Remove every task, returning how many were live
    pub fn cancel_all(&mut self) -> usize {
        let count = self.tasks.len();
        self.tasks.clear();
        count
    }

    pub fn is_live(&self, id: TaskId) -> bool {
        self.tasks.iter().any(|t| t.id == id)
    }

    pub fn live_count(&self) -> usize {
        self.tasks.len()
    }

    /// Earliest pending due time, if any task is registered
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.tasks.iter().map(|t| t.next_due).min()
    }

    /// Take the next task due at or before `now` and reschedule it.
    ///
    /// Missed periods are replayed one by one, so a large jump in `now`
    /// yields every intermediate tick in order.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<DueTask<K>> {
        // min_by_key returns the first minimum, which preserves registration order on ties
        let task = self
            .tasks
            .iter_mut()
            .filter(|t| t.next_due <= now)
            .min_by_key(|t| t.next_due)?;

        let due = DueTask {
            id: task.id,
            kind: task.kind,
            due: task.next_due,
        };
        task.next_due += task.period;
        Some(due)
    }
}
