//! Task values carried through the priority queue.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

static NEXT_TASK_SEQ: AtomicU64 = AtomicU64::new(0);

/// Urgency classes, served in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncPriority {
    /// Essential operations such as configuration files.
    Critical,
    /// User-initiated operations and recovery work.
    High,
    /// Regular file changes picked up from events.
    Normal,
    /// Bulk repair work scheduled by the consistency sweep.
    Low,
    /// Periodic housekeeping.
    Background,
}

/// Provenance of a task; every operation runs the same copy and verify
/// pipeline, the distinction only feeds metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskOperation {
    /// Triggered by a filesystem event or an explicit request.
    Sync,
    /// Re-issued by the recovery sweeper for a stuck transaction.
    Recovery,
    /// Issued by the consistency sweeper for a detected mismatch.
    Consistency,
}

/// Lifecycle label carried on a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Queued, not yet picked up.
    Pending,
    /// Being executed by a worker.
    InProgress,
    /// Re-queued after a failed attempt.
    Retry,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully.
    Failed,
}

/// One request to mirror a single source path.
///
/// Tasks are immutable values. A retry does not mutate the failed task; it is
/// a new value produced by [`SyncTask::retried`] with the attempt counter
/// incremented, so no task is ever aliased across threads.
#[derive(Debug, Clone)]
pub struct SyncTask {
    path: PathBuf,
    operation: TaskOperation,
    priority: SyncPriority,
    created_at: Instant,
    seq: u64,
    retry_count: u32,
    status: TaskStatus,
    task_id: String,
}

impl SyncTask {
    /// Creates a pending task for `path`.
    #[must_use]
    pub fn new(path: PathBuf, operation: TaskOperation, priority: SyncPriority) -> Self {
        let seq = NEXT_TASK_SEQ.fetch_add(1, Ordering::Relaxed) + 1;
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self {
            path,
            operation,
            priority,
            created_at: Instant::now(),
            seq,
            retry_count: 0,
            status: TaskStatus::Pending,
            task_id: format!("{ms}-{seq}"),
        }
    }

    /// Source path this task mirrors.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Provenance of the task.
    #[must_use]
    pub const fn operation(&self) -> TaskOperation {
        self.operation
    }

    /// Urgency class.
    #[must_use]
    pub const fn priority(&self) -> SyncPriority {
        self.priority
    }

    /// Monotonic creation time, the FIFO tie-breaker within a priority class.
    #[must_use]
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Number of failed attempts so far.
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Current lifecycle label.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        self.status
    }

    /// Unique identifier; two tasks are equal iff their ids are.
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Returns a new task describing the next attempt.
    ///
    /// Identity, path, priority, and creation time carry over; only the
    /// attempt counter and status change.
    #[must_use]
    pub fn retried(&self) -> Self {
        let mut next = self.clone();
        next.retry_count += 1;
        next.status = TaskStatus::Retry;
        next
    }

    pub(crate) fn order_key(&self) -> (SyncPriority, Instant, u64) {
        (self.priority, self.created_at, self.seq)
    }
}

impl PartialEq for SyncTask {
    fn eq(&self, other: &Self) -> bool {
        self.task_id == other.task_id
    }
}

impl Eq for SyncTask {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_pending_with_zero_retries() {
        let task = SyncTask::new(
            PathBuf::from("/s/a.txt"),
            TaskOperation::Sync,
            SyncPriority::Normal,
        );
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.retry_count(), 0);
        assert!(!task.task_id().is_empty());
    }

    #[test]
    fn retried_produces_a_distinct_value_with_same_identity() {
        let task = SyncTask::new(
            PathBuf::from("/s/a.txt"),
            TaskOperation::Sync,
            SyncPriority::Normal,
        );
        let retry = task.retried();

        assert_eq!(retry.retry_count(), 1);
        assert_eq!(retry.status(), TaskStatus::Retry);
        assert_eq!(retry, task);
        assert_eq!(task.retry_count(), 0);
    }

    #[test]
    fn task_ids_are_unique() {
        let a = SyncTask::new(
            PathBuf::from("/s/a"),
            TaskOperation::Sync,
            SyncPriority::Normal,
        );
        let b = SyncTask::new(
            PathBuf::from("/s/a"),
            TaskOperation::Sync,
            SyncPriority::Normal,
        );
        assert_ne!(a.task_id(), b.task_id());
    }

    #[test]
    fn priority_order_is_critical_first() {
        assert!(SyncPriority::Critical < SyncPriority::High);
        assert!(SyncPriority::High < SyncPriority::Normal);
        assert!(SyncPriority::Normal < SyncPriority::Low);
        assert!(SyncPriority::Low < SyncPriority::Background);
    }
}
