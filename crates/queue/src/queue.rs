//! Bounded MPMC priority queue implementation.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::task::SyncTask;

/// Heap adapter: `BinaryHeap` is a max-heap, so ordering is inverted to pop
/// the task with the smallest `(priority, created_at, seq)` key first.
struct QueuedTask(SyncTask);

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.0.order_key() == other.0.order_key()
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.0.order_key().cmp(&self.0.order_key())
    }
}

struct QueueState {
    heap: BinaryHeap<QueuedTask>,
    shutdown: bool,
}

/// Thread-safe bounded priority queue of [`SyncTask`] values.
///
/// Producers block in [`enqueue`](Self::enqueue) while the queue is at
/// capacity; consumers block in [`dequeue`](Self::dequeue) while it is empty.
/// [`shutdown`](Self::shutdown) wakes every waiter, refuses further
/// production, and lets consumers drain what remains.
pub struct SyncQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    max_size: usize,
}

impl SyncQueue {
    /// Creates a queue holding at most `max_size` tasks.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            max_size: max_size.max(1),
        }
    }

    /// Adds a task, blocking up to `timeout` for space.
    ///
    /// Returns `false` when the queue stayed full for the whole timeout or
    /// has been shut down.
    pub fn enqueue(&self, task: SyncTask, timeout: Duration) -> bool {
        let state = self.state.lock().expect("queue lock poisoned");
        let (mut state, _wait) = self
            .not_full
            .wait_timeout_while(state, timeout, |state| {
                state.heap.len() >= self.max_size && !state.shutdown
            })
            .expect("queue lock poisoned");

        if state.shutdown || state.heap.len() >= self.max_size {
            return false;
        }

        state.heap.push(QueuedTask(task));
        drop(state);
        self.not_empty.notify_one();
        true
    }

    /// Removes the most urgent task, blocking up to `timeout` for work.
    ///
    /// Returns `None` on timeout. After shutdown the backlog is still
    /// drained; only an empty shut-down queue returns `None` immediately.
    pub fn dequeue(&self, timeout: Duration) -> Option<SyncTask> {
        let state = self.state.lock().expect("queue lock poisoned");
        let (mut state, _wait) = self
            .not_empty
            .wait_timeout_while(state, timeout, |state| {
                state.heap.is_empty() && !state.shutdown
            })
            .expect("queue lock poisoned");

        let task = state.heap.pop()?.0;
        drop(state);
        self.not_full.notify_one();
        Some(task)
    }

    /// Advisory number of queued tasks.
    #[must_use]
    pub fn size(&self) -> usize {
        self.state.lock().expect("queue lock poisoned").heap.len()
    }

    /// Advisory emptiness snapshot.
    #[must_use]
    pub fn empty(&self) -> bool {
        self.size() == 0
    }

    /// Enters the absorbing shut-down state and wakes every waiter.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        state.shutdown = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// True once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().expect("queue lock poisoned").shutdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{SyncPriority, TaskOperation};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::thread;

    fn task(path: &str, priority: SyncPriority) -> SyncTask {
        SyncTask::new(PathBuf::from(path), TaskOperation::Sync, priority)
    }

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn pops_highest_priority_first() {
        let queue = SyncQueue::new(16);
        assert!(queue.enqueue(task("/low", SyncPriority::Low), SHORT));
        assert!(queue.enqueue(task("/critical", SyncPriority::Critical), SHORT));
        assert!(queue.enqueue(task("/normal", SyncPriority::Normal), SHORT));

        let order: Vec<_> = (0..3)
            .map(|_| queue.dequeue(SHORT).expect("task").priority())
            .collect();
        assert_eq!(
            order,
            vec![
                SyncPriority::Critical,
                SyncPriority::Normal,
                SyncPriority::Low
            ]
        );
    }

    #[test]
    fn fifo_within_a_priority_class() {
        let queue = SyncQueue::new(16);
        for name in ["/first", "/second", "/third"] {
            assert!(queue.enqueue(task(name, SyncPriority::Normal), SHORT));
        }

        let order: Vec<_> = (0..3)
            .map(|_| queue.dequeue(SHORT).expect("task").path().to_path_buf())
            .collect();
        assert_eq!(
            order,
            vec![
                PathBuf::from("/first"),
                PathBuf::from("/second"),
                PathBuf::from("/third")
            ]
        );
    }

    #[test]
    fn critical_preempts_a_backlog_of_low_tasks() {
        let queue = SyncQueue::new(256);
        for i in 0..100 {
            assert!(queue.enqueue(task(&format!("/low/{i}"), SyncPriority::Low), SHORT));
        }
        assert!(queue.enqueue(task("/urgent", SyncPriority::Critical), SHORT));

        let first = queue.dequeue(SHORT).expect("task");
        assert_eq!(first.priority(), SyncPriority::Critical);
        assert_eq!(first.path(), PathBuf::from("/urgent").as_path());
    }

    #[test]
    fn full_queue_times_out_producers() {
        let queue = SyncQueue::new(2);
        assert!(queue.enqueue(task("/a", SyncPriority::Normal), SHORT));
        assert!(queue.enqueue(task("/b", SyncPriority::Normal), SHORT));
        assert!(!queue.enqueue(task("/c", SyncPriority::Normal), SHORT));
        assert_eq!(queue.size(), 2);
    }

    #[test]
    fn blocked_producer_resumes_when_space_frees() {
        let queue = Arc::new(SyncQueue::new(1));
        assert!(queue.enqueue(task("/a", SyncPriority::Normal), SHORT));

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                queue.enqueue(task("/b", SyncPriority::Normal), Duration::from_secs(5))
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(queue.dequeue(SHORT).is_some());
        assert!(producer.join().expect("producer join"));
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn empty_queue_times_out_consumers() {
        let queue = SyncQueue::new(4);
        assert!(queue.dequeue(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn shutdown_refuses_producers_and_drains_consumers() {
        let queue = SyncQueue::new(16);
        assert!(queue.enqueue(task("/a", SyncPriority::Normal), SHORT));
        assert!(queue.enqueue(task("/b", SyncPriority::Normal), SHORT));

        queue.shutdown();

        assert!(!queue.enqueue(task("/c", SyncPriority::Normal), SHORT));
        assert!(queue.dequeue(SHORT).is_some());
        assert!(queue.dequeue(SHORT).is_some());
        assert!(queue.dequeue(SHORT).is_none());
    }

    #[test]
    fn shutdown_wakes_blocked_consumers() {
        let queue = Arc::new(SyncQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue(Duration::from_secs(10)))
        };

        thread::sleep(Duration::from_millis(20));
        queue.shutdown();
        assert!(consumer.join().expect("consumer join").is_none());
    }

    #[test]
    fn concurrent_producers_and_consumers_move_every_task() {
        let queue = Arc::new(SyncQueue::new(64));
        let total: usize = 400;

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..100 {
                        let t = task(&format!("/p{p}/{i}"), SyncPriority::Normal);
                        assert!(queue.enqueue(t, Duration::from_secs(5)));
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut seen = 0usize;
                    while queue.dequeue(Duration::from_millis(200)).is_some() {
                        seen += 1;
                    }
                    seen
                })
            })
            .collect();

        for p in producers {
            p.join().expect("producer join");
        }
        let consumed: usize = consumers
            .into_iter()
            .map(|c| c.join().expect("consumer join"))
            .sum();
        assert_eq!(consumed, total);
        assert!(queue.empty());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn priority_from(code: u8) -> SyncPriority {
            match code % 5 {
                0 => SyncPriority::Critical,
                1 => SyncPriority::High,
                2 => SyncPriority::Normal,
                3 => SyncPriority::Low,
                _ => SyncPriority::Background,
            }
        }

        proptest! {
            #[test]
            fn dequeue_order_is_monotonic(codes in proptest::collection::vec(0u8..5, 1..64)) {
                let queue = SyncQueue::new(codes.len());
                for code in &codes {
                    prop_assert!(queue.enqueue(
                        task("/prop", priority_from(*code)),
                        Duration::from_millis(100),
                    ));
                }

                let mut previous: Option<(SyncPriority, std::time::Instant)> = None;
                while let Some(next) = queue.dequeue(Duration::from_millis(10)) {
                    let key = (next.priority(), next.created_at());
                    if let Some(prev) = previous {
                        prop_assert!(prev <= key);
                    }
                    previous = Some(key);
                }
            }
        }
    }
}
