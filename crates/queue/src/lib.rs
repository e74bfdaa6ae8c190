#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `fsmirror_queue` is the coordination point between everything that detects
//! work (the event intake, the recovery sweeper, the consistency sweeper) and
//! the worker pool that performs it. It provides [`SyncTask`], the immutable
//! description of one per-path sync request, and [`SyncQueue`], a bounded
//! multi-producer multi-consumer priority queue.
//!
//! # Design
//!
//! The queue orders tasks by `(priority, creation time, sequence)`: urgent
//! classes preempt lazier ones, and within a class tasks leave in FIFO order.
//! Capacity is bounded; a full queue exerts back-pressure by blocking
//! producers in [`SyncQueue::enqueue`] until space frees up or the timeout
//! expires. [`SyncQueue::shutdown`] is absorbing: producers are refused from
//! that point on while consumers drain the backlog and then receive `None`.
//!
//! # Invariants
//!
//! - The queue never holds more than its configured capacity.
//! - [`SyncQueue::dequeue`] always returns the queued task with the smallest
//!   `(priority, created_at)` key.
//! - All blocking waits re-check their predicate, so spurious wakeups cannot
//!   produce phantom results.

mod queue;
mod task;

pub use queue::SyncQueue;
pub use task::{SyncPriority, SyncTask, TaskOperation, TaskStatus};
