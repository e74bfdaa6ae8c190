#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `fsmirror_engine` ties the mirror together. A pool of worker threads
//! consumes per-path tasks from the bounded priority queue and runs each one
//! through the same pipeline: record the operation in the transaction log,
//! copy the file with atomic publication, verify the result, and write the
//! terminal record. Two background sweepers repair whatever the happy path
//! misses: the recovery sweeper re-drives transactions that were left
//! unsettled by a crash, and the consistency sweeper periodically diffs the
//! whole tree and queues repairs for any drift.
//!
//! # Design
//!
//! The engine owns the lifetime of every thread it spawns. Shutdown is
//! cooperative: a [`CancelToken`] plus the queue's shutdown signal reach every
//! loop, and [`SyncEngine::stop`] joins all of them before closing the log.
//! Worker failures never unwind; they become a FAILED record and a metric,
//! and a bounded number of retries is scheduled by re-enqueueing a fresh task
//! value. Only an unopenable transaction log refuses to start the engine.

mod cancel;
mod config;
mod engine;
mod error;
mod map;

pub use cancel::CancelToken;
pub use config::SyncConfig;
pub use engine::SyncEngine;
pub use error::EngineError;
pub use map::map_destination;
