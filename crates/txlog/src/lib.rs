#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `fsmirror_txlog` is the durability backbone of the mirror. Every file
//! operation a worker performs is bracketed by records in an append-only,
//! line-delimited JSON log: a PENDING record when the work is picked up,
//! IN_PROGRESS before the filesystem is touched, and a terminal COMPLETED or
//! FAILED record once verification has run. After a crash, the records whose
//! latest status never reached a terminal state identify exactly the
//! operations that must be re-driven.
//!
//! # Design
//!
//! The log directory holds rotated files named `sync_log_<stamp>.json` plus an
//! `archive/` subdirectory; the current log is the lexicographically largest
//! name. Updates never rewrite history: each status change appends a complete
//! record, and the effective state of an id is the status of its last
//! occurrence in append order. Records are flushed as they are written, so the
//! log survives an abrupt kill between any two records; a torn final line is
//! skipped (and counted) on the next scan.
//!
//! All mutation serializes through one mutex. Read-only queries reload the
//! file from scratch, deliberately invalidating the in-memory cache so that
//! records appended by another handle (test harnesses, external inspection
//! tooling) become visible.

mod log;
mod record;

pub use log::{TransactionLog, DEFAULT_ROTATE_BYTES};
pub use record::{
    InvalidOperationCode, InvalidStatusCode, OperationKind, TransactionRecord, TransactionStatus,
};

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for transaction log operations.
pub type TxLogResult<T> = Result<T, TxLogError>;

/// Errors surfaced by the transaction log.
#[derive(Debug, Error)]
pub enum TxLogError {
    /// The log file or directory could not be accessed.
    #[error("failed to access transaction log '{path}': {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
    /// A status update referenced an id the log has never seen.
    #[error("unknown transaction id '{0}'")]
    UnknownTransaction(String),
    /// A record could not be encoded for appending.
    #[error("failed to encode transaction record: {0}")]
    Encode(#[from] serde_json::Error),
}
