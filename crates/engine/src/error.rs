//! Engine error types.

use std::io;

use fsmirror_txlog::TxLogError;
use thiserror::Error;

/// Errors that refuse to start or construct the engine.
///
/// Everything that can go wrong after startup is absorbed into transaction
/// records and metrics instead of being raised.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The transaction log could not be created or opened. Running without a
    /// log would make operations unrecoverable, so this is fatal.
    #[error("transaction log unavailable: {0}")]
    LogUnavailable(#[source] TxLogError),
    /// A worker or sweeper thread could not be spawned.
    #[error("failed to spawn sync thread: {0}")]
    Spawn(#[source] io::Error),
}
