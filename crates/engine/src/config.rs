//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use fsmirror_verify::VerifyMethod;

/// Everything the engine needs to know, injected by the service wrapper.
///
/// The engine consumes this struct as-is; parsing it from flags or files is
/// the wrapper's concern.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Worker pool size, at least one.
    pub num_threads: usize,
    /// Root of the tree being mirrored.
    pub source_root: PathBuf,
    /// Root of the mirror.
    pub destination_root: PathBuf,
    /// Directory holding the transaction log and its archive.
    pub log_dir: PathBuf,
    /// Capacity of the task queue.
    pub max_queue: usize,
    /// Failed attempts allowed per task before it terminates FAILED.
    pub max_retries: u32,
    /// Pause before a failed task is re-enqueued.
    pub retry_delay: Duration,
    /// Cadence of the full-tree consistency sweep.
    pub consistency_interval: Duration,
    /// Cadence of the stuck-transaction recovery sweep.
    pub recovery_interval: Duration,
    /// How long a transaction may sit unsettled before recovery re-drives it.
    pub recovery_min_age: Duration,
    /// Comparison strategy for post-copy verification and the consistency
    /// sweep.
    pub verify_method: VerifyMethod,
    /// Transaction log rotation threshold in bytes.
    pub log_rotate_bytes: u64,
}

impl SyncConfig {
    /// Builds a configuration with the stock defaults for the given roots.
    #[must_use]
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(source_root: P, destination_root: Q) -> Self {
        Self {
            num_threads: 1,
            source_root: source_root.into(),
            destination_root: destination_root.into(),
            log_dir: PathBuf::from("/var/log/file_sync"),
            max_queue: 10_000,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            consistency_interval: Duration::from_secs(6 * 60 * 60),
            recovery_interval: Duration::from_secs(60),
            recovery_min_age: Duration::from_secs(5 * 60),
            verify_method: VerifyMethod::FastHash,
            log_rotate_bytes: 10 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_contract() {
        let config = SyncConfig::new("/s", "/d");
        assert_eq!(config.num_threads, 1);
        assert_eq!(config.log_dir, PathBuf::from("/var/log/file_sync"));
        assert_eq!(config.max_queue, 10_000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(5));
        assert_eq!(config.consistency_interval, Duration::from_secs(21_600));
        assert_eq!(config.recovery_interval, Duration::from_secs(60));
        assert_eq!(config.recovery_min_age, Duration::from_secs(300));
        assert_eq!(config.verify_method, VerifyMethod::FastHash);
        assert_eq!(config.log_rotate_bytes, 10 * 1024 * 1024);
    }
}
