//! The sync engine: worker pool plus recovery and consistency sweepers.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use fsmirror_fsops::copy_file;
use fsmirror_metrics::MetricsSink;
use fsmirror_queue::{SyncPriority, SyncQueue, SyncTask, TaskOperation};
use fsmirror_txlog::{OperationKind, TransactionLog, TransactionRecord, TransactionStatus};
use fsmirror_verify::Verifier;
use fsmirror_watch::{EventAction, FsEvent};

use crate::cancel::CancelToken;
use crate::config::SyncConfig;
use crate::error::EngineError;
use crate::map::map_destination;

/// How long a worker blocks on the queue before re-checking for shutdown.
const WORKER_POLL: Duration = Duration::from_millis(100);
/// Producer-side back-pressure budget.
const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(1);
/// Sweeper sleep granularity; keeps shutdown latency low.
const SWEEP_SLICE: Duration = Duration::from_millis(100);

struct EngineShared {
    config: SyncConfig,
    queue: SyncQueue,
    log: TransactionLog,
    verifier: Verifier,
    metrics: Arc<dyn MetricsSink>,
    cancel: CancelToken,
    running: AtomicBool,
    consistency_requested: AtomicBool,
}

struct EngineState {
    running: bool,
    threads: Vec<JoinHandle<()>>,
}

/// Durable one-way synchronizer.
///
/// [`start`](Self::start) spawns the worker pool and both sweepers;
/// [`stop`](Self::stop) winds everything down and joins it. Both are
/// idempotent. Work arrives through [`sync_file`](Self::sync_file),
/// [`batch_sync`](Self::batch_sync), and [`apply_event`](Self::apply_event);
/// [`perform_consistency_check`](Self::perform_consistency_check) triggers an
/// immediate whole-tree sweep.
pub struct SyncEngine {
    shared: Arc<EngineShared>,
    state: Mutex<EngineState>,
}

impl SyncEngine {
    /// Builds an engine over `config`, reporting through `metrics`.
    ///
    /// The transaction log directory is created here;
    /// [`EngineError::LogUnavailable`] is returned when that fails.
    pub fn new(config: SyncConfig, metrics: Arc<dyn MetricsSink>) -> Result<Self, EngineError> {
        let log = TransactionLog::with_rotate_bytes(&config.log_dir, config.log_rotate_bytes)
            .map_err(EngineError::LogUnavailable)?;
        let queue = SyncQueue::new(config.max_queue);

        Ok(Self {
            shared: Arc::new(EngineShared {
                config,
                queue,
                log,
                verifier: Verifier::new(),
                metrics,
                cancel: CancelToken::new(),
                running: AtomicBool::new(false),
                consistency_requested: AtomicBool::new(false),
            }),
            state: Mutex::new(EngineState {
                running: false,
                threads: Vec::new(),
            }),
        })
    }

    /// The configuration the engine runs with.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    /// Token the service wrapper can use to request shutdown from a signal
    /// handler; [`stop`](Self::stop) must still be called to join threads.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.shared.cancel.clone()
    }

    /// True between a successful [`start`](Self::start) and
    /// [`stop`](Self::stop).
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Opens the log and spawns the worker pool and sweepers. Idempotent.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock().expect("engine state lock poisoned");
        if state.running {
            return Ok(());
        }

        self.shared.log.open().map_err(EngineError::LogUnavailable)?;
        if let Err(err) = fs::create_dir_all(&self.shared.config.destination_root) {
            warn!(
                error = %err,
                root = %self.shared.config.destination_root.display(),
                "could not pre-create destination root"
            );
        }

        self.shared.cancel.reset();
        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.consistency_requested.store(false, Ordering::SeqCst);

        let mut threads = Vec::new();
        for index in 0..self.shared.config.num_threads.max(1) {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("fsmirror-worker-{index}"))
                .spawn(move || worker_loop(&shared));
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(source) => {
                    self.abort_start(threads);
                    return Err(EngineError::Spawn(source));
                }
            }
        }
        for (name, entry) in [
            ("fsmirror-recovery", recovery_loop as fn(&EngineShared)),
            ("fsmirror-consistency", consistency_loop as fn(&EngineShared)),
        ] {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(name.to_string())
                .spawn(move || entry(&shared));
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(source) => {
                    self.abort_start(threads);
                    return Err(EngineError::Spawn(source));
                }
            }
        }

        state.threads = threads;
        state.running = true;
        self.shared.metrics.record("sync_manager", "started");
        Ok(())
    }

    fn abort_start(&self, threads: Vec<JoinHandle<()>>) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.cancel.cancel();
        for handle in threads {
            if handle.join().is_err() {
                error!("sync thread panicked during aborted start");
            }
        }
    }

    /// Stops accepting work, drains the threads, and closes the log.
    /// Idempotent.
    pub fn stop(&self) {
        let mut state = self.state.lock().expect("engine state lock poisoned");
        if !state.running {
            return;
        }
        state.running = false;

        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.cancel.cancel();
        self.shared.queue.shutdown();

        for handle in state.threads.drain(..) {
            if handle.join().is_err() {
                error!("sync thread panicked");
            }
        }

        self.shared.log.close();
        self.shared.metrics.record("sync_manager", "stopped");
    }

    /// Queues one path for synchronization.
    ///
    /// Returns `false` while the engine is not running, or when the queue
    /// stayed full past the back-pressure budget.
    pub fn sync_file(&self, path: &Path, priority: SyncPriority) -> bool {
        if !self.is_running() {
            return false;
        }
        let task = SyncTask::new(path.to_path_buf(), TaskOperation::Sync, priority);
        let queued = self.shared.queue.enqueue(task, ENQUEUE_TIMEOUT);
        if queued {
            self.shared
                .metrics
                .record("file_queued", &path.display().to_string());
        } else {
            self.shared
                .metrics
                .record("file_queue_failed", &path.display().to_string());
        }
        queued
    }

    /// Queues a batch of paths; returns `true` only when every path was
    /// accepted.
    pub fn batch_sync(&self, paths: &[PathBuf], priority: SyncPriority) -> bool {
        if !self.is_running() {
            return false;
        }
        let mut all_queued = true;
        for path in paths {
            if !self.sync_file(path, priority) {
                all_queued = false;
            }
        }
        all_queued
    }

    /// Requests an immediate consistency sweep.
    pub fn perform_consistency_check(&self) {
        self.shared
            .consistency_requested
            .store(true, Ordering::SeqCst);
    }

    /// Feeds one watcher event into the engine.
    ///
    /// Creations, modifications, and move-ins queue a NORMAL sync for the
    /// path. An overflow resync triggers a full consistency sweep. Deletions
    /// are not mirrored; the consistency sweep reports what they leave
    /// behind.
    pub fn apply_event(&self, event: &FsEvent) {
        match event.action {
            EventAction::Create | EventAction::Modify | EventAction::MovedTo => {
                if event.path.is_dir() {
                    // Directories materialize on demand when their files copy.
                    return;
                }
                self.sync_file(&event.path, SyncPriority::Normal);
            }
            EventAction::Resync => self.perform_consistency_check(),
            EventAction::Delete | EventAction::MovedFrom => {
                debug!(path = %event.path.display(), "ignoring deletion event");
            }
        }
    }

    /// Human-readable queue snapshot.
    #[must_use]
    pub fn queue_stats(&self) -> String {
        format!("Queue size: {}", self.shared.queue.size())
    }

    /// Human-readable transaction log snapshot.
    #[must_use]
    pub fn transaction_stats(&self) -> String {
        match self.shared.log.get_pending_transactions() {
            Ok(pending) => format!("Pending transactions: {}", pending.len()),
            Err(error) => format!("Pending transactions: unavailable ({error})"),
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sleeps for `total` in short slices; returns `false` when cancelled before
/// the full duration elapsed.
fn sleep_unless_cancelled(cancel: &CancelToken, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(SWEEP_SLICE.min(deadline - now));
    }
}

fn worker_loop(shared: &EngineShared) {
    while shared.running.load(Ordering::SeqCst) {
        match shared.queue.dequeue(WORKER_POLL) {
            Some(task) => process_task(shared, &task),
            None => {
                // A shut-down queue returns None without waiting; leave
                // instead of spinning on it.
                if shared.queue.is_shutdown() {
                    break;
                }
            }
        }
    }
}

fn process_task(shared: &EngineShared, task: &SyncTask) {
    let source = task.path();
    let destination = map_destination(
        source,
        &shared.config.source_root,
        &shared.config.destination_root,
    );

    let tx_id = match shared
        .log
        .log_transaction(OperationKind::Copy, source, &destination, None)
    {
        Ok(id) => id,
        Err(log_error) => {
            // Proceeding unlogged would make the operation unrecoverable;
            // the next consistency sweep re-detects the mutation.
            warn!(error = %log_error, source = %source.display(), "dropping task, log append failed");
            shared
                .metrics
                .record("tx_log_failed", &source.display().to_string());
            return;
        }
    };
    shared.metrics.record("tx_started", &tx_id);

    if let Err(log_error) =
        shared
            .log
            .update_transaction_status(&tx_id, TransactionStatus::InProgress, None, None)
    {
        warn!(error = %log_error, id = %tx_id, "dropping task, log append failed");
        shared.metrics.record("tx_log_failed", &tx_id);
        return;
    }

    let (verified, error_text, checksum) = match copy_file(source, &destination) {
        Ok(()) => {
            let outcome =
                shared
                    .verifier
                    .verify_file(source, &destination, shared.config.verify_method);
            if outcome.matches {
                shared.metrics.record("sync_verification", "success");
            } else {
                shared
                    .metrics
                    .record("sync_verification", &format!("failed: {}", outcome.error));
            }
            let checksum = if outcome.source_hash.is_empty() {
                None
            } else {
                Some(outcome.source_hash.clone())
            };
            (outcome.matches, outcome.error, checksum)
        }
        Err(copy_error) => {
            shared
                .metrics
                .record("sync_error", &format!("{copy_error}: {}", source.display()));
            (false, "Sync operation failed".to_string(), None)
        }
    };

    if verified {
        if let Err(log_error) = shared.log.update_transaction_status(
            &tx_id,
            TransactionStatus::Completed,
            None,
            checksum,
        ) {
            warn!(error = %log_error, id = %tx_id, "terminal record append failed");
        }
        shared.metrics.record("tx_completed", &tx_id);
    } else {
        if let Err(log_error) = shared.log.update_transaction_status(
            &tx_id,
            TransactionStatus::Failed,
            Some(&error_text),
            None,
        ) {
            warn!(error = %log_error, id = %tx_id, "terminal record append failed");
        }
        shared
            .metrics
            .record("tx_failed", &format!("{tx_id}: {error_text}"));

        if task.retry_count() < shared.config.max_retries {
            let retry = task.retried();
            sleep_unless_cancelled(&shared.cancel, shared.config.retry_delay);
            if shared.queue.enqueue(retry, ENQUEUE_TIMEOUT) {
                shared.metrics.record("tx_retry", &tx_id);
            } else {
                shared
                    .metrics
                    .record("file_queue_failed", &source.display().to_string());
            }
        }
    }
}

fn recovery_loop(shared: &EngineShared) {
    while shared.running.load(Ordering::SeqCst) {
        if !sleep_unless_cancelled(&shared.cancel, shared.config.recovery_interval) {
            break;
        }
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }
        run_recovery_pass(shared);
    }
}

fn run_recovery_pass(shared: &EngineShared) {
    let pending = match shared.log.get_pending_transactions() {
        Ok(pending) => pending,
        Err(log_error) => {
            shared
                .metrics
                .record("recovery_error", &log_error.to_string());
            return;
        }
    };
    if pending.is_empty() {
        return;
    }
    shared.metrics.record(
        "recovery_started",
        &format!("found {} transactions", pending.len()),
    );

    for record in pending {
        if record.age() < shared.config.recovery_min_age {
            continue;
        }
        recover_transaction(shared, &record);
    }
}

fn recover_transaction(shared: &EngineShared, record: &TransactionRecord) {
    shared.metrics.record("tx_recovery_attempt", &record.id);

    let source = Path::new(&record.source_path);
    if !source.exists() {
        if let Err(log_error) = shared.log.update_transaction_status(
            &record.id,
            TransactionStatus::Failed,
            Some("Source file no longer exists"),
            None,
        ) {
            shared
                .metrics
                .record("recovery_error", &log_error.to_string());
        }
        shared
            .metrics
            .record("tx_recovery_failed", &format!("{}: source missing", record.id));
        return;
    }

    let task = SyncTask::new(
        source.to_path_buf(),
        TaskOperation::Recovery,
        SyncPriority::High,
    );
    if shared.queue.enqueue(task, ENQUEUE_TIMEOUT) {
        shared.metrics.record("tx_recovery_queued", &record.id);
    } else {
        shared
            .metrics
            .record("tx_recovery_queue_failed", &record.id);
    }
}

fn consistency_loop(shared: &EngineShared) {
    while shared.running.load(Ordering::SeqCst) {
        if !wait_for_consistency_trigger(shared) {
            break;
        }
        shared.consistency_requested.store(false, Ordering::SeqCst);
        run_consistency_pass(shared);
    }
}

/// Waits for the next sweep: the configured cadence, or sooner when a sweep
/// has been requested. Returns `false` on cancellation.
fn wait_for_consistency_trigger(shared: &EngineShared) -> bool {
    let deadline = Instant::now() + shared.config.consistency_interval;
    loop {
        if shared.cancel.is_cancelled() {
            return false;
        }
        if shared.consistency_requested.load(Ordering::SeqCst) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(SWEEP_SLICE.min(deadline - now));
    }
}

fn run_consistency_pass(shared: &EngineShared) {
    shared.metrics.record("consistency_check", "started");

    let config = &shared.config;
    if !config.source_root.is_dir() || !config.destination_root.is_dir() {
        shared.metrics.record(
            "consistency_check_error",
            "source or destination root is not a directory",
        );
        return;
    }

    let results = shared.verifier.verify_directory(
        &config.source_root,
        &config.destination_root,
        config.verify_method,
        true,
        config.num_threads.max(1),
    );

    let mut total = 0usize;
    let mut mismatches = 0usize;
    for (rel, outcome) in &results {
        total += 1;
        if outcome.matches {
            continue;
        }
        mismatches += 1;

        let full_path = config.source_root.join(rel);
        let task = SyncTask::new(full_path, TaskOperation::Consistency, SyncPriority::Low);
        if !shared.queue.enqueue(task, ENQUEUE_TIMEOUT) {
            shared
                .metrics
                .record("file_queue_failed", &rel.display().to_string());
        }
        shared
            .metrics
            .record("consistency_mismatch", &rel.display().to_string());
    }

    shared.metrics.record(
        "consistency_check_complete",
        &format!("Files: {total}, Mismatches: {mismatches}"),
    );
}
