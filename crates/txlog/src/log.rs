//! The append-only log store.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{error, warn};

use crate::record::{now_ms, TransactionRecord, TransactionStatus};
use crate::{OperationKind, TxLogError, TxLogResult};

/// Rotation threshold applied when none is configured explicitly.
pub const DEFAULT_ROTATE_BYTES: u64 = 10 * 1024 * 1024;

const LOG_PREFIX: &str = "sync_log_";
const LOG_SUFFIX: &str = ".json";
const ARCHIVE_DIR: &str = "archive";

fn fresh_log_name() -> String {
    let stamp = OffsetDateTime::now_utc()
        .format(&format_description!(
            "[year][month][day]-[hour][minute][second]"
        ))
        .unwrap_or_else(|_| "19700101-000000".to_string());
    format!("{LOG_PREFIX}{stamp}{LOG_SUFFIX}")
}

fn io_err(path: &Path, source: std::io::Error) -> TxLogError {
    TxLogError::Io {
        path: path.to_path_buf(),
        source,
    }
}

struct LogInner {
    dir: PathBuf,
    current_path: PathBuf,
    writer: Option<File>,
    cache: HashMap<String, TransactionRecord>,
    next_id: u64,
    rotate_bytes: u64,
    malformed_lines: u64,
}

/// Append-only, crash-recoverable store of [`TransactionRecord`]s.
///
/// The handle is cheap to share behind an `Arc`; all operations take `&self`
/// and serialize internally.
pub struct TransactionLog {
    inner: Mutex<LogInner>,
}

impl TransactionLog {
    /// Creates a log rooted at `dir` with the default rotation threshold.
    ///
    /// The directory is created if missing. If earlier log files exist, the
    /// lexicographically largest becomes the current log; otherwise a freshly
    /// stamped name is chosen. Nothing is opened until [`open`](Self::open)
    /// or the first append.
    pub fn new<P: Into<PathBuf>>(dir: P) -> TxLogResult<Self> {
        Self::with_rotate_bytes(dir, DEFAULT_ROTATE_BYTES)
    }

    /// Creates a log rooted at `dir` that rotates once the current file
    /// reaches `rotate_bytes`.
    pub fn with_rotate_bytes<P: Into<PathBuf>>(dir: P, rotate_bytes: u64) -> TxLogResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| io_err(&dir, source))?;

        let current_path = Self::find_current(&dir)?.unwrap_or_else(|| dir.join(fresh_log_name()));
        Ok(Self {
            inner: Mutex::new(LogInner {
                dir,
                current_path,
                writer: None,
                cache: HashMap::new(),
                next_id: 1,
                rotate_bytes,
                malformed_lines: 0,
            }),
        })
    }

    fn find_current(dir: &Path) -> TxLogResult<Option<PathBuf>> {
        let entries = fs::read_dir(dir).map_err(|source| io_err(dir, source))?;
        let mut newest: Option<String> = None;
        for entry in entries {
            let entry = entry.map_err(|source| io_err(dir, source))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(LOG_PREFIX) && name.ends_with(LOG_SUFFIX) {
                let is_newer = newest
                    .as_deref()
                    .map_or(true, |current| name.as_str() > current);
                if is_newer {
                    newest = Some(name);
                }
            }
        }
        Ok(newest.map(|name| dir.join(name)))
    }

    /// Opens the current log for appending. Idempotent.
    ///
    /// Existing records are scanned to warm the cache and to seed the id
    /// counter past the largest id already on disk.
    pub fn open(&self) -> TxLogResult<()> {
        let mut inner = self.inner.lock().expect("transaction log lock poisoned");
        Self::open_locked(&mut inner)
    }

    /// Closes the append handle. Idempotent; records remain on disk.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("transaction log lock poisoned");
        inner.writer = None;
    }

    /// True while an append handle is held.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner
            .lock()
            .expect("transaction log lock poisoned")
            .writer
            .is_some()
    }

    /// Path of the current log file.
    #[must_use]
    pub fn current_path(&self) -> PathBuf {
        self.inner
            .lock()
            .expect("transaction log lock poisoned")
            .current_path
            .clone()
    }

    /// Number of unparseable lines skipped across all scans so far.
    #[must_use]
    pub fn malformed_line_count(&self) -> u64 {
        self.inner
            .lock()
            .expect("transaction log lock poisoned")
            .malformed_lines
    }

    /// Appends a PENDING record and returns its freshly generated id.
    ///
    /// Rotation is checked first; a rotation failure is reported but does not
    /// block the append, the old log simply keeps growing.
    pub fn log_transaction(
        &self,
        operation: OperationKind,
        source_path: &Path,
        dest_path: &Path,
        checksum: Option<String>,
    ) -> TxLogResult<String> {
        let mut inner = self.inner.lock().expect("transaction log lock poisoned");
        Self::open_locked(&mut inner)?;

        let threshold = inner.rotate_bytes;
        if let Err(rotate_error) = Self::rotate_locked(&mut inner, threshold) {
            warn!(error = %rotate_error, "transaction log rotation failed, continuing on current log");
            Self::open_locked(&mut inner)?;
        }

        let id = format!("tx-{}-{}", now_ms(), inner.next_id);
        inner.next_id += 1;

        let record = TransactionRecord {
            id: id.clone(),
            operation,
            source_path: source_path.to_string_lossy().into_owned(),
            dest_path: dest_path.to_string_lossy().into_owned(),
            status: TransactionStatus::Pending,
            timestamp: now_ms(),
            error_message: String::new(),
            checksum,
        };
        Self::append_locked(&mut inner, record)?;
        Ok(id)
    }

    /// Appends a full record for `id` with the new status.
    ///
    /// The previous occurrence supplies the operation and paths; `checksum`
    /// replaces the stored digest when given and carries it forward when not.
    /// Updating an id the log has never seen fails.
    pub fn update_transaction_status(
        &self,
        id: &str,
        status: TransactionStatus,
        error_message: Option<&str>,
        checksum: Option<String>,
    ) -> TxLogResult<()> {
        let mut inner = self.inner.lock().expect("transaction log lock poisoned");
        Self::open_locked(&mut inner)?;

        if !inner.cache.contains_key(id) {
            // The record may have been appended by another handle.
            Self::load_locked(&mut inner)?;
        }
        let previous = inner
            .cache
            .get(id)
            .cloned()
            .ok_or_else(|| TxLogError::UnknownTransaction(id.to_string()))?;

        let record = TransactionRecord {
            id: previous.id,
            operation: previous.operation,
            source_path: previous.source_path,
            dest_path: previous.dest_path,
            status,
            timestamp: now_ms(),
            error_message: error_message.unwrap_or("").to_string(),
            checksum: checksum.or(previous.checksum),
        };
        Self::append_locked(&mut inner, record)
    }

    /// Returns every record whose latest occurrence carries `status`.
    ///
    /// The current file is re-read so appends made through other handles are
    /// observed.
    pub fn get_transactions_by_status(
        &self,
        status: TransactionStatus,
    ) -> TxLogResult<Vec<TransactionRecord>> {
        let mut inner = self.inner.lock().expect("transaction log lock poisoned");
        Self::load_locked(&mut inner)?;
        Ok(inner
            .cache
            .values()
            .filter(|record| record.status == status)
            .cloned()
            .collect())
    }

    /// Returns the records whose latest occurrence is PENDING or IN_PROGRESS.
    pub fn get_pending_transactions(&self) -> TxLogResult<Vec<TransactionRecord>> {
        let mut inner = self.inner.lock().expect("transaction log lock poisoned");
        Self::load_locked(&mut inner)?;
        Ok(inner
            .cache
            .values()
            .filter(|record| record.status.is_unsettled())
            .cloned()
            .collect())
    }

    /// Rotates the current log into `archive/` once it reaches `max_bytes`.
    ///
    /// Returns `true` when a rotation happened. On archive failure the error
    /// is returned and the old log remains the current one.
    pub fn rotate_if_needed(&self, max_bytes: u64) -> TxLogResult<bool> {
        let mut inner = self.inner.lock().expect("transaction log lock poisoned");
        Self::rotate_locked(&mut inner, max_bytes)
    }

    fn open_locked(inner: &mut LogInner) -> TxLogResult<()> {
        if inner.writer.is_some() {
            return Ok(());
        }
        Self::load_locked(inner)?;
        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&inner.current_path)
            .map_err(|source| io_err(&inner.current_path, source))?;
        inner.writer = Some(writer);
        Ok(())
    }

    fn load_locked(inner: &mut LogInner) -> TxLogResult<()> {
        inner.cache.clear();
        let file = match File::open(&inner.current_path) {
            Ok(file) => file,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => return Err(io_err(&inner.current_path, source)),
        };

        for line in BufReader::new(file).lines() {
            let line = line.map_err(|source| io_err(&inner.current_path, source))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TransactionRecord>(&line) {
                Ok(record) => {
                    if let Some(counter) = record
                        .id
                        .rsplit_once('-')
                        .and_then(|(_, tail)| tail.parse::<u64>().ok())
                    {
                        inner.next_id = inner.next_id.max(counter + 1);
                    }
                    inner.cache.insert(record.id.clone(), record);
                }
                Err(parse_error) => {
                    inner.malformed_lines += 1;
                    error!(
                        log = %inner.current_path.display(),
                        error = %parse_error,
                        "skipping malformed transaction record"
                    );
                }
            }
        }
        Ok(())
    }

    fn append_locked(inner: &mut LogInner, record: TransactionRecord) -> TxLogResult<()> {
        Self::open_locked(inner)?;

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let path = inner.current_path.clone();
        if let Some(writer) = inner.writer.as_mut() {
            writer
                .write_all(line.as_bytes())
                .map_err(|source| io_err(&path, source))?;
            writer.flush().map_err(|source| io_err(&path, source))?;
        }

        inner.cache.insert(record.id.clone(), record);
        Ok(())
    }

    fn rotate_locked(inner: &mut LogInner, max_bytes: u64) -> TxLogResult<bool> {
        let size = match fs::metadata(&inner.current_path) {
            Ok(meta) => meta.len(),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(source) => return Err(io_err(&inner.current_path, source)),
        };
        if size < max_bytes {
            return Ok(false);
        }

        inner.writer = None;

        let archive_dir = inner.dir.join(ARCHIVE_DIR);
        fs::create_dir_all(&archive_dir).map_err(|source| io_err(&archive_dir, source))?;

        let file_name = inner
            .current_path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| fresh_log_name().into());
        fs::rename(&inner.current_path, archive_dir.join(&file_name))
            .map_err(|source| io_err(&inner.current_path, source))?;

        inner.current_path = inner.dir.join(fresh_log_name());
        inner.cache.clear();
        Self::open_locked(inner)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn id_counter(id: &str) -> u64 {
        id.rsplit_once('-')
            .and_then(|(_, tail)| tail.parse().ok())
            .expect("numeric id suffix")
    }

    #[test]
    fn records_transition_through_their_lifecycle() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = TransactionLog::new(temp.path()).expect("create log");
        log.open().expect("open");

        let id = log
            .log_transaction(
                OperationKind::Copy,
                Path::new("/s/a.txt"),
                Path::new("/d/a.txt"),
                None,
            )
            .expect("log transaction");

        log.update_transaction_status(&id, TransactionStatus::InProgress, None, None)
            .expect("mark in progress");
        log.update_transaction_status(
            &id,
            TransactionStatus::Completed,
            None,
            Some("5d41402abc4b2a76b9719d911017c592".to_string()),
        )
        .expect("mark completed");

        let completed = log
            .get_transactions_by_status(TransactionStatus::Completed)
            .expect("query");
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, id);
        assert_eq!(
            completed[0].checksum.as_deref(),
            Some("5d41402abc4b2a76b9719d911017c592")
        );
        assert!(log
            .get_pending_transactions()
            .expect("pending")
            .is_empty());
    }

    #[test]
    fn updating_an_unknown_id_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = TransactionLog::new(temp.path()).expect("create log");
        log.open().expect("open");

        let err = log
            .update_transaction_status("tx-0-999", TransactionStatus::Completed, None, None)
            .expect_err("must fail");
        assert!(matches!(err, TxLogError::UnknownTransaction(_)));
    }

    #[test]
    fn latest_occurrence_defines_the_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = TransactionLog::new(temp.path()).expect("create log");
        log.open().expect("open");

        let id = log
            .log_transaction(OperationKind::Copy, Path::new("/s/x"), Path::new("/d/x"), None)
            .expect("log");
        log.update_transaction_status(&id, TransactionStatus::Failed, Some("disk full"), None)
            .expect("fail it");

        assert!(log.get_pending_transactions().expect("pending").is_empty());
        let failed = log
            .get_transactions_by_status(TransactionStatus::Failed)
            .expect("query");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error_message, "disk full");
    }

    #[test]
    fn unsettled_records_survive_an_unclosed_drop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let id = {
            let log = TransactionLog::new(temp.path()).expect("create log");
            log.open().expect("open");
            let id = log
                .log_transaction(OperationKind::Copy, Path::new("/s/y"), Path::new("/d/y"), None)
                .expect("log");
            log.update_transaction_status(&id, TransactionStatus::InProgress, None, None)
                .expect("progress");
            id
            // Dropped without close, as a crash would leave it.
        };

        let reopened = TransactionLog::new(temp.path()).expect("reopen");
        reopened.open().expect("open");
        let pending = reopened.get_pending_transactions().expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].status, TransactionStatus::InProgress);
    }

    #[test]
    fn id_counter_continues_across_reopen() {
        let temp = tempfile::tempdir().expect("tempdir");
        let last = {
            let log = TransactionLog::new(temp.path()).expect("create log");
            log.open().expect("open");
            let _ = log
                .log_transaction(OperationKind::Copy, Path::new("/s/1"), Path::new("/d/1"), None)
                .expect("log");
            log.log_transaction(OperationKind::Copy, Path::new("/s/2"), Path::new("/d/2"), None)
                .expect("log")
        };

        let reopened = TransactionLog::new(temp.path()).expect("reopen");
        reopened.open().expect("open");
        let next = reopened
            .log_transaction(OperationKind::Copy, Path::new("/s/3"), Path::new("/d/3"), None)
            .expect("log");
        assert!(id_counter(&next) > id_counter(&last));
    }

    #[test]
    fn torn_final_line_is_skipped_and_counted() {
        let temp = tempfile::tempdir().expect("tempdir");
        {
            let log = TransactionLog::new(temp.path()).expect("create log");
            log.open().expect("open");
            log.log_transaction(OperationKind::Copy, Path::new("/s/a"), Path::new("/d/a"), None)
                .expect("log");
        }

        let current = TransactionLog::new(temp.path())
            .expect("reopen")
            .current_path();
        let mut file = OpenOptions::new()
            .append(true)
            .open(&current)
            .expect("append handle");
        file.write_all(b"{\"id\":\"tx-17000000").expect("torn line");

        let log = TransactionLog::new(temp.path()).expect("reopen");
        log.open().expect("open");
        assert_eq!(log.get_pending_transactions().expect("pending").len(), 1);
        assert_eq!(log.malformed_line_count(), 1);
    }

    #[test]
    fn external_appends_are_visible_to_queries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = TransactionLog::new(temp.path()).expect("create log");
        log.open().expect("open");
        log.log_transaction(OperationKind::Copy, Path::new("/s/a"), Path::new("/d/a"), None)
            .expect("log");

        let mut file = OpenOptions::new()
            .append(true)
            .open(log.current_path())
            .expect("append handle");
        writeln!(
            file,
            r#"{{"id":"tx-1700000000000-99","operation":0,"sourcePath":"/s/ext","destPath":"/d/ext","status":1,"timestamp":1700000000000,"errorMessage":""}}"#
        )
        .expect("external record");

        let pending = log.get_pending_transactions().expect("pending");
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().any(|r| r.id == "tx-1700000000000-99"));
    }

    #[test]
    fn rotation_archives_the_current_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = TransactionLog::with_rotate_bytes(temp.path(), 1).expect("create log");
        log.open().expect("open");

        let first = log.current_path();
        log.log_transaction(OperationKind::Copy, Path::new("/s/a"), Path::new("/d/a"), None)
            .expect("log");
        // The next append sees the non-empty file over the 1-byte threshold.
        log.log_transaction(OperationKind::Copy, Path::new("/s/b"), Path::new("/d/b"), None)
            .expect("log");

        let archived: Vec<_> = fs::read_dir(temp.path().join(ARCHIVE_DIR))
            .expect("archive dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0], first.file_name().expect("file name"));
    }

    #[test]
    fn rotation_is_a_no_op_under_the_threshold() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = TransactionLog::new(temp.path()).expect("create log");
        log.open().expect("open");
        log.log_transaction(OperationKind::Copy, Path::new("/s/a"), Path::new("/d/a"), None)
            .expect("log");

        assert!(!log.rotate_if_needed(DEFAULT_ROTATE_BYTES).expect("check"));
        assert!(log.rotate_if_needed(1).expect("check"));
    }

    #[test]
    fn open_and_close_are_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = TransactionLog::new(temp.path()).expect("create log");
        log.open().expect("open");
        log.open().expect("open again");
        assert!(log.is_open());
        log.close();
        log.close();
        assert!(!log.is_open());
    }
}
