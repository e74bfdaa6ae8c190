#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `fsmirror_fsops` holds the low-level filesystem operations the sync workers
//! execute: copying one file into the mirror with atomic publication, creating
//! missing destination directories, preserving timestamps, and comparing two
//! files byte by byte.
//!
//! # Design
//!
//! [`copy_file`] never exposes a half-written destination. Contents are
//! streamed into a uniquely named temporary sibling of the destination, the
//! source timestamps are applied to the temporary, and only then is the
//! temporary renamed over the destination. Observers of the destination path
//! therefore see either the old bytes or the new bytes, never a prefix of the
//! new bytes. A [`TempFileGuard`] removes the temporary on every error path.
//!
//! # Errors
//!
//! All operations return [`FsOpError`], which captures the failing path and
//! the underlying [`io::Error`] so callers can surface actionable diagnostics
//! without re-parsing strings.

mod temp_guard;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};

use filetime::FileTime;
use thiserror::Error;

pub use temp_guard::TempFileGuard;

/// Buffer size used for streamed copies and comparisons.
pub const COPY_BUF_LEN: usize = 8 * 1024;

static NEXT_TEMP_ID: AtomicUsize = AtomicUsize::new(0);

/// Result alias for filesystem operations.
pub type FsOpResult<T> = Result<T, FsOpError>;

/// Errors raised by the filesystem primitives.
#[derive(Debug, Error)]
pub enum FsOpError {
    /// A destination directory could not be created.
    #[error("failed to create directory '{path}': {source}")]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
    /// The destination path exists and is a directory.
    #[error("destination '{path}' is a directory")]
    DestinationIsDirectory {
        /// Offending destination path.
        path: PathBuf,
    },
    /// The source could not be opened or read.
    #[error("failed to read source '{path}': {source}")]
    ReadSource {
        /// Source path that failed.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
    /// The destination (or its temporary sibling) could not be written.
    #[error("failed to write destination '{path}': {source}")]
    WriteDestination {
        /// Path that failed to accept the write.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
    /// Source timestamps could not be applied to the destination.
    #[error("failed to preserve timestamps on '{path}': {source}")]
    Timestamps {
        /// Path whose timestamps could not be set.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
    /// The temporary file could not be renamed over the destination.
    #[error("failed to publish '{path}': {source}")]
    Publish {
        /// Final destination path.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
}

/// Creates the parent directory of `path`, recursively, if it is missing.
pub fn ensure_parent_dir(path: &Path) -> FsOpResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| FsOpError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    Ok(())
}

fn temporary_sibling(destination: &Path, unique: usize) -> PathBuf {
    let file_name = destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dest".to_string());
    let temp_name = format!(".fsmirror-tmp-{file_name}-{}-{unique}", process::id());
    destination.with_file_name(temp_name)
}

fn open_temporary(destination: &Path) -> FsOpResult<(PathBuf, File)> {
    loop {
        let unique = NEXT_TEMP_ID.fetch_add(1, Ordering::Relaxed);
        let temp_path = temporary_sibling(destination, unique);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
        {
            Ok(file) => return Ok((temp_path, file)),
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(source) => {
                return Err(FsOpError::WriteDestination {
                    path: temp_path,
                    source,
                });
            }
        }
    }
}

/// Copies `source` to `destination` with atomic publication.
///
/// The parent directory of the destination is created if missing, the source
/// contents are streamed into a temporary sibling, the source's access and
/// modification times are applied to the temporary, and the temporary is then
/// renamed over the destination. An existing destination file is replaced; an
/// existing destination directory is an error, never silently removed.
///
/// Symbolic links are followed on the source side, so the destination always
/// receives a regular file holding the link target's bytes.
pub fn copy_file(source: &Path, destination: &Path) -> FsOpResult<()> {
    match fs::symlink_metadata(destination) {
        Ok(meta) if meta.file_type().is_dir() => {
            return Err(FsOpError::DestinationIsDirectory {
                path: destination.to_path_buf(),
            });
        }
        _ => {}
    }

    ensure_parent_dir(destination)?;

    let source_meta = fs::metadata(source).map_err(|err| FsOpError::ReadSource {
        path: source.to_path_buf(),
        source: err,
    })?;
    let mut reader = File::open(source).map_err(|err| FsOpError::ReadSource {
        path: source.to_path_buf(),
        source: err,
    })?;

    let (temp_path, mut writer) = open_temporary(destination)?;
    let mut guard = TempFileGuard::new(temp_path.clone());

    let mut buf = [0u8; COPY_BUF_LEN];
    loop {
        let read = reader.read(&mut buf).map_err(|err| FsOpError::ReadSource {
            path: source.to_path_buf(),
            source: err,
        })?;
        if read == 0 {
            break;
        }
        writer
            .write_all(&buf[..read])
            .map_err(|err| FsOpError::WriteDestination {
                path: temp_path.clone(),
                source: err,
            })?;
    }
    writer.flush().map_err(|err| FsOpError::WriteDestination {
        path: temp_path.clone(),
        source: err,
    })?;
    drop(writer);

    let atime = FileTime::from_last_access_time(&source_meta);
    let mtime = FileTime::from_last_modification_time(&source_meta);
    filetime::set_file_times(&temp_path, atime, mtime).map_err(|err| FsOpError::Timestamps {
        path: temp_path.clone(),
        source: err,
    })?;

    fs::rename(&temp_path, destination).map_err(|err| FsOpError::Publish {
        path: destination.to_path_buf(),
        source: err,
    })?;
    guard.keep();
    Ok(())
}

fn fill_buf(reader: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = reader.read(&mut buf[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

/// Compares the contents of two files byte by byte.
///
/// Returns `true` iff both files reach EOF having produced identical bytes.
pub fn compare_file_contents(left: &Path, right: &Path) -> io::Result<bool> {
    let mut left_file = File::open(left)?;
    let mut right_file = File::open(right)?;

    let mut left_buf = [0u8; COPY_BUF_LEN];
    let mut right_buf = [0u8; COPY_BUF_LEN];

    loop {
        let left_len = fill_buf(&mut left_file, &mut left_buf)?;
        let right_len = fill_buf(&mut right_file, &mut right_buf)?;
        if left_len != right_len || left_buf[..left_len] != right_buf[..right_len] {
            return Ok(false);
        }
        if left_len == 0 {
            return Ok(true);
        }
    }
}
