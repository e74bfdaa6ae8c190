#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `fsmirror_walk` enumerates the contents of a directory tree in a
//! deterministic order. The verifier walks both the source and the destination
//! root with it when diffing the two trees, and the event source uses it to
//! backfill events for files that already exist inside a freshly created
//! directory.
//!
//! # Design
//!
//! [`Walker`] implements [`Iterator`] and yields [`WalkEntry`] values in
//! depth-first order, sorting each directory's entries lexicographically
//! before descending so the sequence is stable regardless of the underlying
//! filesystem's iteration order. Symbolic links are yielded but never
//! descended; the mirror only ever pairs regular files, so cycle tracking is
//! unnecessary.
//!
//! # Invariants
//!
//! - Every yielded [`WalkEntry`] lies within the configured root and its
//!   relative path never contains `..` segments.
//! - Traversal never panics; filesystem failures surface as [`WalkError`].
//!
//! # Examples
//!
//! ```
//! use fsmirror_walk::Walker;
//! use std::path::PathBuf;
//!
//! # fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let temp = tempfile::tempdir()?;
//! std::fs::create_dir(temp.path().join("sub"))?;
//! std::fs::write(temp.path().join("sub/file.txt"), b"data")?;
//!
//! let rel: Vec<PathBuf> = Walker::new(temp.path())?
//!     .map(|entry| Ok::<_, fsmirror_walk::WalkError>(entry?.relative_path().to_path_buf()))
//!     .collect::<Result<_, _>>()?;
//! assert_eq!(rel, vec![PathBuf::from("sub"), PathBuf::from("sub/file.txt")]);
//! # Ok(())
//! # }
//! # demo().unwrap();
//! ```

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Error returned when traversal fails.
#[derive(Debug, Error)]
pub enum WalkError {
    /// The traversal root could not be inspected.
    #[error("failed to inspect traversal root '{path}': {source}")]
    Root {
        /// Root that failed to provide metadata.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
    /// The traversal root exists but is not a directory.
    #[error("traversal root '{path}' is not a directory")]
    NotADirectory {
        /// Offending root path.
        path: PathBuf,
    },
    /// A directory's contents could not be read.
    #[error("failed to read directory '{path}': {source}")]
    ReadDir {
        /// Directory whose contents could not be read.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
    /// Metadata for an entry could not be retrieved.
    #[error("failed to inspect metadata for '{path}': {source}")]
    Metadata {
        /// Path whose metadata could not be retrieved.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
}

/// One filesystem entry produced by the traversal.
#[derive(Debug)]
pub struct WalkEntry {
    full_path: PathBuf,
    relative_path: PathBuf,
    metadata: fs::Metadata,
    depth: usize,
}

impl WalkEntry {
    /// Returns the absolute path of the entry.
    #[must_use]
    pub fn full_path(&self) -> &Path {
        &self.full_path
    }

    /// Returns the path relative to the traversal root.
    #[must_use]
    pub fn relative_path(&self) -> &Path {
        &self.relative_path
    }

    /// Provides access to the metadata captured for the entry.
    ///
    /// The metadata is taken with `symlink_metadata`, so symbolic links report
    /// themselves rather than their target.
    #[must_use]
    pub fn metadata(&self) -> &fs::Metadata {
        &self.metadata
    }

    /// Reports the depth below the root (direct children are depth `1`).
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// True when the entry is a regular file.
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.metadata.file_type().is_file()
    }
}

/// Depth-first iterator over a directory tree.
#[derive(Debug)]
pub struct Walker {
    stack: Vec<DirFrame>,
    finished: bool,
}

impl Walker {
    /// Builds a walker rooted at `root`.
    ///
    /// The root itself is not yielded; iteration starts with its children.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, WalkError> {
        let root = root.as_ref().to_path_buf();
        let metadata = fs::symlink_metadata(&root).map_err(|source| WalkError::Root {
            path: root.clone(),
            source,
        })?;
        if !metadata.file_type().is_dir() {
            return Err(WalkError::NotADirectory { path: root });
        }

        let frame = DirFrame::read(root, PathBuf::new(), 0)?;
        Ok(Self {
            stack: vec![frame],
            finished: false,
        })
    }

    /// Collects the relative paths of every regular file under `root`.
    pub fn regular_files<P: AsRef<Path>>(root: P) -> Result<Vec<PathBuf>, WalkError> {
        let mut files = Vec::new();
        for entry in Self::new(root)? {
            let entry = entry?;
            if entry.is_file() {
                files.push(entry.relative_path.clone());
            }
        }
        Ok(files)
    }

    fn prepare_entry(
        &mut self,
        full_path: PathBuf,
        relative_path: PathBuf,
        depth: usize,
    ) -> Result<WalkEntry, WalkError> {
        let metadata = fs::symlink_metadata(&full_path).map_err(|source| WalkError::Metadata {
            path: full_path.clone(),
            source,
        })?;

        if metadata.file_type().is_dir() {
            let frame = DirFrame::read(full_path.clone(), relative_path.clone(), depth)?;
            self.stack.push(frame);
        }

        Ok(WalkEntry {
            full_path,
            relative_path,
            metadata,
            depth,
        })
    }
}

impl Iterator for Walker {
    type Item = Result<WalkEntry, WalkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let (full_path, relative_path, depth) = {
                let frame = self.stack.last_mut()?;
                match frame.next_name() {
                    Some(name) => {
                        let full_path = frame.fs_path.join(&name);
                        let relative_path = if frame.relative_prefix.as_os_str().is_empty() {
                            PathBuf::from(&name)
                        } else {
                            frame.relative_prefix.join(&name)
                        };
                        (full_path, relative_path, frame.depth + 1)
                    }
                    None => {
                        self.stack.pop();
                        continue;
                    }
                }
            };

            match self.prepare_entry(full_path, relative_path, depth) {
                Ok(entry) => return Some(Ok(entry)),
                Err(error) => {
                    self.finished = true;
                    return Some(Err(error));
                }
            }
        }
    }
}

#[derive(Debug)]
struct DirFrame {
    fs_path: PathBuf,
    relative_prefix: PathBuf,
    entries: Vec<OsString>,
    index: usize,
    depth: usize,
}

impl DirFrame {
    fn read(fs_path: PathBuf, relative_prefix: PathBuf, depth: usize) -> Result<Self, WalkError> {
        let read_dir = fs::read_dir(&fs_path).map_err(|source| WalkError::ReadDir {
            path: fs_path.clone(),
            source,
        })?;
        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|source| WalkError::ReadDir {
                path: fs_path.clone(),
                source,
            })?;
            entries.push(entry.file_name());
        }
        entries.sort();

        Ok(Self {
            fs_path,
            relative_prefix,
            entries,
            index: 0,
            depth,
        })
    }

    fn next_name(&mut self) -> Option<OsString> {
        let name = self.entries.get(self.index)?.clone();
        self.index += 1;
        Some(name)
    }
}
