//! RAII cleanup for the temporary files used during atomic publication.

use std::path::{Path, PathBuf};

/// Guard that removes a temporary file on drop unless told to keep it.
///
/// [`crate::copy_file`] writes into a temporary sibling of the destination and
/// calls [`keep`](Self::keep) only after the rename succeeds, so any error or
/// panic between creation and publication removes the partial file instead of
/// leaking it next to the destination.
#[derive(Debug)]
pub struct TempFileGuard {
    path: PathBuf,
    keep_on_drop: bool,
}

impl TempFileGuard {
    /// Creates a guard for the given temporary file path.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            keep_on_drop: false,
        }
    }

    /// Marks the file as published; it will survive the guard.
    pub fn keep(&mut self) {
        self.keep_on_drop = true;
    }

    /// Returns the guarded path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if !self.keep_on_drop {
            // The file may never have been created, or the rename may already
            // have moved it away; either way removal errors are unreportable
            // from a drop context.
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
