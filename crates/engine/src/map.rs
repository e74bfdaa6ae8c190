//! Source-to-destination path mapping.

use std::path::{Path, PathBuf};

/// Maps a source path onto its mirror location.
///
/// When `source` starts with `source_root` (compared as raw bytes, no
/// normalization), the root prefix is swapped for `destination_root`. Any
/// other path lands directly under the destination root by base name.
#[cfg(unix)]
#[must_use]
pub fn map_destination(source: &Path, source_root: &Path, destination_root: &Path) -> PathBuf {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let source_bytes = source.as_os_str().as_bytes();
    let root_bytes = source_root.as_os_str().as_bytes();
    if source_bytes.starts_with(root_bytes) {
        let mut mapped = destination_root.as_os_str().to_os_string();
        mapped.push(OsStr::from_bytes(&source_bytes[root_bytes.len()..]));
        return PathBuf::from(mapped);
    }
    fallback_by_name(source, destination_root)
}

/// Maps a source path onto its mirror location.
#[cfg(not(unix))]
#[must_use]
pub fn map_destination(source: &Path, source_root: &Path, destination_root: &Path) -> PathBuf {
    match source.strip_prefix(source_root) {
        Ok(suffix) => destination_root.join(suffix),
        Err(_) => fallback_by_name(source, destination_root),
    }
}

fn fallback_by_name(source: &Path, destination_root: &Path) -> PathBuf {
    match source.file_name() {
        Some(name) => destination_root.join(name),
        None => destination_root.to_path_buf(),
    }
}
