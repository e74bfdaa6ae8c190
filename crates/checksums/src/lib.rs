#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `fsmirror_checksums` provides the content digests the mirror uses to decide
//! whether a destination file faithfully reproduces its source. Two algorithms
//! are exposed: MD5 for the fast default verification pass and SHA-256 for the
//! stronger, slower pass. Both are streaming wrappers so callers can digest
//! arbitrarily large files without holding them in memory.
//!
//! # Design
//!
//! - [`ChecksumDigest`] is the streaming trait shared by [`Md5`] and
//!   [`Sha256`]; callers feed bytes via `update` and obtain the final digest
//!   through `finalize`.
//! - [`hash_file_hex`] streams a file through a digest with a fixed 8 KiB
//!   buffer and renders the result as lowercase hex, the canonical form stored
//!   in transaction records and compared during verification.
//! - [`to_hex`] renders any digest as lowercase hex without allocating per
//!   byte.
//!
//! # Errors
//!
//! File hashing surfaces [`std::io::Error`] unchanged; pure digest operations
//! cannot fail.

mod md5;
mod sha256;

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

pub use md5::Md5;
pub use sha256::Sha256;

/// Read buffer used when streaming file contents through a digest.
pub const HASH_BUF_LEN: usize = 8 * 1024;

/// Trait implemented by the streaming digest algorithms used for verification.
///
/// # Examples
///
/// ```
/// use fsmirror_checksums::{ChecksumDigest, Md5};
///
/// let mut hasher = Md5::new();
/// hasher.update(b"example");
/// let digest = hasher.finalize();
/// assert_eq!(digest.as_ref().len(), Md5::DIGEST_LEN);
/// ```
pub trait ChecksumDigest: Sized {
    /// Type returned when finalising the digest.
    type Digest: AsRef<[u8]>;

    /// Length of the final digest in bytes.
    const DIGEST_LEN: usize;

    /// Creates a hasher with an empty state.
    fn new() -> Self;

    /// Feeds additional bytes into the digest state.
    fn update(&mut self, data: &[u8]);

    /// Finalises the digest and returns the resulting hash.
    fn finalize(self) -> Self::Digest;

    /// Convenience helper that hashes `data` in a single call.
    fn digest(data: &[u8]) -> Self::Digest {
        let mut hasher = Self::new();
        hasher.update(data);
        hasher.finalize()
    }
}

/// Renders a digest as a lowercase hexadecimal string.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        write!(&mut out, "{byte:02x}").expect("write! to String cannot fail");
    }
    out
}

/// Streams `reader` through digest `D` and returns the raw digest.
pub fn hash_reader<D: ChecksumDigest, R: Read>(mut reader: R) -> io::Result<D::Digest> {
    let mut hasher = D::new();
    let mut buf = [0u8; HASH_BUF_LEN];
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finalize())
}

/// Digests the file at `path` and returns the lowercase hex rendering.
///
/// Symbolic links are followed; the digest covers the link target's bytes.
pub fn hash_file_hex<D: ChecksumDigest>(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    let digest = hash_reader::<D, _>(file)?;
    Ok(to_hex(digest.as_ref()))
}
