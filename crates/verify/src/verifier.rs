//! File pair and tree verification.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use fsmirror_checksums::{hash_file_hex, Md5, Sha256};
use fsmirror_fsops::compare_file_contents;
use fsmirror_walk::Walker;

/// Permitted timestamp drift between a source and its mirror copy.
const TIMESTAMP_TOLERANCE: Duration = Duration::from_secs(1);

/// Strategy used when comparing a file pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMethod {
    /// Compare file sizes only.
    SizeOnly,
    /// Compare modification times within a one second tolerance.
    Timestamp,
    /// Compare MD5 digests; fast, adequate against accidental corruption.
    FastHash,
    /// Compare SHA-256 digests.
    SecureHash,
    /// Compare every byte.
    FullCompare,
}

impl Default for VerifyMethod {
    fn default() -> Self {
        Self::FastHash
    }
}

/// Outcome of one file pair comparison.
///
/// `matches == true` implies `error` is empty. The hash fields are populated
/// whenever a hash-based method computed them, match or mismatch.
#[derive(Debug, Clone)]
pub struct VerifyResult {
    /// Whether the pair was judged identical under the chosen method.
    pub matches: bool,
    /// Digest of the source, when a hash method ran.
    pub source_hash: String,
    /// Digest of the destination, when a hash method ran.
    pub dest_hash: String,
    /// Reason for the mismatch, empty on success.
    pub error: String,
    /// Wall-clock time from call to return.
    pub duration: Duration,
}

impl VerifyResult {
    fn pending() -> Self {
        Self {
            matches: false,
            source_hash: String::new(),
            dest_hash: String::new(),
            error: String::new(),
            duration: Duration::ZERO,
        }
    }

    fn mismatch(error: &str) -> Self {
        Self {
            error: error.to_string(),
            ..Self::pending()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum HashAlgorithm {
    Md5,
    Sha256,
}

struct CacheEntry {
    hash: String,
    size: u64,
    mtime: SystemTime,
}

/// Compares file pairs and diffs whole trees.
///
/// The verifier is stateless apart from its digest cache and is safe to share
/// across worker threads.
#[derive(Default)]
pub struct Verifier {
    cache: Mutex<HashMap<(PathBuf, HashAlgorithm), CacheEntry>>,
}

impl Verifier {
    /// Creates a verifier with an empty digest cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached digests.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.lock().expect("verifier cache lock poisoned").len()
    }

    /// Discards every cached digest.
    pub fn clear_cache(&self) {
        self.cache
            .lock()
            .expect("verifier cache lock poisoned")
            .clear();
    }

    fn file_hash(&self, path: &Path, algorithm: HashAlgorithm) -> io::Result<String> {
        let meta = fs::metadata(path)?;
        let size = meta.len();
        let mtime = meta.modified()?;

        let key = (path.to_path_buf(), algorithm);
        {
            let cache = self.cache.lock().expect("verifier cache lock poisoned");
            if let Some(entry) = cache.get(&key) {
                if entry.size == size && entry.mtime == mtime {
                    return Ok(entry.hash.clone());
                }
            }
        }

        let hash = match algorithm {
            HashAlgorithm::Md5 => hash_file_hex::<Md5>(path)?,
            HashAlgorithm::Sha256 => hash_file_hex::<Sha256>(path)?,
        };
        self.cache
            .lock()
            .expect("verifier cache lock poisoned")
            .insert(
                key,
                CacheEntry {
                    hash: hash.clone(),
                    size,
                    mtime,
                },
            );
        Ok(hash)
    }

    /// Compares `source` against `destination` under `method`.
    pub fn verify_file(
        &self,
        source: &Path,
        destination: &Path,
        method: VerifyMethod,
    ) -> VerifyResult {
        let started = Instant::now();
        let mut result = self.verify_file_inner(source, destination, method);
        result.duration = started.elapsed();
        result
    }

    fn verify_file_inner(
        &self,
        source: &Path,
        destination: &Path,
        method: VerifyMethod,
    ) -> VerifyResult {
        if !source.exists() {
            return VerifyResult::mismatch("Source file does not exist");
        }
        if !destination.exists() {
            return VerifyResult::mismatch("Destination file does not exist");
        }

        let source_meta = match fs::metadata(source) {
            Ok(meta) => meta,
            Err(err) => return VerifyResult::mismatch(&err.to_string()),
        };
        let dest_meta = match fs::metadata(destination) {
            Ok(meta) => meta,
            Err(err) => return VerifyResult::mismatch(&err.to_string()),
        };

        if source_meta.len() != dest_meta.len() {
            return VerifyResult::mismatch("File sizes don't match");
        }

        let mut result = VerifyResult::pending();
        match method {
            VerifyMethod::SizeOnly => {
                result.matches = true;
            }
            VerifyMethod::Timestamp => match (source_meta.modified(), dest_meta.modified()) {
                (Ok(source_mtime), Ok(dest_mtime)) => {
                    let drift = source_mtime
                        .duration_since(dest_mtime)
                        .unwrap_or_else(|earlier| earlier.duration());
                    if drift <= TIMESTAMP_TOLERANCE {
                        result.matches = true;
                    } else {
                        result.error = "Timestamps don't match within threshold".to_string();
                    }
                }
                (Err(err), _) | (_, Err(err)) => {
                    result.error = err.to_string();
                }
            },
            VerifyMethod::FastHash => {
                self.hash_pair(source, destination, HashAlgorithm::Md5, &mut result);
                if !result.matches && result.error.is_empty() {
                    result.error = "MD5 checksums don't match".to_string();
                }
            }
            VerifyMethod::SecureHash => {
                self.hash_pair(source, destination, HashAlgorithm::Sha256, &mut result);
                if !result.matches && result.error.is_empty() {
                    result.error = "SHA-256 checksums don't match".to_string();
                }
            }
            VerifyMethod::FullCompare => match compare_file_contents(source, destination) {
                Ok(true) => result.matches = true,
                Ok(false) => result.error = "File contents don't match".to_string(),
                Err(err) => result.error = err.to_string(),
            },
        }
        result
    }

    fn hash_pair(
        &self,
        source: &Path,
        destination: &Path,
        algorithm: HashAlgorithm,
        result: &mut VerifyResult,
    ) {
        let source_hash = match self.file_hash(source, algorithm) {
            Ok(hash) => hash,
            Err(err) => {
                result.error = err.to_string();
                return;
            }
        };
        let dest_hash = match self.file_hash(destination, algorithm) {
            Ok(hash) => hash,
            Err(err) => {
                result.error = err.to_string();
                return;
            }
        };
        result.matches = source_hash == dest_hash;
        result.source_hash = source_hash;
        result.dest_hash = dest_hash;
    }

    /// Diffs the regular files under `source_dir` against `dest_dir`.
    ///
    /// The result pairs each source-relative path with its verdict: files
    /// absent from the destination report "File missing in destination",
    /// files present only in the destination report "Extra file in
    /// destination", and surviving pairs are compared under `method`. With
    /// `parallel` set and more than one pair, `min(max_threads, pairs)`
    /// threads each take every n-th pair. The result order is unspecified.
    pub fn verify_directory(
        &self,
        source_dir: &Path,
        dest_dir: &Path,
        method: VerifyMethod,
        parallel: bool,
        max_threads: usize,
    ) -> Vec<(PathBuf, VerifyResult)> {
        if !source_dir.is_dir() {
            return vec![(
                PathBuf::new(),
                VerifyResult::mismatch("Source directory does not exist or is not a directory"),
            )];
        }
        if !dest_dir.is_dir() {
            return vec![(
                PathBuf::new(),
                VerifyResult::mismatch(
                    "Destination directory does not exist or is not a directory",
                ),
            )];
        }

        let mut results = Vec::new();
        let mut pairs: Vec<(PathBuf, PathBuf, PathBuf)> = Vec::new();

        match Walker::regular_files(source_dir) {
            Ok(relative_paths) => {
                for rel in relative_paths {
                    let dest_path = dest_dir.join(&rel);
                    if dest_path.is_file() {
                        let source_path = source_dir.join(&rel);
                        pairs.push((rel, source_path, dest_path));
                    } else {
                        results.push((rel, VerifyResult::mismatch("File missing in destination")));
                    }
                }
            }
            Err(err) => results.push((PathBuf::new(), VerifyResult::mismatch(&err.to_string()))),
        }

        match Walker::regular_files(dest_dir) {
            Ok(relative_paths) => {
                for rel in relative_paths {
                    if !source_dir.join(&rel).is_file() {
                        results.push((rel, VerifyResult::mismatch("Extra file in destination")));
                    }
                }
            }
            Err(err) => results.push((PathBuf::new(), VerifyResult::mismatch(&err.to_string()))),
        }

        if parallel && pairs.len() > 1 {
            let workers = max_threads.max(1).min(pairs.len());
            let shared = Mutex::new(Vec::with_capacity(pairs.len()));
            let pairs_ref = &pairs;
            let shared_ref = &shared;
            thread::scope(|scope| {
                for worker in 0..workers {
                    scope.spawn(move || {
                        let mut index = worker;
                        while index < pairs_ref.len() {
                            let (rel, source_path, dest_path) = &pairs_ref[index];
                            let verdict = self.verify_file(source_path, dest_path, method);
                            shared_ref
                                .lock()
                                .expect("verify results lock poisoned")
                                .push((rel.clone(), verdict));
                            index += workers;
                        }
                    });
                }
            });
            results.extend(
                shared
                    .into_inner()
                    .expect("verify results lock poisoned"),
            );
        } else {
            for (rel, source_path, dest_path) in &pairs {
                results.push((rel.clone(), self.verify_file(source_path, dest_path, method)));
            }
        }

        results
    }
}
