#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `fsmirror_verify` decides whether the destination tree faithfully mirrors
//! the source. It compares individual file pairs under a configurable
//! [`VerifyMethod`] and diffs whole trees, reporting files that differ, are
//! missing from the destination, or exist only in the destination.
//!
//! # Design
//!
//! [`Verifier::verify_file`] always short-circuits cheap checks first:
//! existence, then size, then the requested method. Hash-based methods reuse
//! digests through an internal cache keyed by path and algorithm; an entry is
//! only trusted while both the file size and the modification time are
//! unchanged. [`Verifier::verify_directory`] enumerates regular files in both
//! directions and fans the surviving pairs out over a fixed set of threads
//! with round-robin shard assignment.

mod verifier;

pub use verifier::{VerifyMethod, VerifyResult, Verifier};
