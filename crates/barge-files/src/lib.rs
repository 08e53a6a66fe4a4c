//! # Barge Files
//!
//! File-side engine for the barge transfer system.
//!
//! This crate provides:
//! - BLAKE3 digests for whole files and single chunks
//! - The on-disk sidecar tracking which chunks of a file have arrived
//! - A read-only chunk source for files being uploaded
//! - A preallocated sink reassembling files as chunks come in

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod hasher;
pub mod meta;
pub mod sink;
pub mod source;

pub use error::FileError;
pub use meta::{MetaHeader, MetaStore};
pub use sink::FileSink;
pub use source::FileSource;

use barge_proto::CHUNK_HASH_SIZE;

/// One chunk of file data in transit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based chunk index
    pub idx: u64,
    /// Chunk bytes; every chunk is full-size except possibly the last
    pub data: Vec<u8>,
    /// Digest of `data`
    pub hash: [u8; CHUNK_HASH_SIZE],
}
