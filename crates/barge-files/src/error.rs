//! Error types for file sources, sinks and the sidecar store.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// File-side errors.
#[derive(Debug, Error)]
pub enum FileError {
    /// Underlying filesystem failure
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Chunk index beyond the end of the file
    #[error("chunk index {idx} out of range ({n_chunks} chunks)")]
    ChunkOutOfRange {
        /// Index that was asked for
        idx: u64,
        /// Number of chunks the file actually has
        n_chunks: u64,
    },

    /// File cannot be offered: its size does not fit the wire format
    #[error("file too large to offer: {0} bytes")]
    TooLarge(u64),

    /// Path does not name a regular file
    #[error("not a regular file: {0}")]
    NotRegular(PathBuf),
}
