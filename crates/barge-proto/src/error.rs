//! Error types for the barge wire protocol.

use thiserror::Error;

/// Codec-level errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Frame or payload shorter than its declared contents
    #[error("frame truncated: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum length the frame claimed
        expected: usize,
        /// Length actually available
        actual: usize,
    },

    /// Envelope does not start with the frame magic
    #[error("bad frame magic")]
    BadMagic,

    /// Type tag outside the assigned range
    #[error("unknown message type: 0x{0:02X}")]
    UnknownType(u8),

    /// Chunk payload empty or longer than the chunk size
    #[error("invalid chunk length: {0}")]
    ChunkLength(usize),

    /// File name longer than the one-byte length field allows
    #[error("file name too long: {0} bytes")]
    NameLength(usize),
}
