//! # Barge Protocol
//!
//! Wire protocol for the barge chunked file-transfer system.
//!
//! This crate provides:
//! - The message model for the four protocol frames
//! - Envelope-framed encoding and decoding (big-endian on the wire)
//! - Error types and handling
//!
//! A frame is a 6-byte envelope (3-byte magic, 1-byte type tag, 2-byte
//! payload length) followed by the payload. The magic-plus-tag prefix
//! doubles as a type-discriminated magic number, which is what lets a
//! corrupted stream resynchronize on the next frame boundary.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod message;

pub use error::CodecError;
pub use message::{Body, Message, TypeTag};

/// Magic bytes tagging the start of every frame.
pub const MAGIC: [u8; 3] = [0x87, 0xFE, 0x77];

/// Envelope size: magic, type tag, big-endian payload length.
pub const ENVELOPE_SIZE: usize = 6;

/// One past the highest assigned type tag; valid tags form the open
/// interval `(0x00, MAX_TYPE_TAG)`.
pub const MAX_TYPE_TAG: u8 = 0x05;

/// Frames are sized to fit a single 4 KiB datagram should the transport
/// ever move off a byte stream.
pub const MAX_FRAME_SIZE: usize = 4096;

/// Chunk payload size: 128 bytes of the frame budget are reserved for
/// the protocol head, the rest carries file data.
pub const CHUNK_SIZE: usize = MAX_FRAME_SIZE - 128;

/// Whole-file digest length in bytes.
pub const FILE_HASH_SIZE: usize = 64;

/// Per-chunk digest length in bytes.
pub const CHUNK_HASH_SIZE: usize = 32;

/// Sentinel for the unused `last_idx` of a chunk request.
pub const CHUNK_REQ_LAST_UNSPECIFIED: u32 = 0xFFFF;
