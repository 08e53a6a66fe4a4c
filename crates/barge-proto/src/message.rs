//! Message encoding and decoding for the barge wire protocol.
//!
//! Every payload starts with a common prefix (sequence number, peer id,
//! file name) followed by a type-specific trailer. All multi-byte
//! integers are big-endian (network byte order).

use uuid::Uuid;

use crate::error::CodecError;
use crate::{CHUNK_HASH_SIZE, CHUNK_SIZE, ENVELOPE_SIZE, FILE_HASH_SIZE, MAGIC};

/// Longest file name the one-byte length field can carry.
const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Frame types as carried in the envelope's tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeTag {
    /// A peer offers a file for transfer
    Offer = 0x01,
    /// The receiving side asks for one chunk
    ChunkRequest = 0x02,
    /// One chunk of file data plus its digest
    ChunkData = 0x03,
    /// The file is fully present and verified
    Complete = 0x04,
}

impl TryFrom<u8> for TypeTag {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Offer),
            0x02 => Ok(Self::ChunkRequest),
            0x03 => Ok(Self::ChunkData),
            0x04 => Ok(Self::Complete),
            _ => Err(CodecError::UnknownType(value)),
        }
    }
}

/// One protocol message: the common payload prefix plus the
/// type-specific body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Sequence number; replies echo it, chunk requests advance it
    pub seq: u16,
    /// Uploader identity scoping the transfer
    pub peer: Uuid,
    /// Base name of the file in transit (no path components)
    pub file_name: String,
    /// Type-specific trailer
    pub body: Body,
}

/// Type-specific trailers of the four frame kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Announce a file: size, chunk count and whole-file digest
    Offer {
        /// Total file size in bytes
        file_size: u32,
        /// Number of chunks the file splits into
        n_chunks: u32,
        /// 64-byte whole-file digest
        file_hash: [u8; FILE_HASH_SIZE],
    },
    /// Ask for a chunk by index
    ChunkRequest {
        /// Index being requested
        first_idx: u32,
        /// End of an advisory range; senders put the sentinel here
        last_idx: u32,
    },
    /// Deliver one chunk
    ChunkData {
        /// Chunk index
        idx: u32,
        /// Chunk bytes, `0 < len <= CHUNK_SIZE`
        data: Vec<u8>,
        /// 32-byte digest of `data`
        hash: [u8; CHUNK_HASH_SIZE],
    },
    /// Transfer finished and verified; no trailer
    Complete,
}

impl Message {
    /// Type tag of this message.
    #[must_use]
    pub fn tag(&self) -> TypeTag {
        match self.body {
            Body::Offer { .. } => TypeTag::Offer,
            Body::ChunkRequest { .. } => TypeTag::ChunkRequest,
            Body::ChunkData { .. } => TypeTag::ChunkData,
            Body::Complete => TypeTag::Complete,
        }
    }

    /// Serialize into one envelope-framed byte vector.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::NameLength` if the file name does not fit the
    /// one-byte length field, and `CodecError::ChunkLength` for chunk data
    /// that is empty or longer than [`CHUNK_SIZE`].
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        if self.file_name.len() > MAX_NAME_LEN {
            return Err(CodecError::NameLength(self.file_name.len()));
        }

        let mut payload = Vec::with_capacity(64);
        payload.extend_from_slice(&self.seq.to_be_bytes());
        payload.extend_from_slice(self.peer.as_bytes());
        payload.push(self.file_name.len() as u8);
        payload.extend_from_slice(self.file_name.as_bytes());

        match &self.body {
            Body::Offer {
                file_size,
                n_chunks,
                file_hash,
            } => {
                payload.extend_from_slice(&file_size.to_be_bytes());
                payload.extend_from_slice(&n_chunks.to_be_bytes());
                payload.extend_from_slice(file_hash);
            }
            Body::ChunkRequest {
                first_idx,
                last_idx,
            } => {
                payload.extend_from_slice(&first_idx.to_be_bytes());
                payload.extend_from_slice(&last_idx.to_be_bytes());
            }
            Body::ChunkData { idx, data, hash } => {
                if data.is_empty() || data.len() > CHUNK_SIZE {
                    return Err(CodecError::ChunkLength(data.len()));
                }
                payload.extend_from_slice(&idx.to_be_bytes());
                payload.extend_from_slice(&(data.len() as u16).to_be_bytes());
                payload.extend_from_slice(data);
                payload.extend_from_slice(hash);
            }
            Body::Complete => {}
        }

        let mut out = Vec::with_capacity(ENVELOPE_SIZE + payload.len());
        out.extend_from_slice(&MAGIC);
        out.push(self.tag() as u8);
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Parse one complete envelope-framed message, as produced by the
    /// stream accumulator.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::BadMagic` or `CodecError::UnknownType` for a
    /// malformed envelope, `CodecError::Truncated` when the buffer is
    /// shorter than its contents claim, and `CodecError::ChunkLength` for
    /// an out-of-range chunk payload.
    pub fn decode(frame: &[u8]) -> Result<Self, CodecError> {
        if frame.len() < ENVELOPE_SIZE {
            return Err(CodecError::Truncated {
                expected: ENVELOPE_SIZE,
                actual: frame.len(),
            });
        }
        if frame[..3] != MAGIC {
            return Err(CodecError::BadMagic);
        }
        let tag = TypeTag::try_from(frame[3])?;
        let payload_len = usize::from(u16::from_be_bytes([frame[4], frame[5]]));
        if frame.len() < ENVELOPE_SIZE + payload_len {
            return Err(CodecError::Truncated {
                expected: ENVELOPE_SIZE + payload_len,
                actual: frame.len(),
            });
        }

        let mut reader = Reader::new(&frame[ENVELOPE_SIZE..ENVELOPE_SIZE + payload_len]);
        let seq = reader.u16()?;
        let peer = Uuid::from_bytes(reader.array()?);
        let name_len = usize::from(reader.u8()?);
        let file_name = String::from_utf8_lossy(reader.bytes(name_len)?).into_owned();

        let body = match tag {
            TypeTag::Offer => Body::Offer {
                file_size: reader.u32()?,
                n_chunks: reader.u32()?,
                file_hash: reader.array()?,
            },
            TypeTag::ChunkRequest => Body::ChunkRequest {
                first_idx: reader.u32()?,
                last_idx: reader.u32()?,
            },
            TypeTag::ChunkData => {
                let idx = reader.u32()?;
                let len = usize::from(reader.u16()?);
                if len == 0 || len > CHUNK_SIZE {
                    return Err(CodecError::ChunkLength(len));
                }
                let data = reader.bytes(len)?.to_vec();
                let hash = reader.array()?;
                Body::ChunkData { idx, data, hash }
            }
            TypeTag::Complete => Body::Complete,
        };

        Ok(Self {
            seq,
            peer,
            file_name,
            body,
        })
    }
}

/// Bounds-checked cursor over a payload slice.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n).ok_or(CodecError::Truncated {
            expected: usize::MAX,
            actual: self.buf.len(),
        })?;
        if end > self.buf.len() {
            return Err(CodecError::Truncated {
                expected: end,
                actual: self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.take(n)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}
