//! On-disk transfer-state sidecar.
//!
//! Every destination file `<name>` is paired with a sidecar
//! `.<name>.meta` holding the transfer header and one bit per chunk.
//! Layout, byte-exact:
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0      | 8    | file size, big-endian |
//! | 8      | 8    | chunk size, big-endian |
//! | 16     | 64   | whole-file digest |
//! | 80     | ⌈n/8⌉| bitmap, MSB-first (bit 7 of byte i is chunk 8i) |
//!
//! The sidecar is reopened for every operation and never cached or
//! mapped; the disk is the only source of truth, and a crash can only
//! ever lose the single byte being rewritten.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use barge_proto::FILE_HASH_SIZE;

/// Sidecar header length in bytes.
pub const HEADER_SIZE: u64 = 8 + 8 + FILE_HASH_SIZE as u64;

/// Parsed sidecar header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaHeader {
    /// Size of the destination file in bytes
    pub file_size: u64,
    /// Chunk size the transfer was started with
    pub chunk_size: u64,
    /// Whole-file digest the transfer must verify against
    pub file_hash: [u8; FILE_HASH_SIZE],
}

/// Handle on one destination file's sidecar.
#[derive(Debug)]
pub struct MetaStore {
    meta_path: PathBuf,
    file_size: u64,
    chunk_size: u64,
    file_hash: [u8; FILE_HASH_SIZE],
    n_chunks: u64,
    bitmap_size: u64,
}

impl MetaStore {
    /// Describe the sidecar for `dest`. Nothing touches the disk until
    /// [`MetaStore::create_if_missing`].
    #[must_use]
    pub fn new(dest: &Path, file_size: u64, chunk_size: u64, file_hash: [u8; FILE_HASH_SIZE]) -> Self {
        let n_chunks = file_size.div_ceil(chunk_size);
        Self {
            meta_path: Self::sidecar_path(dest),
            file_size,
            chunk_size,
            file_hash,
            n_chunks,
            bitmap_size: n_chunks.div_ceil(8),
        }
    }

    /// Sidecar path for a destination file: `.<name>.meta` next to it.
    #[must_use]
    pub fn sidecar_path(dest: &Path) -> PathBuf {
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        dest.with_file_name(format!(".{name}.meta"))
    }

    /// Number of chunks tracked by the bitmap.
    #[must_use]
    pub fn n_chunks(&self) -> u64 {
        self.n_chunks
    }

    /// Chunk size recorded in the header.
    #[must_use]
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Write the header and a zeroed bitmap unless the sidecar already
    /// exists. An existing sidecar is never truncated, which is what
    /// makes a re-offer resume instead of restart.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory or the sidecar cannot be
    /// created or written.
    pub fn create_if_missing(&self) -> io::Result<()> {
        if let Some(parent) = self.meta_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.meta_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(()),
            Err(e) => return Err(e),
        };

        let mut buf = Vec::with_capacity((HEADER_SIZE + self.bitmap_size) as usize);
        buf.extend_from_slice(&self.file_size.to_be_bytes());
        buf.extend_from_slice(&self.chunk_size.to_be_bytes());
        buf.extend_from_slice(&self.file_hash);
        buf.resize(buf.len() + self.bitmap_size as usize, 0);
        file.write_all(&buf)
    }

    /// Set or clear the bit for chunk `idx`.
    ///
    /// The single-byte read-modify-write is the atomic unit: a crash
    /// between the read and the write leaves the prior state on disk.
    ///
    /// # Errors
    ///
    /// Returns an error for an index beyond the bitmap or on I/O failure.
    pub fn mark_chunk(&self, idx: u64, present: bool) -> io::Result<()> {
        if idx >= self.n_chunks {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("chunk {idx} beyond bitmap of {} chunks", self.n_chunks),
            ));
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.meta_path)?;
        let pos = HEADER_SIZE + idx / 8;
        file.seek(SeekFrom::Start(pos))?;
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte)?;

        let bit = 1u8 << (7 - (idx % 8));
        if present {
            byte[0] |= bit;
        } else {
            byte[0] &= !bit;
        }

        file.seek(SeekFrom::Start(pos))?;
        file.write_all(&byte)
    }

    /// First unmarked chunk at or around `from`: the scan starts at the
    /// bitmap byte containing `from`, skips bytes that read 0xFF, then
    /// picks the first zero bit MSB-first. `None` once every chunk in
    /// `[0, n_chunks)` is marked.
    ///
    /// # Errors
    ///
    /// Returns an error if the sidecar cannot be opened or read.
    pub fn next_missing_chunk(&self, from: u64) -> io::Result<Option<u64>> {
        if from >= self.n_chunks {
            return Ok(None);
        }
        let mut file = File::open(&self.meta_path)?;
        let mut byte_idx = from / 8;
        file.seek(SeekFrom::Start(HEADER_SIZE + byte_idx))?;

        let mut byte = [0xFFu8; 1];
        while byte_idx < self.bitmap_size {
            file.read_exact(&mut byte)?;
            if byte[0] != 0xFF {
                break;
            }
            byte_idx += 1;
        }
        if byte[0] == 0xFF {
            return Ok(None);
        }

        let chunk = byte_idx * 8 + u64::from(byte[0].leading_ones());
        // Trailing bits of the last bitmap byte pad past the chunk count.
        Ok((chunk < self.n_chunks).then_some(chunk))
    }

    /// Load the header of an existing sidecar without building a full
    /// store; `None` if the sidecar does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error for any failure other than the sidecar being
    /// absent.
    pub fn read_header(dest: &Path) -> io::Result<Option<MetaHeader>> {
        let mut file = match File::open(Self::sidecar_path(dest)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut buf = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut buf)?;

        let file_size = u64::from_be_bytes(buf[0..8].try_into().unwrap());
        let chunk_size = u64::from_be_bytes(buf[8..16].try_into().unwrap());
        let mut file_hash = [0u8; FILE_HASH_SIZE];
        file_hash.copy_from_slice(&buf[16..]);

        Ok(Some(MetaHeader {
            file_size,
            chunk_size,
            file_hash,
        }))
    }
}
