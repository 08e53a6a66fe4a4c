//! Read-only chunk source for a file being uploaded.

use std::cmp;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use barge_proto::{CHUNK_SIZE, FILE_HASH_SIZE};

use crate::error::FileError;
use crate::hasher;
use crate::Chunk;

/// A local file offered for upload.
///
/// Opening a source streams the whole file through the hasher once;
/// that is the expensive part and happens exactly once per offer.
/// Chunks are read on demand afterwards, each paired with its own
/// digest.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    file_name: String,
    size: u64,
    hash: [u8; FILE_HASH_SIZE],
}

impl FileSource {
    /// Open a file and compute its whole-file digest.
    ///
    /// # Errors
    ///
    /// Returns `NotRegular` for anything that is not a plain file,
    /// `TooLarge` for files whose size does not fit the offer's 32-bit
    /// field, and I/O errors from reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FileError> {
        let path = path.as_ref();
        let metadata = fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(FileError::NotRegular(path.to_path_buf()));
        }
        if metadata.len() > u64::from(u32::MAX) {
            return Err(FileError::TooLarge(metadata.len()));
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let hash = hasher::file_digest(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file_name,
            size: metadata.len(),
            hash,
        })
    }

    /// Base name used on the wire.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// File size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whole-file digest.
    #[must_use]
    pub fn hash(&self) -> &[u8; FILE_HASH_SIZE] {
        &self.hash
    }

    /// Number of chunks the file splits into; a zero-byte file has none.
    #[must_use]
    pub fn n_chunks(&self) -> u64 {
        self.size.div_ceil(CHUNK_SIZE as u64)
    }

    /// Read chunk `idx` and compute its digest.
    ///
    /// # Errors
    ///
    /// Returns `ChunkOutOfRange` past the end of the file, or an I/O
    /// error from the read.
    pub fn chunk(&self, idx: u64) -> Result<Chunk, FileError> {
        let n_chunks = self.n_chunks();
        if idx >= n_chunks {
            return Err(FileError::ChunkOutOfRange { idx, n_chunks });
        }

        let offset = idx * CHUNK_SIZE as u64;
        let len = cmp::min(CHUNK_SIZE as u64, self.size - offset) as usize;

        let mut data = vec![0u8; len];
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut data)?;

        let hash = hasher::chunk_digest(&data);
        Ok(Chunk { idx, data, hash })
    }
}
