//! BLAKE3 digests for whole files and single chunks.
//!
//! The whole-file digest is the 64-byte extended output, the chunk
//! digest the standard 32-byte output, so both come from one function
//! family.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use barge_proto::{CHUNK_HASH_SIZE, FILE_HASH_SIZE};

/// Stateful digester producing the 64-byte whole-file output.
#[derive(Debug, Default)]
pub struct FileDigest {
    inner: blake3::Hasher,
}

impl FileDigest {
    /// Create a fresh digester.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb more input.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Produce the 64-byte digest.
    #[must_use]
    pub fn finalize(&self) -> [u8; FILE_HASH_SIZE] {
        let mut out = [0u8; FILE_HASH_SIZE];
        self.inner.finalize_xof().fill(&mut out);
        out
    }
}

/// Digest a whole file by streaming it through [`FileDigest`].
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn file_digest(path: &Path) -> io::Result<[u8; FILE_HASH_SIZE]> {
    let mut file = File::open(path)?;
    let mut digest = FileDigest::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n]);
    }
    Ok(digest.finalize())
}

/// Digest a single chunk.
#[must_use]
pub fn chunk_digest(data: &[u8]) -> [u8; CHUNK_HASH_SIZE] {
    *blake3::hash(data).as_bytes()
}
