//! Preallocated destination file paired with its sidecar.

use std::cmp;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use barge_proto::{CHUNK_SIZE, FILE_HASH_SIZE};
use tracing::warn;

use crate::error::FileError;
use crate::hasher;
use crate::meta::MetaStore;
use crate::Chunk;

/// A file being reassembled from chunks.
///
/// The sink owns the destination's sidecar; every accepted chunk is
/// written at its offset and then marked, in that order, so an
/// interrupted transfer never claims a chunk it does not hold.
#[derive(Debug)]
pub struct FileSink {
    dest: PathBuf,
    size: u64,
    hash: [u8; FILE_HASH_SIZE],
    meta: MetaStore,
}

impl FileSink {
    /// Set up the destination for an offered file: parent directories,
    /// sidecar, and the destination itself preallocated to its logical
    /// length by writing a single zero byte at `size - 1` (sparse where
    /// the filesystem supports it). All three steps are idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if directories, sidecar or destination cannot be
    /// created.
    pub fn create(
        dest: impl Into<PathBuf>,
        hash: [u8; FILE_HASH_SIZE],
        size: u64,
    ) -> Result<Self, FileError> {
        let dest = dest.into();
        let meta = MetaStore::new(&dest, size, CHUNK_SIZE as u64, hash);

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        meta.create_if_missing()?;

        if !dest.exists() {
            let mut file = File::create(&dest)?;
            if size > 0 {
                file.seek(SeekFrom::Start(size - 1))?;
                file.write_all(&[0])?;
            }
        }

        Ok(Self {
            dest,
            size,
            hash,
            meta,
        })
    }

    /// Reopen a sink for a transfer already on disk, recovering size and
    /// digest from the sidecar header. `None` if no transfer was ever
    /// started for `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sidecar exists but cannot be read.
    pub fn open(dest: impl Into<PathBuf>) -> Result<Option<Self>, FileError> {
        let dest = dest.into();
        match MetaStore::read_header(&dest)? {
            Some(header) if header.chunk_size > 0 => {
                let meta = MetaStore::new(&dest, header.file_size, header.chunk_size, header.file_hash);
                Ok(Some(Self {
                    dest,
                    size: header.file_size,
                    hash: header.file_hash,
                    meta,
                }))
            }
            _ => Ok(None),
        }
    }

    /// Destination path.
    #[must_use]
    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Number of chunks the destination splits into.
    #[must_use]
    pub fn n_chunks(&self) -> u64 {
        self.meta.n_chunks()
    }

    /// Write one chunk at its offset and mark it received.
    ///
    /// A chunk that is out of range, has the wrong length, or whose
    /// digest does not match its payload is logged and dropped without
    /// marking, so the protocol will request it again.
    ///
    /// # Errors
    ///
    /// Returns an error only for I/O failures on a chunk that passed
    /// validation.
    pub fn save_chunk(&self, chunk: &Chunk) -> Result<(), FileError> {
        let chunk_size = self.meta.chunk_size();
        if chunk.idx >= self.meta.n_chunks() {
            warn!(
                "dropping chunk {} of {}: index outside file range",
                chunk.idx,
                self.dest.display()
            );
            return Ok(());
        }

        let offset = chunk.idx * chunk_size;
        let expected = cmp::min(chunk_size, self.size - offset) as usize;
        if chunk.data.len() != expected {
            warn!(
                "dropping chunk {} of {}: {} bytes where {expected} expected",
                chunk.idx,
                self.dest.display(),
                chunk.data.len()
            );
            return Ok(());
        }

        if hasher::chunk_digest(&chunk.data) != chunk.hash {
            warn!(
                "dropping chunk {} of {}: digest mismatch",
                chunk.idx,
                self.dest.display()
            );
            return Ok(());
        }

        let mut file = OpenOptions::new().write(true).open(&self.dest)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&chunk.data)?;
        drop(file);

        self.meta.mark_chunk(chunk.idx, true)?;
        Ok(())
    }

    /// First chunk still missing, `None` when the bitmap is full.
    ///
    /// # Errors
    ///
    /// Returns an error if the sidecar cannot be read.
    pub fn next_missing_chunk(&self) -> Result<Option<u64>, FileError> {
        Ok(self.meta.next_missing_chunk(0)?)
    }

    /// Two-stage completion check: the bitmap must be full before the
    /// destination is re-hashed, because the digest pass over a large
    /// file is expensive; completion then requires bitwise digest
    /// equality.
    ///
    /// # Errors
    ///
    /// Returns an error if the sidecar or the destination cannot be read.
    pub fn is_complete(&self) -> Result<bool, FileError> {
        if !self.dest.exists() {
            return Ok(false);
        }
        if self.meta.next_missing_chunk(0)?.is_some() {
            return Ok(false);
        }
        Ok(hasher::file_digest(&self.dest)? == self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FileSource;
    use tempfile::TempDir;

    fn source_file(dir: &TempDir, name: &str, data: &[u8]) -> FileSource {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(data).unwrap();
        drop(file);
        FileSource::open(&path).unwrap()
    }

    fn sink_for(dir: &TempDir, source: &FileSource) -> FileSink {
        let dest = dir.path().join("in").join(source.file_name());
        FileSink::create(dest, *source.hash(), source.size()).unwrap()
    }

    #[test]
    fn create_preallocates_logical_length() {
        let dir = TempDir::new().unwrap();
        let source = source_file(&dir, "data.bin", &[0x33u8; 10_000]);
        let sink = sink_for(&dir, &source);

        assert_eq!(fs::metadata(sink.dest()).unwrap().len(), 10_000);
        assert!(MetaStore::sidecar_path(sink.dest()).exists());
        assert!(!sink.is_complete().unwrap());
    }

    #[test]
    fn transfer_all_chunks_and_verify() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
        let source = source_file(&dir, "data.bin", &data);
        let sink = sink_for(&dir, &source);

        for idx in 0..source.n_chunks() {
            assert_eq!(sink.next_missing_chunk().unwrap(), Some(idx));
            sink.save_chunk(&source.chunk(idx).unwrap()).unwrap();
        }

        assert_eq!(sink.next_missing_chunk().unwrap(), None);
        assert!(sink.is_complete().unwrap());
        assert_eq!(fs::read(sink.dest()).unwrap(), data);
    }

    #[test]
    fn out_of_order_chunks_are_fine() {
        let dir = TempDir::new().unwrap();
        let data = vec![0x9Au8; 10_000];
        let source = source_file(&dir, "data.bin", &data);
        let sink = sink_for(&dir, &source);

        for idx in [2, 0, 1] {
            sink.save_chunk(&source.chunk(idx).unwrap()).unwrap();
        }
        assert!(sink.is_complete().unwrap());
    }

    #[test]
    fn wrong_length_chunk_is_dropped() {
        let dir = TempDir::new().unwrap();
        let source = source_file(&dir, "data.bin", &[0u8; 10_000]);
        let sink = sink_for(&dir, &source);

        let mut chunk = source.chunk(0).unwrap();
        chunk.data.truncate(100);
        chunk.hash = hasher::chunk_digest(&chunk.data);
        sink.save_chunk(&chunk).unwrap();

        assert_eq!(sink.next_missing_chunk().unwrap(), Some(0));
    }

    #[test]
    fn out_of_range_chunk_is_dropped() {
        let dir = TempDir::new().unwrap();
        let source = source_file(&dir, "data.bin", &[0u8; 100]);
        let sink = sink_for(&dir, &source);

        let mut chunk = source.chunk(0).unwrap();
        chunk.idx = 7;
        sink.save_chunk(&chunk).unwrap();

        assert_eq!(sink.next_missing_chunk().unwrap(), Some(0));
    }

    #[test]
    fn corrupted_chunk_is_dropped_and_rerequested() {
        let dir = TempDir::new().unwrap();
        let source = source_file(&dir, "data.bin", &[0x55u8; 100]);
        let sink = sink_for(&dir, &source);

        let mut chunk = source.chunk(0).unwrap();
        chunk.data[0] ^= 0xFF; // payload no longer matches the carried digest
        sink.save_chunk(&chunk).unwrap();
        assert_eq!(sink.next_missing_chunk().unwrap(), Some(0));

        sink.save_chunk(&source.chunk(0).unwrap()).unwrap();
        assert!(sink.is_complete().unwrap());
    }

    #[test]
    fn full_bitmap_with_wrong_content_is_not_complete() {
        let dir = TempDir::new().unwrap();
        let data = vec![0x44u8; 10_000];
        let source = source_file(&dir, "data.bin", &data);
        let sink = sink_for(&dir, &source);

        for idx in 0..source.n_chunks() {
            sink.save_chunk(&source.chunk(idx).unwrap()).unwrap();
        }

        // Corrupt one byte behind the sink's back: the bitmap still says
        // complete, the digest pass must not.
        let mut on_disk = fs::read(sink.dest()).unwrap();
        on_disk[5_000] ^= 0xFF;
        fs::write(sink.dest(), &on_disk).unwrap();

        assert_eq!(sink.next_missing_chunk().unwrap(), None);
        assert!(!sink.is_complete().unwrap());
    }

    #[test]
    fn empty_file_is_complete_immediately() {
        let dir = TempDir::new().unwrap();
        let source = source_file(&dir, "empty.bin", &[]);
        let sink = sink_for(&dir, &source);

        assert_eq!(fs::metadata(sink.dest()).unwrap().len(), 0);
        assert_eq!(sink.next_missing_chunk().unwrap(), None);
        assert!(sink.is_complete().unwrap());
    }

    #[test]
    fn reopen_recovers_header_and_progress() {
        let dir = TempDir::new().unwrap();
        let data = vec![0x21u8; 10_000];
        let source = source_file(&dir, "data.bin", &data);
        let dest = {
            let sink = sink_for(&dir, &source);
            sink.save_chunk(&source.chunk(0).unwrap()).unwrap();
            sink.dest().to_path_buf()
        };

        let sink = FileSink::open(&dest).unwrap().unwrap();
        assert_eq!(sink.n_chunks(), 3);
        assert_eq!(sink.next_missing_chunk().unwrap(), Some(1));

        sink.save_chunk(&source.chunk(1).unwrap()).unwrap();
        sink.save_chunk(&source.chunk(2).unwrap()).unwrap();
        assert!(sink.is_complete().unwrap());
    }

    #[test]
    fn open_without_sidecar_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(FileSink::open(dir.path().join("never.bin")).unwrap().is_none());
    }

    #[test]
    fn recreate_preserves_progress() {
        let dir = TempDir::new().unwrap();
        let data = vec![0x66u8; 10_000];
        let source = source_file(&dir, "data.bin", &data);

        let sink = sink_for(&dir, &source);
        sink.save_chunk(&source.chunk(0).unwrap()).unwrap();

        // A second offer for the same file must resume, not restart.
        let again = sink_for(&dir, &source);
        assert_eq!(again.next_missing_chunk().unwrap(), Some(1));
    }
}
