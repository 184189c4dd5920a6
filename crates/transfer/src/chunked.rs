//! Local file access for transfers: positional chunk reads, offset
//! writes, and SHA-256 fingerprints.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::types::Chunk;

/// Hex-encoded SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hex-encoded SHA-256 of the file at `path`, streamed.
///
/// Blocking; run it on the blocking pool for large recordings.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Source file opened for upload. Size is fixed at open time.
pub struct ChunkReader {
    file: File,
    size: u64,
    chunk_size: u64,
}

impl ChunkReader {
    pub fn open(path: &Path, chunk_size: u64) -> io::Result<Self> {
        if chunk_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "chunk size must be positive",
            ));
        }
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file,
            size,
            chunk_size,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Reads up to one chunk starting at `offset`.
    ///
    /// Reading at the end of the file yields an empty chunk. A file that
    /// shrank since it was opened fails with `UnexpectedEof`.
    pub fn read_at(&mut self, offset: u64) -> io::Result<Chunk> {
        if offset > self.size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("offset {offset} beyond end of {}-byte source", self.size),
            ));
        }
        let len = (self.size - offset).min(self.chunk_size) as usize;
        let mut data = vec![0u8; len];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut data)?;
        Ok(Chunk { offset, data })
    }
}

/// Download target. Chunks land at their own offsets.
pub struct ChunkWriter {
    path: PathBuf,
    file: File,
}

impl ChunkWriter {
    /// Creates or truncates `path`, along with missing parent directories.
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn write_chunk(&mut self, chunk: &Chunk) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(chunk.offset))?;
        self.file.write_all(&chunk.data)
    }

    /// Syncs to disk and hands back the path.
    pub fn finish(self) -> io::Result<PathBuf> {
        self.file.sync_all()?;
        Ok(self.path)
    }
}
