use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::TransferError;
use crate::plan::Chunk;

/// Reads planned chunks out of a source file.
pub struct ChunkReader {
    file: File,
    path: PathBuf,
    file_size: u64,
}

impl ChunkReader {
    /// Opens `path` for ranged reads.
    pub async fn open(path: &Path) -> Result<Self, TransferError> {
        let file = File::open(path).await?;
        let file_size = file.metadata().await?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            file_size,
        })
    }

    /// Reads the bytes of `chunk`.
    pub async fn read_chunk(&mut self, chunk: &Chunk) -> Result<Bytes, TransferError> {
        self.read_at(chunk.offset, chunk.len).await
    }

    /// Reads `len` bytes starting at `offset`.
    pub async fn read_at(&mut self, offset: u64, len: u64) -> Result<Bytes, TransferError> {
        let end = offset + len;
        if end > self.file_size {
            return Err(TransferError::RangeOutOfBounds {
                offset,
                end,
                size: self.file_size,
            });
        }

        self.file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len as usize];
        self.file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }
}

/// Opens `path` and reads a single byte range.
pub async fn read_range(path: &Path, offset: u64, len: u64) -> Result<Bytes, TransferError> {
    ChunkReader::open(path).await?.read_at(offset, len).await
}
