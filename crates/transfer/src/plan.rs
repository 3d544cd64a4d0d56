use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// One contiguous byte range of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// 0-based position; also the position of its presigned URL.
    pub index: u32,
    pub offset: u64,
    pub len: u64,
}

impl Chunk {
    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// Partitions `size` bytes into ordered chunks of `chunk_size` bytes.
///
/// The last chunk carries the remainder. If `chunk_size` is 0,
/// [`DEFAULT_CHUNK_SIZE`] is used. A zero-length source yields
/// [`TransferError::EmptySource`].
pub fn plan_chunks(size: u64, chunk_size: u64) -> Result<Vec<Chunk>, TransferError> {
    if size == 0 {
        return Err(TransferError::EmptySource);
    }
    let chunk_size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };

    let count = size.div_ceil(chunk_size);
    let chunks = (0..count)
        .map(|i| {
            let offset = i * chunk_size;
            Chunk {
                index: i as u32,
                offset,
                len: chunk_size.min(size - offset),
            }
        })
        .collect();
    Ok(chunks)
}
