//! Content fingerprinting.
//!
//! A fingerprint is computed by reading a stream from its first byte to its
//! last. Uploads read the same stream a second time to send it to the backend,
//! so every input must be seekable; [`SeekableReader`] names that requirement.

use crate::errors::{UploadError, UploadResult};
use async_trait::async_trait;
use md5::Context;
use std::io::SeekFrom;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

const READ_BUF_SIZE: usize = 64 * 1024;

/// A stream that can be read from the start and rewound.
pub trait SeekableReader: AsyncRead + AsyncSeek + Unpin + Send {}

impl<T> SeekableReader for T where T: AsyncRead + AsyncSeek + Unpin + Send + ?Sized {}

/// Computes a stable fingerprint for a byte stream.
///
/// Implementations seek to offset 0 before reading and leave the stream at the
/// end of what they read. Callers that need the bytes again must rewind.
#[async_trait]
pub trait ContentHasher: Send + Sync {
    async fn hash(&self, reader: &mut dyn SeekableReader) -> UploadResult<String>;

    /// Length of every fingerprint this hasher produces.
    fn fingerprint_len(&self) -> usize;
}

/// MD5 fingerprints as 32 lowercase hex digits.
#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Hasher;

#[async_trait]
impl ContentHasher for Md5Hasher {
    async fn hash(&self, reader: &mut dyn SeekableReader) -> UploadResult<String> {
        reader
            .seek(SeekFrom::Start(0))
            .await
            .map_err(UploadError::Hash)?;

        let mut digest = Context::new();
        let mut buf = vec![0u8; READ_BUF_SIZE];
        loop {
            let n = reader.read(&mut buf).await.map_err(UploadError::Hash)?;
            if n == 0 {
                break;
            }
            digest.consume(&buf[..n]);
        }
        Ok(format!("{:x}", digest.compute()))
    }

    fn fingerprint_len(&self) -> usize {
        32
    }
}

/// Integrity token for a single part, checked by backends on `put_part`.
pub fn part_checksum(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}
