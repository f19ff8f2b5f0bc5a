//! Ranged blob access.
//!
//! A [`BlobSource`] serves byte ranges of a (usually remote) layer blob. Each
//! batched request yields one [`FetchOutcome`] per range over a tokio mpsc
//! channel. Every outcome must be consumed: an open stream left in the
//! channel holds on to the connection that produced it. [`Outcomes`] wraps
//! the receiving side and guarantees that on every exit path.

use std::fmt;
use std::io::{Cursor, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use a3s_storage_core::error::{Result, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;

/// A request for `length` bytes starting at `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Exclusive end offset, `None` on overflow.
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.length)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.offset,
            self.offset.saturating_add(self.length)
        )
    }
}

/// A readable stream positioned at the start of a requested range.
pub type BlobStream = Box<dyn AsyncRead + Send + Unpin>;

/// Result of fetching one range.
pub type FetchOutcome = Result<BlobStream>;

/// Serves byte ranges of a blob.
#[async_trait]
pub trait BlobSource: Send + Sync {
    /// Request `ranges` in one batch.
    ///
    /// The returned channel yields exactly `ranges.len()` outcomes, one per
    /// range in request order, and is closed afterwards. Errors that prevent
    /// the request from being issued at all are returned directly.
    async fn get_blob_at(&self, ranges: &[ByteRange]) -> Result<mpsc::Receiver<FetchOutcome>>;
}

#[async_trait]
impl<S: BlobSource + ?Sized> BlobSource for Arc<S> {
    async fn get_blob_at(&self, ranges: &[ByteRange]) -> Result<mpsc::Receiver<FetchOutcome>> {
        (**self).get_blob_at(ranges).await
    }
}

/// Normalize a transport failure so callers see a single error kind for it.
pub(crate) fn fetch_failed(err: StorageError) -> StorageError {
    match err {
        StorageError::FetchFailed(_) => err,
        other => StorageError::FetchFailed(other.to_string()),
    }
}

/// Consumer side of a batched fetch.
///
/// Outcomes are taken in request order with [`Outcomes::read_blob`]. Call
/// [`Outcomes::finish`] once done to close whatever was not consumed and
/// surface any late error. If the guard is dropped instead, the channel is
/// closed and every buffered stream is dropped with it.
pub struct Outcomes {
    rx: mpsc::Receiver<FetchOutcome>,
    remaining: usize,
}

impl Outcomes {
    /// Wrap a receiver that will deliver `expected` outcomes.
    pub fn new(rx: mpsc::Receiver<FetchOutcome>, expected: usize) -> Self {
        Self {
            rx,
            remaining: expected,
        }
    }

    /// Number of outcomes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Take the next outcome and read exactly `length` bytes from it.
    ///
    /// The stream is closed before returning. A short stream or a channel
    /// closed ahead of time is a fetch failure.
    pub async fn read_blob(&mut self, length: u64) -> Result<Vec<u8>> {
        let outcome = self
            .rx
            .recv()
            .await
            .ok_or_else(|| StorageError::FetchFailed("stream closed".to_string()))?;
        self.remaining = self.remaining.saturating_sub(1);

        let mut stream = outcome.map_err(fetch_failed)?;
        let len = usize::try_from(length).map_err(|_| {
            StorageError::FetchFailed(format!("range length {} does not fit in memory", length))
        })?;

        let mut blob = vec![0u8; len];
        let read = stream.read_exact(&mut blob).await;
        drop(stream);

        match read {
            Ok(_) => Ok(blob),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(
                StorageError::FetchFailed(format!("premature end of stream, expected {} bytes", length)),
            ),
            Err(e) => Err(StorageError::FetchFailed(e.to_string())),
        }
    }

    /// Drain every outcome left in the channel, closing the streams.
    ///
    /// Returns the first error found among the drained outcomes.
    pub async fn finish(mut self) -> Result<()> {
        let mut first_err = None;
        while self.remaining > 0 {
            let Some(outcome) = self.rx.recv().await else {
                break;
            };
            self.remaining -= 1;
            match outcome {
                Ok(stream) => drop(stream),
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(fetch_failed(e));
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Outcomes {
    fn drop(&mut self) {
        self.rx.close();
        while let Ok(outcome) = self.rx.try_recv() {
            drop(outcome);
        }
    }
}

fn channel_for(ranges: &[ByteRange]) -> (mpsc::Sender<FetchOutcome>, mpsc::Receiver<FetchOutcome>) {
    mpsc::channel(ranges.len().max(1))
}

/// Blob held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryBlobSource {
    data: Bytes,
}

impl MemoryBlobSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Blob size in bytes.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn slice(&self, range: &ByteRange) -> Result<Bytes> {
        match range.end() {
            Some(end) if end <= self.len() => {
                Ok(self.data.slice(range.offset as usize..end as usize))
            }
            _ => Err(StorageError::FetchFailed(format!(
                "range {} outside blob of {} bytes",
                range,
                self.len()
            ))),
        }
    }
}

#[async_trait]
impl BlobSource for MemoryBlobSource {
    async fn get_blob_at(&self, ranges: &[ByteRange]) -> Result<mpsc::Receiver<FetchOutcome>> {
        let (tx, rx) = channel_for(ranges);
        for range in ranges {
            let outcome = self
                .slice(range)
                .map(|bytes| Box::new(Cursor::new(bytes)) as BlobStream);
            if tx.send(outcome).await.is_err() {
                break;
            }
        }
        Ok(rx)
    }
}

/// Blob stored in a local file, such as `blobs/sha256/<digest>` in an OCI
/// image layout. Each range gets its own file handle.
#[derive(Debug, Clone)]
pub struct FileBlobSource {
    path: PathBuf,
}

impl FileBlobSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blob size in bytes.
    pub async fn size(&self) -> Result<u64> {
        let meta = tokio::fs::metadata(&self.path).await?;
        Ok(meta.len())
    }

    async fn open_range(&self, range: &ByteRange, size: u64) -> Result<BlobStream> {
        if range.end().map_or(true, |end| end > size) {
            return Err(StorageError::FetchFailed(format!(
                "range {} outside blob of {} bytes",
                range, size
            )));
        }

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(range.offset)).await?;

        Ok(Box::new(file.take(range.length)))
    }
}

#[async_trait]
impl BlobSource for FileBlobSource {
    async fn get_blob_at(&self, ranges: &[ByteRange]) -> Result<mpsc::Receiver<FetchOutcome>> {
        let size = self.size().await?;
        let (tx, rx) = channel_for(ranges);
        for range in ranges {
            let outcome = self.open_range(range, size).await;
            if tx.send(outcome).await.is_err() {
                break;
            }
        }

        tracing::trace!(
            path = %self.path.display(),
            ranges = ranges.len(),
            "Served blob ranges from file"
        );
        Ok(rx)
    }
}
