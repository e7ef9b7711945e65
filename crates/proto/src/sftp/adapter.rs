//! Adapters between SFTP's offset-addressed operations and stream-only
//! backends.
//!
//! A backend that only offers a sequential stream with seek gets wrapped in
//! [`RandomAccessReader`] / [`AutoSeekWriter`]: each tracks the stream's
//! cursor and seeks only when the requested offset diverges, so monotonic
//! transfers cost no seeks at all. Backends that are natively
//! offset-addressed are driven directly; wrapping them here would only add
//! a redundant cursor.

use crate::sftp::attr::NamedAttr;
use skiff_platform::Result;
use std::io::SeekFrom;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

/// Offset-addressed reads over a sequential stream with seek.
#[derive(Debug)]
pub struct RandomAccessReader<R> {
    inner: R,
    cursor: u64,
}

impl<R: AsyncRead + AsyncSeek + Unpin> RandomAccessReader<R> {
    /// Wraps a stream whose current position is `cursor`.
    pub fn new(inner: R, cursor: u64) -> Self {
        Self { inner, cursor }
    }

    /// Reads at `offset` until `buf` is full or the stream ends.
    ///
    /// Returns the bytes read; zero means the stream was already at its
    /// end. A short, non-empty read is a successful read that reached the
    /// end of the stream.
    pub async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if offset != self.cursor {
            self.cursor = self.inner.seek(SeekFrom::Start(offset)).await?;
        }
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.inner.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
            self.cursor += n as u64;
        }
        Ok(filled)
    }

    /// Gives access to the wrapped stream, e.g. to shut it down on close.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

/// Offset-addressed writes over a sequential stream with seek.
#[derive(Debug)]
pub struct AutoSeekWriter<W> {
    inner: W,
    cursor: u64,
}

impl<W: AsyncWrite + AsyncSeek + Unpin> AutoSeekWriter<W> {
    /// Wraps a stream whose current position is `cursor`.
    pub fn new(inner: W, cursor: u64) -> Self {
        Self { inner, cursor }
    }

    /// Writes all of `data` at `offset`.
    pub async fn write_at(&mut self, data: &[u8], offset: u64) -> Result<()> {
        if offset != self.cursor {
            self.cursor = self.inner.seek(SeekFrom::Start(offset)).await?;
        }
        self.inner.write_all(data).await?;
        self.cursor += data.len() as u64;
        Ok(())
    }

    /// Flushes buffered writes and shuts the stream down.
    pub async fn close(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Pages a bulk directory listing, one batch per READDIR.
#[derive(Debug)]
pub struct DirPager {
    entries: Vec<NamedAttr>,
    pos: usize,
}

impl DirPager {
    /// Takes ownership of a complete listing.
    pub fn new(entries: Vec<NamedAttr>) -> Self {
        Self { entries, pos: 0 }
    }

    /// Returns the next batch of up to `count` entries; empty once the
    /// listing is exhausted.
    pub fn next_page(&mut self, count: usize) -> Vec<NamedAttr> {
        let end = (self.pos + count).min(self.entries.len());
        let page = self.entries[self.pos..end].to_vec();
        self.pos = end;
        page
    }
}
