//! Buffered, timeout-bounded byte transport for a single connection.
//!
//! A connection's stream (plain TCP or TLS) is type-erased into a
//! [`BoxedStream`] and split once into a read half owned by [`SourceBuffer`]
//! and a write half owned by [`WireWriter`]. All reads race the client idle
//! timeout; all writes race the write timeout.

use crate::errors::ErrorKind;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::time::sleep;

/// Object trait for the connection's bi-directional byte stream.
pub(crate) trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// Type-erased connection stream, plain or TLS.
pub(crate) type BoxedStream = Box<dyn AsyncStream>;

/// Splits a stream into the connection's buffered reader and writer.
pub(crate) fn split(
    stream: BoxedStream,
    read_buffer: Vec<u8>,
    read_timeout: Duration,
    write_timeout: Duration,
) -> (SourceBuffer, WireWriter) {
    let (rd, wr) = tokio::io::split(stream);
    (
        SourceBuffer {
            rd,
            buf: read_buffer,
            pos: 0,
            read_timeout,
        },
        WireWriter { wr, write_timeout },
    )
}

/// Buffered reader over the connection's read half.
///
/// Bytes are appended by [`fill`](Self::fill) and consumed by the preamble
/// parser and body reader. Unconsumed bytes survive between requests: surplus
/// body bytes and eagerly pipelined preambles stay in the buffer until the
/// next request is parsed.
pub(crate) struct SourceBuffer {
    rd: ReadHalf<BoxedStream>,
    buf: Vec<u8>,
    pos: usize,
    read_timeout: Duration,
}

impl SourceBuffer {
    /// Unconsumed bytes.
    #[inline(always)]
    pub(crate) fn available(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline(always)]
    pub(crate) fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }

    #[inline(always)]
    pub(crate) fn consume(&mut self, count: usize) {
        debug_assert!(count <= self.len());
        self.pos += count;
    }

    /// Consumes `count` bytes and returns them.
    #[inline(always)]
    pub(crate) fn take(&mut self, count: usize) -> &[u8] {
        debug_assert!(count <= self.len());
        let start = self.pos;
        self.pos += count;
        &self.buf[start..self.pos]
    }

    /// The last `count` bytes consumed by [`take`](Self::take).
    #[inline(always)]
    pub(crate) fn taken(&self, count: usize) -> &[u8] {
        &self.buf[self.pos - count..self.pos]
    }

    /// Moves unconsumed bytes to the front of the buffer.
    ///
    /// Called between requests so the buffer does not grow with the number of
    /// requests served on one connection.
    pub(crate) fn compact(&mut self) {
        if self.pos == 0 {
            return;
        }
        self.buf.copy_within(self.pos.., 0);
        self.buf.truncate(self.buf.len() - self.pos);
        self.pos = 0;
    }

    /// Reads more bytes from the socket, racing the client idle timeout.
    ///
    /// Returns the number of bytes appended; `0` means the peer closed its
    /// write side.
    pub(crate) async fn fill(&mut self) -> Result<usize, ErrorKind> {
        tokio::select! {
            biased;

            read = self.rd.read_buf(&mut self.buf) => Ok(read?),
            _ = sleep(self.read_timeout) => Err(ErrorKind::ClientTimeout),
        }
    }

    /// Releases the internal buffer for pooling.
    pub(crate) fn into_buffer(self) -> Vec<u8> {
        self.buf
    }
}

/// Timeout-bounded writer over the connection's write half.
pub(crate) struct WireWriter {
    wr: WriteHalf<BoxedStream>,
    write_timeout: Duration,
}

impl WireWriter {
    pub(crate) async fn write_all(&mut self, bytes: &[u8]) -> Result<(), ErrorKind> {
        tokio::select! {
            biased;

            write = self.wr.write_all(bytes) => Ok(write?),
            _ = sleep(self.write_timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout").into())
            }
        }
    }

    pub(crate) async fn flush(&mut self) -> Result<(), ErrorKind> {
        self.wr.flush().await?;
        Ok(())
    }

    /// Gracefully closes the write side, sending a FIN to the peer.
    ///
    /// Pooling clients rely on the FIN to evict dead keep-alive sockets.
    pub(crate) async fn shutdown(&mut self) {
        let _ = self.wr.shutdown().await;
    }
}
