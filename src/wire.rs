//! Endian-aware byte I/O over an abstract secure transport.
//!
//! `Wire` is the single choke point every byte of the RFB/LTSM protocol
//! passes through. It owns a send-mutex so concurrent producers (frame
//! updates, bell, cut-text, LTSM channel data) never interleave bytes on
//! the wire (spec.md §4.1, §5).

use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::{Result, VncError};

/// Marker trait for a transport `Wire` can run over: a plain `TcpStream`,
/// or a `tokio_rustls` stream once VeNCrypt has upgraded the connection.
///
/// The crate never names a concrete transport type outside this bound,
/// so VeNCrypt can swap the underlying stream without touching any
/// protocol code (Design Note §9 "async vs threads").
pub trait SecureStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> SecureStream for T {}

/// Endian-aware reader/writer over a `SecureStream`.
///
/// All multi-byte RFB fields are big-endian except pixel payloads, which
/// follow the client-declared pixel byte order (spec.md §4.2) — callers
/// needing little-endian pixel writes use `write_u16_le`/`write_u32_le`
/// directly rather than the big-endian helpers below.
pub struct Wire<S> {
    stream: S,
    read_buf: BytesMut,
    /// Serializes writers so frame updates, bell, and channel data never tear.
    send_lock: Arc<Mutex<()>>,
}

impl<S: SecureStream> Wire<S> {
    /// Wraps a transport in a fresh `Wire`.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(4096),
            send_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Returns a clone of the send-mutex handle so other tasks (channel
    /// writers, periodic frame senders) can serialize with this `Wire`
    /// without owning it outright.
    pub fn send_lock(&self) -> Arc<Mutex<()>> {
        self.send_lock.clone()
    }

    async fn fill(&mut self, want: usize) -> Result<()> {
        while self.read_buf.len() < want {
            let n = self
                .stream
                .read_buf(&mut self.read_buf)
                .await
                .map_err(VncError::WireIo)?;
            if n == 0 {
                return Err(VncError::WireClosed);
            }
        }
        Ok(())
    }

    /// Reads a single unsigned byte.
    pub async fn read_u8(&mut self) -> Result<u8> {
        self.fill(1).await?;
        Ok(self.read_buf.get_u8())
    }

    /// Reads a big-endian `u16`.
    pub async fn read_u16_be(&mut self) -> Result<u16> {
        self.fill(2).await?;
        Ok(self.read_buf.get_u16())
    }

    /// Reads a big-endian `u32`.
    pub async fn read_u32_be(&mut self) -> Result<u32> {
        self.fill(4).await?;
        Ok(self.read_buf.get_u32())
    }

    /// Reads a big-endian signed `i32` (rectangle encoding field).
    pub async fn read_i32_be(&mut self) -> Result<i32> {
        self.fill(4).await?;
        Ok(self.read_buf.get_i32())
    }

    /// Discards `n` bytes from the stream.
    pub async fn skip(&mut self, n: usize) -> Result<()> {
        self.fill(n).await?;
        self.read_buf.advance(n);
        Ok(())
    }

    /// Looks at the next byte without consuming it.
    pub async fn peek_u8(&mut self) -> Result<u8> {
        self.fill(1).await?;
        Ok(self.read_buf[0])
    }

    /// Reads exactly `n` bytes and returns them.
    pub async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        self.fill(n).await?;
        Ok(self.read_buf.split_to(n).to_vec())
    }

    /// True if there is at least one buffered, unread byte.
    pub fn has_buffered(&self) -> bool {
        !self.read_buf.is_empty()
    }

    /// True if a non-blocking peek at the underlying socket would return
    /// readable data. Best-effort: backed by `has_buffered`, since a true
    /// readiness poll needs a `tokio::io::Interest` the trait bound here
    /// does not guarantee access to.
    pub fn has_input(&self) -> bool {
        self.has_buffered()
    }

    /// Writes a raw byte slice, holding the send-mutex for the duration.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let _guard = self.send_lock.clone().lock_owned().await;
        self.stream.write_all(bytes).await.map_err(VncError::WireIo)
    }

    /// Flushes the underlying transport.
    pub async fn flush(&mut self) -> Result<()> {
        self.stream.flush().await.map_err(VncError::WireIo)
    }

    /// Convenience: builds then writes a `u8`.
    pub async fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_all(&[v]).await
    }

    /// Convenience: builds then writes a big-endian `u16`.
    pub async fn write_u16_be(&mut self, v: u16) -> Result<()> {
        let mut b = BytesMut::with_capacity(2);
        b.put_u16(v);
        self.write_all(&b).await
    }

    /// Convenience: builds then writes a big-endian `u32`.
    pub async fn write_u32_be(&mut self, v: u32) -> Result<()> {
        let mut b = BytesMut::with_capacity(4);
        b.put_u32(v);
        self.write_all(&b).await
    }
}
