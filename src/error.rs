//! Error types for the LTSM RFB core.

use std::io;
use thiserror::Error;

/// Result type for RFB/LTSM operations.
pub type Result<T> = std::result::Result<T, VncError>;

/// Sub-kinds of a failed security handshake.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Client selected a security type the server did not advertise.
    #[error("client selected an unsupported security type")]
    BadType,

    /// VNC/GSSAPI credential check failed.
    #[error("authentication failed")]
    AuthFailed,

    /// The VeNCrypt TLS sub-handshake failed.
    #[error("VeNCrypt TLS handshake failed: {0}")]
    TlsFailed(String),

    /// The GSSAPI Kerberos context negotiation failed.
    #[error("GSSAPI negotiation failed: {0}")]
    KerberosFailed(String),
}

/// Errors that can occur anywhere in the RFB/LTSM core.
#[derive(Debug, Error)]
pub enum VncError {
    /// The peer closed the connection (clean EOF).
    #[error("wire closed")]
    WireClosed,

    /// An I/O error occurred on the underlying transport.
    #[error("wire I/O error: {0}")]
    WireIo(#[from] io::Error),

    /// The client's protocol version string was not recognized.
    #[error("unsupported protocol version: {0:?}")]
    HandshakeVersion(Vec<u8>),

    /// The security handshake failed.
    #[error("security handshake failed: {0}")]
    HandshakeSecurity(#[from] SecurityError),

    /// A message was malformed (wrong length, bad tag, out-of-range field).
    #[error("malformed message: {0}")]
    Format(String),

    /// A region codec produced or consumed an invalid byte stream.
    #[error("codec format error: {0}")]
    CodecFormat(String),

    /// A client requested a pixel format this server cannot serve.
    #[error("unsupported pixel format")]
    PixelFormatUnsupported,

    /// A side-channel failed; only that channel is torn down.
    #[error("channel error: {0}")]
    ChannelError(String),

    /// Resource exhaustion (memory, session slots, ...).
    #[error("resource exhausted: {0}")]
    Resource(String),

    /// An operation exceeded its deadline.
    #[error("operation timed out")]
    Timeout,
}

impl VncError {
    /// True if this error should terminate the whole session rather than
    /// just the channel or request that raised it (§7 error policy).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, VncError::ChannelError(_) | VncError::Timeout)
    }
}
