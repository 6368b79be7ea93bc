//! Transport Traits
//!
//! The byte-stream abstraction every transport hands to the bridge runtime.
//! A transport only has to produce one readable and one writable half; the
//! framing, codec and dispatch layers never see which mechanism carries them.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Boxed readable half of a connection
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed writable half of a connection
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Errors raised while establishing or using a transport
///
/// Every variant is fatal to the connection it occurs on; the bridge does not
/// reconnect.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer could not be reached
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer did not become reachable within the connect bound
    #[error("Connect to {target} timed out after {after:?}")]
    ConnectTimeout {
        /// Pipe name or address being connected to
        target: String,
        /// The bound that elapsed
        after: Duration,
    },

    /// The connection has been closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// The transport configuration cannot be used on this platform or input
    #[error("Invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// Underlying I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A connected duplex byte stream
///
/// Named-pipe transports supply two distinct streams (one per direction);
/// TCP supplies the two halves of a single socket.
pub struct TransportStream {
    reader: BoxedReader,
    writer: BoxedWriter,
}

impl TransportStream {
    /// Create a stream from separate inbound and outbound halves
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    /// Create a stream from one bidirectional I/O object
    pub fn from_duplex<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer)
    }

    /// Split into the reader and writer halves
    pub fn into_split(self) -> (BoxedReader, BoxedWriter) {
        (self.reader, self.writer)
    }
}

impl std::fmt::Debug for TransportStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportStream").finish_non_exhaustive()
    }
}

/// Something that can open a connection to the host
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the connection
    ///
    /// # Errors
    ///
    /// Returns a `TransportError` when the peer is unreachable or the connect
    /// bound elapses.
    async fn open(&self) -> Result<TransportStream, TransportError>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}
