//! Transport Layer for Host-Worker IPC
//!
//! Provides abstraction over the two mechanisms a host can offer:
//! - `NamedPipe`: a pair of named pipes, one per direction
//! - `Tcp`: one loopback TCP connection for both directions
//!
//! Both surface as a [`TransportStream`] of boxed read/write halves. Framing
//! ([`frame`]) and the ordered outbound queue ([`writer`]) sit on top and are
//! shared by every transport.
//!
//! # Security
//!
//! - Unix pipe sockets are created with 0600 permissions
//! - TCP only ever connects to IPv4 loopback

pub mod config;
pub mod factory;
pub mod frame;
pub mod pipe;
pub mod tcp;
pub mod traits;
pub mod writer;

// Re-exports for convenience
pub use config::{TransportConfig, TransportType};
pub use factory::create_transport;
pub use frame::{encode_frame, FrameDecoder, FrameReader, DELIMITER_BYTES, FRAME_DELIMITER};
pub use pipe::NamedPipeTransport;
pub use tcp::TcpTransport;
pub use traits::{BoxedReader, BoxedWriter, Transport, TransportError, TransportStream};
pub use writer::{FrameWriter, OutboundQueue};
