//! Bridge Core - Bidirectional Remote Calls Between Host and Worker
//!
//! This crate connects a long-running host process to a depot worker over a
//! byte stream. Either side can issue a named command and await a structured
//! reply, or call back into a capability the other side exposes, including
//! functions that were handed over inside an earlier reply.
//!
//! # Architecture
//!
//! ```text
//!  outbound:  Peer / Dispatcher ──► codec ──► OutboundQueue ──► FrameWriter ──► transport
//!  inbound:   transport ──► FrameReader ──► codec ──► Dispatcher
//!                                                        │
//!              ┌───────────────┬────────────────┬────────┴──────────┐
//!              ▼               ▼                ▼                   ▼
//!        PendingCalls   CapabilityTable   CallbackRegistry    CommandTable
//!        (replies)      (directed calls)  (Invoke)            (VerifyFiles)
//! ```
//!
//! # Key Types
//!
//! - [`Bridge`]: Configures and starts one connection
//! - [`Peer`]: Issues calls to the other side and awaits replies
//! - [`CapabilityProxy`]: Typed stubs for the host's `context` and `ui` capabilities
//! - [`Value`]: In-process value, including binary buffers and functions
//! - [`IntegrityVerifier`]: Collaborator behind the `VerifyFiles` command
//!
//! # Quick Start
//!
//! ```ignore
//! use bridge_core::{create_transport, Bridge, BridgeConfig, TransportConfig};
//!
//! let transport = create_transport(&TransportConfig::for_peer("depot42", true)?);
//! let stream = transport.open().await?;
//! let handle = Bridge::builder(BridgeConfig::from_env())
//!     .verifier(verifier)
//!     .start(stream);
//! let outcome = handle.wait().await?;
//! ```
//!
//! # Module Overview
//!
//! - [`transport`]: Named-pipe and TCP transports, framing, outbound queue
//! - [`codec`]: Wire value conversion (buffers, function placeholders)
//! - [`protocol`]: Envelope parsing and construction
//! - [`registry`]: Pending-call and callback registries
//! - [`capabilities`]: Capability catalogue and local handler table
//! - [`proxy`]: Typed capability stubs
//! - [`peer`]: Call issuing and reply correlation
//! - [`commands`]: `VerifyFiles` and the command table
//! - [`dispatcher`]: Inbound frame routing
//! - [`bridge`]: Connection runtime

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bridge;
pub mod capabilities;
pub mod codec;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod proxy;
pub mod registry;
pub mod transport;

// Re-exports for convenience
pub use bridge::{Bridge, BridgeHandle, BridgeOutcome, ShutdownTrigger};
pub use capabilities::{
    CallbackTarget, Capability, CapabilityCall, CapabilityGroup, CapabilityHandler,
    CapabilityTable, TimeoutClass,
};
pub use codec::{Callback, DecodeError, FromValue, Value};
pub use commands::{
    CommandHandler, CommandTable, IntegrityVerifier, VerifyError, VerifyFilesCommand, VerifyParameters,
    COMMAND_VERIFY_FILES,
};
pub use config::BridgeConfig;
pub use error::{BridgeError, CallError, RemoteError};
pub use peer::Peer;
pub use protocol::{CorrelationId, FrameDecodeError};
pub use proxy::{CapabilityProxy, ContextProxy, Credentials, ErrorReport, UiProxy};

// Transport exports
pub use transport::{
    create_transport, Transport, TransportConfig, TransportError, TransportStream, TransportType,
};
