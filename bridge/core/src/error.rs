//! Error Types
//!
//! Errors scoped to a single call or to a whole connection. Frame-level
//! decode errors live with the envelope parser in [`crate::protocol`];
//! transport failures in [`crate::transport`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::DecodeError;
use crate::transport::TransportError;

/// Failure reported by the peer, or sent to it, as `{name, message, stack}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{name}: {message}")]
pub struct RemoteError {
    /// Error type name
    #[serde(default)]
    pub name: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
    /// Optional trace or detail text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl RemoteError {
    /// Create an error with no stack
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Attach detail text
    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Build from a local error, joining its source chain with `"; "`
    pub fn from_error(name: impl Into<String>, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str("; ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::new(name, message)
    }
}

/// Errors returned to the issuer of a remote call
#[derive(Debug, Error)]
pub enum CallError {
    /// No reply arrived within the bound
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Capability or command that was called
        operation: String,
        /// The bound that elapsed
        after: Duration,
    },

    /// The peer answered with an error
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// An `Invoke` named a callback that is not registered
    #[error("Callback {callback_id} of request {request_id} not found")]
    CallbackNotFound {
        /// Request whose reply carried the callback
        request_id: String,
        /// Placeholder id of the callback
        callback_id: String,
    },

    /// The reply did not have the expected shape
    #[error("Unexpected result from {operation}")]
    Decode {
        /// Capability or command that was called
        operation: String,
        /// What did not match
        #[source]
        source: DecodeError,
    },

    /// The connection ended before a reply arrived
    #[error("Connection closed before reply")]
    ConnectionClosed,
}

impl CallError {
    /// Stable error name used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "TimeoutError",
            Self::Remote(_) => "RemoteError",
            Self::CallbackNotFound { .. } => "CallbackNotFound",
            Self::Decode { .. } => "DecodeError",
            Self::ConnectionClosed => "ConnectionClosed",
        }
    }

    /// Check if the call timed out
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<CallError> for RemoteError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Remote(remote) => remote,
            other => RemoteError::from_error(other.name(), &other),
        }
    }
}

/// Connection-level failure ending the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Transport failed while reading or writing
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A bridge task panicked or was cancelled
    #[error("Bridge task failed: {0}")]
    Task(String),
}

impl BridgeError {
    /// Short name for the exit report
    pub fn name(&self) -> &'static str {
        match self {
            Self::Transport(_) => "TransportError",
            Self::Task(_) => "TaskError",
        }
    }
}
