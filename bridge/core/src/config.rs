//! Bridge Configuration
//!
//! Timeouts and buffer limits for one connection. Transport selection lives
//! in [`crate::transport::TransportConfig`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capabilities::TimeoutClass;
use crate::transport::frame::INITIAL_BUFFER_SIZE;

/// Runtime configuration for a bridge connection
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Bound for calls answered without user involvement, in milliseconds
    pub call_timeout_ms: u64,

    /// Bound for calls that wait on the user, in milliseconds
    pub interactive_timeout_ms: u64,

    /// Callback scopes retained before the oldest is evicted
    pub callback_scope_limit: usize,

    /// Initial frame reader window in bytes
    pub initial_read_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5_000,
            interactive_timeout_ms: 60_000,
            callback_scope_limit: 1024,
            initial_read_buffer: INITIAL_BUFFER_SIZE,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `BRIDGE_CALL_TIMEOUT`: Short call timeout in ms
    /// - `BRIDGE_INTERACTIVE_TIMEOUT`: Interactive call timeout in ms
    /// - `BRIDGE_CALLBACK_SCOPES`: Retained callback scopes
    /// - `BRIDGE_READ_BUFFER`: Initial read window in bytes
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            call_timeout_ms: std::env::var("BRIDGE_CALL_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.call_timeout_ms),
            interactive_timeout_ms: std::env::var("BRIDGE_INTERACTIVE_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.interactive_timeout_ms),
            callback_scope_limit: std::env::var("BRIDGE_CALLBACK_SCOPES")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.callback_scope_limit),
            initial_read_buffer: std::env::var("BRIDGE_READ_BUFFER")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.initial_read_buffer),
        }
    }

    /// Short call timeout
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Interactive call timeout
    pub fn interactive_timeout(&self) -> Duration {
        Duration::from_millis(self.interactive_timeout_ms)
    }

    /// Timeout for a class of call
    pub fn timeout_for(&self, class: TimeoutClass) -> Duration {
        match class {
            TimeoutClass::Short => self.call_timeout(),
            TimeoutClass::Interactive => self.interactive_timeout(),
        }
    }
}
