//! Transport Configuration
//!
//! Selects between the named-pipe pair and the TCP socket, and carries the
//! connect bound.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::TransportError;

/// Default bound on connecting to the host's inbound pipe
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Transport type selection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportType {
    /// Pair of named pipes, one per direction
    ///
    /// The worker connects to `<name>` as a client and serves `<name>_reply`.
    NamedPipe {
        /// Base pipe name shared with the host
        name: String,
    },

    /// One TCP connection to `localhost:<port>` used for both directions
    Tcp {
        /// Port the host listens on
        port: u16,
    },
}

/// Transport configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Which transport to use
    pub transport: TransportType,

    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Directory holding pipe sockets on Unix (None = system temp dir)
    ///
    /// Hosts place their pipes at `$TMPDIR/CoreFxPipe_<name>`, so the
    /// default matches them.
    pub pipe_dir: Option<PathBuf>,
}

impl TransportConfig {
    /// Named-pipe configuration for the given base name
    pub fn named_pipe(name: impl Into<String>) -> Self {
        Self {
            transport: TransportType::NamedPipe { name: name.into() },
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            pipe_dir: None,
        }
    }

    /// TCP configuration for the given local port
    pub fn tcp(port: u16) -> Self {
        Self {
            transport: TransportType::Tcp { port },
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            pipe_dir: None,
        }
    }

    /// Build a configuration from the worker's `<id>` argument
    ///
    /// In pipe mode `id` is the pipe name; otherwise it must be a port number.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidConfig` if socket mode is selected and
    /// `id` is not a valid port.
    pub fn for_peer(id: &str, use_pipe: bool) -> Result<Self, TransportError> {
        if id.is_empty() {
            return Err(TransportError::InvalidConfig("empty connection id".into()));
        }
        if use_pipe {
            return Ok(Self::named_pipe(id));
        }
        let port = id.parse::<u16>().map_err(|_| {
            TransportError::InvalidConfig(format!("'{id}' is not a valid TCP port"))
        })?;
        Ok(Self::tcp(port))
    }

    /// Apply environment overrides
    ///
    /// Environment variables:
    /// - `BRIDGE_CONNECT_TIMEOUT`: Connection timeout in ms
    /// - `BRIDGE_PIPE_DIR`: Directory holding pipe sockets (Unix)
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(ms) = std::env::var("BRIDGE_CONNECT_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.connect_timeout_ms = ms;
        }
        if let Ok(dir) = std::env::var("BRIDGE_PIPE_DIR") {
            if !dir.is_empty() {
                self.pipe_dir = Some(PathBuf::from(dir));
            }
        }
        self
    }

    /// Override the pipe socket directory
    #[must_use]
    pub fn with_pipe_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pipe_dir = Some(dir.into());
        self
    }

    /// Connect bound as a `Duration`
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Check if this is a named-pipe configuration
    pub fn is_named_pipe(&self) -> bool {
        matches!(self.transport, TransportType::NamedPipe { .. })
    }
}
