//! Named-Pipe Transport
//!
//! The host creates an inbound pipe `<name>` and waits for the worker to
//! connect; the worker then serves `<name>_reply` and waits for the host to
//! connect back. Requests flow host → worker over the first pipe, everything
//! the worker writes goes over the second.
//!
//! # Platforms
//!
//! - Windows: native pipes at `\\.\pipe\<name>`
//! - Unix: Unix domain sockets at `<dir>/CoreFxPipe_<name>`, the path hosts
//!   use for their named pipes. The reply socket is created with 0600
//!   permissions and any stale socket file is removed first.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use super::traits::{Transport, TransportError, TransportStream};

/// Initial delay between connect attempts while the host's pipe is absent
const CONNECT_BACKOFF_START: Duration = Duration::from_millis(10);

/// Ceiling for the connect backoff
const CONNECT_BACKOFF_MAX: Duration = Duration::from_millis(250);

/// Suffix of the worker-served outbound pipe
pub const REPLY_PIPE_SUFFIX: &str = "_reply";

/// Named-pipe pair transport
#[derive(Debug, Clone)]
pub struct NamedPipeTransport {
    name: String,
    connect_timeout: Duration,
    pipe_dir: Option<PathBuf>,
}

impl NamedPipeTransport {
    /// Create a transport for the given base pipe name
    pub fn new(name: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            connect_timeout,
            pipe_dir: None,
        }
    }

    /// Place Unix pipe sockets in `dir` instead of the system temp dir
    #[must_use]
    pub fn with_pipe_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.pipe_dir = dir;
        self
    }

    /// Name of the pipe the worker reads from
    pub fn inbound_name(&self) -> &str {
        &self.name
    }

    /// Name of the pipe the worker writes to
    pub fn outbound_name(&self) -> String {
        format!("{}{REPLY_PIPE_SUFFIX}", self.name)
    }

    /// Filesystem location of a pipe socket on Unix
    #[cfg(unix)]
    pub fn socket_path(&self, pipe_name: &str) -> PathBuf {
        self.pipe_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
            .join(format!("CoreFxPipe_{pipe_name}"))
    }
}

/// Exponential backoff step, capped
fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(CONNECT_BACKOFF_MAX)
}

#[cfg(unix)]
mod platform {
    use std::fs::Permissions;
    use std::io::ErrorKind;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use tokio::net::{UnixListener, UnixStream};
    use tokio::time::Instant;

    use super::{next_backoff, TransportError, CONNECT_BACKOFF_START};

    /// Connect to the host's inbound pipe, retrying until `deadline`
    ///
    /// The host may still be setting up its listener when the worker starts.
    pub(super) async fn connect_inbound(
        path: &Path,
        deadline: Instant,
    ) -> Result<UnixStream, std::io::Error> {
        let mut backoff = CONNECT_BACKOFF_START;
        loop {
            match UnixStream::connect(path).await {
                Ok(stream) => return Ok(stream),
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::NotFound | ErrorKind::ConnectionRefused
                    ) && Instant::now() + backoff < deadline =>
                {
                    tracing::trace!(path = %path.display(), "Inbound pipe not ready, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Serve the outbound pipe and wait for the host to connect
    pub(super) async fn accept_outbound(path: &Path) -> Result<UnixStream, TransportError> {
        if tokio::fs::try_exists(path).await? {
            tracing::debug!(path = %path.display(), "Removing stale reply socket");
            tokio::fs::remove_file(path).await?;
        }

        let listener = UnixListener::bind(path)?;
        tokio::fs::set_permissions(path, Permissions::from_mode(0o600)).await?;
        tracing::debug!(path = %path.display(), "Waiting for host on reply pipe");

        let accepted = listener.accept().await;
        // The connection outlives the socket file once accepted.
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::debug!(path = %path.display(), error = %e, "Could not unlink reply socket");
        }
        let (stream, _addr) = accepted?;
        Ok(stream)
    }
}

#[cfg(windows)]
mod platform {
    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions};
    use tokio::time::Instant;

    use super::{next_backoff, TransportError, CONNECT_BACKOFF_START};

    /// `ERROR_FILE_NOT_FOUND`
    const ERROR_FILE_NOT_FOUND: i32 = 2;
    /// `ERROR_PIPE_BUSY`
    const ERROR_PIPE_BUSY: i32 = 231;

    pub(super) fn pipe_path(name: &str) -> String {
        format!(r"\\.\pipe\{name}")
    }

    pub(super) async fn connect_inbound(
        name: &str,
        deadline: Instant,
    ) -> Result<NamedPipeClient, std::io::Error> {
        let path = pipe_path(name);
        let mut backoff = CONNECT_BACKOFF_START;
        loop {
            match ClientOptions::new().open(&path) {
                Ok(client) => return Ok(client),
                Err(e)
                    if matches!(e.raw_os_error(), Some(ERROR_FILE_NOT_FOUND | ERROR_PIPE_BUSY))
                        && Instant::now() + backoff < deadline =>
                {
                    tracing::trace!(pipe = %path, "Inbound pipe not ready, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub(super) async fn accept_outbound(name: &str) -> Result<NamedPipeServer, TransportError> {
        let path = pipe_path(name);
        let server = ServerOptions::new()
            .first_pipe_instance(true)
            .create(&path)?;
        tracing::debug!(pipe = %path, "Waiting for host on reply pipe");
        server.connect().await?;
        Ok(server)
    }
}

#[async_trait]
impl Transport for NamedPipeTransport {
    async fn open(&self) -> Result<TransportStream, TransportError> {
        let deadline = tokio::time::Instant::now() + self.connect_timeout;

        #[cfg(unix)]
        let inbound_target = self.socket_path(self.inbound_name());
        #[cfg(windows)]
        let inbound_target = self.inbound_name().to_string();

        let connect = platform::connect_inbound(&inbound_target, deadline);
        let inbound = match tokio::time::timeout_at(deadline, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TransportError::ConnectionFailed(format!(
                    "pipe '{}': {e}",
                    self.inbound_name()
                )))
            }
            Err(_) => {
                return Err(TransportError::ConnectTimeout {
                    target: self.inbound_name().to_string(),
                    after: self.connect_timeout,
                })
            }
        };
        tracing::info!(pipe = %self.inbound_name(), "Connected to inbound pipe");

        #[cfg(unix)]
        let outbound_target = self.socket_path(&self.outbound_name());
        #[cfg(windows)]
        let outbound_target = self.outbound_name();

        let outbound = platform::accept_outbound(&outbound_target).await?;
        tracing::info!(pipe = %self.outbound_name(), "Host connected to reply pipe");

        Ok(TransportStream::new(inbound, outbound))
    }

    fn describe(&self) -> String {
        format!("named pipes '{}' / '{}'", self.inbound_name(), self.outbound_name())
    }
}
