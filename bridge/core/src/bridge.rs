//! Bridge Runtime
//!
//! Runs one connection: a reader task turning frames into dispatches, a
//! writer task draining the outbound queue, and a shared shutdown signal
//! tying their lifetimes together.
//!
//! # Lifecycle
//!
//! ```text
//! start ──► reader loop ──► EOF / read error / shutdown()
//!             │                     │
//!             ▼                     ▼
//!         dispatch tasks      shutdown signal ──► writer drains and closes
//!                                   │
//!                                   ▼
//!                       pending calls fail with ConnectionClosed
//! ```
//!
//! A write failure flips the same signal, so the reader stops too.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::capabilities::CapabilityTable;
use crate::commands::{
    CommandHandler, CommandTable, IntegrityVerifier, VerifyFilesCommand, COMMAND_VERIFY_FILES,
};
use crate::config::BridgeConfig;
use crate::dispatcher::Dispatcher;
use crate::error::BridgeError;
use crate::peer::Peer;
use crate::registry::{CallbackRegistry, PendingCalls};
use crate::transport::{
    BoxedReader, BoxedWriter, FrameReader, FrameWriter, OutboundQueue, TransportError,
    TransportStream,
};

/// How a connection ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// The peer sent `Quit` and then closed the stream
    PeerQuit,
    /// The peer closed the stream without `Quit`
    StreamClosed,
    /// Local shutdown was requested
    Shutdown,
}

/// Why the reader loop stopped
enum ReadEnd {
    Eof,
    Shutdown,
}

/// Configures and starts a bridge connection
///
/// # Example
///
/// ```ignore
/// let handle = Bridge::builder(BridgeConfig::from_env())
///     .verifier(Arc::new(MyVerifier))
///     .start(stream);
/// let outcome = handle.wait().await?;
/// ```
#[derive(Debug, Default)]
pub struct Bridge {
    config: BridgeConfig,
    commands: CommandTable,
    capabilities: CapabilityTable,
}

impl Bridge {
    /// Start configuring a bridge
    pub fn builder(config: BridgeConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Serve a named command
    #[must_use]
    pub fn command(mut self, name: impl Into<String>, handler: Arc<dyn CommandHandler>) -> Self {
        self.commands.register(name, handler);
        self
    }

    /// Serve `VerifyFiles` with the given collaborator
    #[must_use]
    pub fn verifier(self, verifier: Arc<dyn IntegrityVerifier>) -> Self {
        self.command(
            COMMAND_VERIFY_FILES,
            Arc::new(VerifyFilesCommand::new(verifier)),
        )
    }

    /// Expose capabilities to directed calls from the peer
    #[must_use]
    pub fn capabilities(mut self, capabilities: CapabilityTable) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Start serving the connection
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self, stream: TransportStream) -> BridgeHandle {
        let config = Arc::new(self.config);
        let (outbound, outbound_rx) = OutboundQueue::channel();
        let peer = Peer::new(
            PendingCalls::new(),
            Arc::new(CallbackRegistry::new(config.callback_scope_limit)),
            outbound,
            Arc::clone(&config),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            peer.clone(),
            self.commands,
            self.capabilities,
        ));
        let (shutdown_tx, _) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);

        let (reader, writer) = stream.into_split();
        let task = tokio::spawn(run_connection(
            reader,
            writer,
            outbound_rx,
            dispatcher,
            peer.clone(),
            Arc::clone(&shutdown_tx),
            config.initial_read_buffer,
        ));

        BridgeHandle {
            peer,
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// A running connection
#[derive(Debug)]
pub struct BridgeHandle {
    peer: Peer,
    shutdown: Arc<watch::Sender<bool>>,
    task: JoinHandle<Result<BridgeOutcome, BridgeError>>,
}

impl BridgeHandle {
    /// Handle for calling into the peer
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// Ask the connection to stop; queued frames are still written
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Detached trigger for [`shutdown`](Self::shutdown), usable while
    /// another task waits on the handle
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger(Arc::clone(&self.shutdown))
    }

    /// Check whether the connection has ended
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the connection to end
    ///
    /// # Errors
    ///
    /// Returns the transport failure that ended the connection, or
    /// `BridgeError::Task` if the runtime task died.
    pub async fn wait(self) -> Result<BridgeOutcome, BridgeError> {
        self.task
            .await
            .map_err(|e| BridgeError::Task(e.to_string()))?
    }
}

/// Stops a running connection from anywhere
#[derive(Debug, Clone)]
pub struct ShutdownTrigger(Arc<watch::Sender<bool>>);

impl ShutdownTrigger {
    /// Ask the connection to stop
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

async fn run_connection(
    reader: BoxedReader,
    writer: BoxedWriter,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    dispatcher: Arc<Dispatcher>,
    peer: Peer,
    shutdown_tx: Arc<watch::Sender<bool>>,
    initial_read_buffer: usize,
) -> Result<BridgeOutcome, BridgeError> {
    tracing::debug!("Bridge connection started");

    let writer_task = tokio::spawn(
        FrameWriter::new(writer, outbound_rx).run(Arc::clone(&shutdown_tx), shutdown_tx.subscribe()),
    );

    let frames = FrameReader::new(reader, initial_read_buffer);
    let read_result = read_loop(frames, &dispatcher, shutdown_tx.subscribe()).await;

    shutdown_tx.send_replace(true);
    let write_result = writer_task.await;

    let abandoned = peer.pending().close_all();
    if abandoned > 0 {
        tracing::warn!(count = abandoned, "Pending calls failed at teardown");
    }

    let end = read_result.map_err(|e| {
        tracing::error!(error = %e, "Read failed");
        e
    })?;

    match (write_result, &end) {
        (Ok(Ok(())), _) => {}
        // After the peer hung up, failing to flush the tail is expected.
        (Ok(Err(e)), ReadEnd::Eof) => {
            tracing::debug!(error = %e, "Writer stopped after end of stream");
        }
        (Ok(Err(e)), ReadEnd::Shutdown) => return Err(e.into()),
        (Err(join), _) => return Err(BridgeError::Task(join.to_string())),
    }

    let outcome = match end {
        ReadEnd::Eof if dispatcher.quit_received() => BridgeOutcome::PeerQuit,
        ReadEnd::Eof => BridgeOutcome::StreamClosed,
        ReadEnd::Shutdown => BridgeOutcome::Shutdown,
    };
    tracing::info!(?outcome, "Bridge connection finished");
    Ok(outcome)
}

async fn read_loop(
    mut frames: FrameReader<BoxedReader>,
    dispatcher: &Arc<Dispatcher>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<ReadEnd, TransportError> {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return Ok(ReadEnd::Shutdown);
        }
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    return Ok(ReadEnd::Shutdown);
                }
            }
            frame = frames.next_frame() => match frame? {
                Some(frame) => dispatcher.dispatch(&frame),
                None => {
                    tracing::info!("Peer closed the stream");
                    return Ok(ReadEnd::Eof);
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;

    use crate::transport::encode_frame;

    #[tokio::test]
    async fn test_quit_then_close_is_orderly() {
        let (worker_side, host_side) = tokio::io::duplex(4096);
        let handle = Bridge::builder(BridgeConfig::default()).start(TransportStream::from_duplex(worker_side));

        let (host_read, mut host_write) = tokio::io::split(host_side);
        host_write
            .write_all(&encode_frame(r#"{"id":"q1","payload":{"command":"Quit"}}"#))
            .await
            .unwrap();

        let mut frames = FrameReader::new(host_read, 1024);
        let ack = frames.next_frame().await.unwrap().unwrap();
        let ack: serde_json::Value = serde_json::from_slice(&ack).unwrap();
        assert_eq!(ack, serde_json::json!({"id": "q1", "data": ""}));

        drop(host_write);
        drop(frames);

        let outcome = tokio::time::timeout(Duration::from_secs(1), handle.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, BridgeOutcome::PeerQuit);
    }

    #[tokio::test]
    async fn test_close_without_quit() {
        let (worker_side, host_side) = tokio::io::duplex(4096);
        let handle = Bridge::builder(BridgeConfig::default()).start(TransportStream::from_duplex(worker_side));
        drop(host_side);

        let outcome = tokio::time::timeout(Duration::from_secs(1), handle.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, BridgeOutcome::StreamClosed);
    }

    #[tokio::test]
    async fn test_local_shutdown_fails_pending_calls() {
        let (worker_side, _host_side) = tokio::io::duplex(4096);
        let handle = Bridge::builder(BridgeConfig::default()).start(TransportStream::from_duplex(worker_side));

        let peer = handle.peer().clone();
        let call = tokio::spawn(async move {
            peer.request("Ping", Vec::new(), Duration::from_secs(30)).await
        });
        // Let the request reach the queue before shutting down.
        while handle.peer().pending_calls() == 0 {
            tokio::task::yield_now().await;
        }

        handle.shutdown();
        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome, BridgeOutcome::Shutdown);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, crate::error::CallError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_shutdown_trigger_from_another_task() {
        let (worker_side, _host_side) = tokio::io::duplex(4096);
        let handle = Bridge::builder(BridgeConfig::default()).start(TransportStream::from_duplex(worker_side));

        let trigger = handle.shutdown_trigger();
        tokio::spawn(async move { trigger.trigger() });

        let outcome = tokio::time::timeout(Duration::from_secs(1), handle.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, BridgeOutcome::Shutdown);
    }
}
