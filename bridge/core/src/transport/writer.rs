//! Outbound Queue and Frame Writer
//!
//! Every producer (dispatch tasks, capability proxies) enqueues finished JSON
//! text without blocking; a single writer task drains the queue in order and
//! serializes each frame onto the transport.

use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

use super::frame::encode_frame;
use super::TransportError;

/// Producer side of the outbound queue
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<String>,
}

impl OutboundQueue {
    /// Create a queue and the receiver the writer drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue one frame payload
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionClosed` once the writer has stopped.
    pub fn enqueue(&self, payload: String) -> Result<(), TransportError> {
        self.tx
            .send(payload)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Check whether the writer has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Single consumer serializing frames onto the transport
pub struct FrameWriter<W> {
    writer: W,
    rx: mpsc::UnboundedReceiver<String>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Create a writer over the transport's writable half
    pub fn new(writer: W, rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self { writer, rx }
    }

    /// Drain the queue until shutdown or until every producer is gone
    ///
    /// On shutdown the queue is closed, frames already enqueued are still
    /// written, and the writable half is shut down. A write failure flips the
    /// shared shutdown signal so the reader stops too.
    ///
    /// # Errors
    ///
    /// Returns the first write failure.
    pub async fn run(
        mut self,
        shutdown_tx: Arc<watch::Sender<bool>>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        let result = self.pump(&mut shutdown_rx).await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Frame writer failed");
            shutdown_tx.send_replace(true);
        }
        result
    }

    async fn pump(&mut self, shutdown_rx: &mut watch::Receiver<bool>) -> Result<(), TransportError> {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                frame = self.rx.recv() => match frame {
                    Some(payload) => self.write_frame(&payload).await?,
                    None => break,
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.rx.close();
        while let Some(payload) = self.rx.recv().await {
            self.write_frame(&payload).await?;
        }
        self.writer.shutdown().await?;
        tracing::debug!("Frame writer drained");
        Ok(())
    }

    async fn write_frame(&mut self, payload: &str) -> Result<(), TransportError> {
        let frame = encode_frame(payload);
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        tracing::trace!(bytes = frame.len(), "Frame written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::frame::FrameDecoder;
    use tokio::io::AsyncReadExt;

    fn shutdown_pair() -> (Arc<watch::Sender<bool>>, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Arc::new(tx), rx)
    }

    #[tokio::test]
    async fn test_writes_frames_in_order() {
        let (queue, rx) = OutboundQueue::channel();
        let (client, mut server) = tokio::io::duplex(1024);
        let (shutdown_tx, shutdown_rx) = shutdown_pair();

        queue.enqueue("one".into()).unwrap();
        queue.enqueue("two".into()).unwrap();
        drop(queue);

        FrameWriter::new(client, rx)
            .run(shutdown_tx, shutdown_rx)
            .await
            .unwrap();

        let mut bytes = Vec::new();
        server.read_to_end(&mut bytes).await.unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        assert_eq!(decoder.decode(), Some(b"one".to_vec()));
        assert_eq!(decoder.decode(), Some(b"two".to_vec()));
        assert_eq!(decoder.decode(), None);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue_and_closes() {
        let (queue, rx) = OutboundQueue::channel();
        let (client, mut server) = tokio::io::duplex(1024);
        let (shutdown_tx, shutdown_rx) = shutdown_pair();

        queue.enqueue("last words".into()).unwrap();
        shutdown_tx.send_replace(true);

        FrameWriter::new(client, rx)
            .run(shutdown_tx.clone(), shutdown_rx)
            .await
            .unwrap();

        assert!(queue.is_closed());
        assert!(matches!(
            queue.enqueue("too late".into()),
            Err(TransportError::ConnectionClosed)
        ));

        let mut bytes = Vec::new();
        server.read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes, encode_frame("last words"));
    }

    #[tokio::test]
    async fn test_write_failure_signals_shutdown() {
        let (queue, rx) = OutboundQueue::channel();
        let (client, server) = tokio::io::duplex(16);
        drop(server);
        let (shutdown_tx, shutdown_rx) = shutdown_pair();
        let mut observer = shutdown_tx.subscribe();

        queue.enqueue("nobody is listening".into()).unwrap();

        let result = FrameWriter::new(client, rx)
            .run(shutdown_tx, shutdown_rx)
            .await;

        assert!(matches!(result, Err(TransportError::Io(_))));
        assert!(*observer.borrow_and_update());
    }
}
