//! Peer Handle
//!
//! The calling side of a connection. A [`Peer`] issues directed calls,
//! commands and callback invocations to the other process and waits for the
//! correlated reply. Cheap to clone; every clone shares the connection's
//! registries and outbound queue.
//!
//! # Issuing a call
//!
//! 1. Mint a correlation id and register a pending slot
//! 2. Encode the envelope (functions in the arguments are captured under the
//!    same id) and enqueue it
//! 3. Race the reply against the timeout; on timeout the slot is abandoned
//!    so a late reply is dropped by the dispatcher
//!
//! A call that times out or loses its connection also drops the functions
//! its arguments carried.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::capabilities::{CallbackTarget, Capability};
use crate::codec::{CapturedCallbacks, Value};
use crate::config::BridgeConfig;
use crate::error::CallError;
use crate::protocol::{self, CorrelationId, COMMAND_INVOKE, COMMAND_QUIT};
use crate::registry::{CallbackRegistry, PendingCalls, ReplyOutcome};
use crate::transport::OutboundQueue;

/// Handle for calling into the connected peer
#[derive(Debug, Clone)]
pub struct Peer {
    pending: PendingCalls,
    callbacks: Arc<CallbackRegistry>,
    outbound: OutboundQueue,
    config: Arc<BridgeConfig>,
}

impl Peer {
    pub(crate) fn new(
        pending: PendingCalls,
        callbacks: Arc<CallbackRegistry>,
        outbound: OutboundQueue,
        config: Arc<BridgeConfig>,
    ) -> Self {
        Self {
            pending,
            callbacks,
            outbound,
            config,
        }
    }

    /// Connection configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Number of calls still awaiting a reply
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Ask the peer to run one of its capabilities
    ///
    /// The timeout is chosen from the capability's class.
    ///
    /// # Errors
    ///
    /// `Timeout`, `Remote` (peer-reported failure) or `ConnectionClosed`.
    pub async fn call(
        &self,
        target: &CallbackTarget,
        capability: Capability,
        args: Vec<Value>,
    ) -> Result<Value, CallError> {
        let timeout = self.config.timeout_for(capability.timeout_class());
        self.call_with_timeout(target, capability.wire_name(), args, timeout)
            .await
    }

    /// Directed call by wire name with an explicit bound
    ///
    /// # Errors
    ///
    /// `Timeout`, `Remote` (peer-reported failure) or `ConnectionClosed`.
    pub async fn call_with_timeout(
        &self,
        target: &CallbackTarget,
        name: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        let id = CorrelationId::generate();
        let mut captured = CapturedCallbacks::new();
        let frame = protocol::directed_call_frame(&id, target, name, &args, &mut captured);
        self.issue(id, frame, captured, name, timeout).await
    }

    /// Send a named command and wait for its reply
    ///
    /// `fields` are merged into the payload next to `command`.
    ///
    /// # Errors
    ///
    /// `Timeout`, `Remote` (peer-reported failure) or `ConnectionClosed`.
    pub async fn request(
        &self,
        command: &str,
        fields: Vec<(String, Value)>,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        self.request_scoped(command, fields, timeout)
            .await
            .map(|(_, value)| value)
    }

    /// [`request`](Self::request), also returning the request's id
    ///
    /// Functions carried by the reply are addressed by this id when invoked
    /// through [`invoke_callback`](Self::invoke_callback).
    ///
    /// # Errors
    ///
    /// As [`request`](Self::request).
    pub async fn request_scoped(
        &self,
        command: &str,
        fields: Vec<(String, Value)>,
        timeout: Duration,
    ) -> Result<(CorrelationId, Value), CallError> {
        let id = CorrelationId::generate();
        let mut captured = CapturedCallbacks::new();
        let frame = protocol::request_frame(&id, command, fields, &mut captured);
        let value = self
            .issue(id.clone(), frame, captured, command, timeout)
            .await?;
        Ok((id, value))
    }

    /// Invoke a function the peer handed over in its reply to `request_id`
    ///
    /// # Errors
    ///
    /// `Remote` with name `CallbackNotFound` if the peer no longer holds the
    /// function, otherwise as [`request`](Self::request).
    pub async fn invoke_callback(
        &self,
        request_id: &CorrelationId,
        callback_id: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        self.request(
            COMMAND_INVOKE,
            vec![
                ("requestId".into(), request_id.as_str().into()),
                ("callbackId".into(), callback_id.into()),
                ("args".into(), Value::Array(args)),
            ],
            timeout,
        )
        .await
    }

    /// Tell the peer this side is finishing and wait for the acknowledgment
    ///
    /// # Errors
    ///
    /// As [`request`](Self::request).
    pub async fn quit(&self) -> Result<(), CallError> {
        self.request(COMMAND_QUIT, Vec::new(), self.config.call_timeout())
            .await
            .map(|_| ())
    }

    /// Drop the functions this side handed over for a request
    pub fn release_callbacks(&self, request_id: &CorrelationId) -> bool {
        self.callbacks.release(request_id)
    }

    /// Send a reply, registering any functions it carries
    pub(crate) fn send_reply(&self, id: &CorrelationId, outcome: &ReplyOutcome) {
        let mut captured = CapturedCallbacks::new();
        let frame = protocol::reply_frame(id, outcome, &mut captured);
        if !captured.is_empty() {
            tracing::debug!(id = %id, callbacks = captured.len(), "Reply carries callbacks");
        }
        self.callbacks.register(id, captured.into_inner());
        if let Err(e) = self.outbound.enqueue(frame) {
            tracing::debug!(id = %id, error = %e, "Reply dropped, connection closing");
        }
    }

    pub(crate) fn pending(&self) -> &PendingCalls {
        &self.pending
    }

    pub(crate) fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    async fn issue(
        &self,
        id: CorrelationId,
        frame: String,
        captured: CapturedCallbacks,
        operation: &str,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        let rx = self.pending.register(id.clone());
        self.callbacks.register(&id, captured.into_inner());

        if self.outbound.enqueue(frame).is_err() {
            self.pending.abandon(&id);
            self.callbacks.release(&id);
            return Err(CallError::ConnectionClosed);
        }
        tracing::debug!(id = %id, operation, "Call issued");

        self.await_reply(&id, rx, operation, timeout).await
    }

    async fn await_reply(
        &self,
        id: &CorrelationId,
        rx: oneshot::Receiver<ReplyOutcome>,
        operation: &str,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(remote))) => Err(CallError::Remote(remote)),
            Ok(Err(_)) => {
                self.callbacks.release(id);
                Err(CallError::ConnectionClosed)
            }
            Err(_) => {
                self.pending.abandon(id);
                self.callbacks.release(id);
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(id = %id, operation, timeout_ms, "Call timed out");
                Err(CallError::Timeout {
                    operation: operation.to_string(),
                    after: timeout,
                })
            }
        }
    }
}
