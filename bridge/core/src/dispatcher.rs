//! Dispatcher
//!
//! Classifies each inbound frame and routes it:
//!
//! 1. Reply to a pending call → resolve it, with a failure if its data
//!    cannot be decoded (unknown or settled ids are dropped, never answered)
//! 2. Directed call → local capability table
//! 3. `Invoke` → registered callback
//! 4. Domain command → command table, with a proxy bound to the request
//! 5. `Quit` → acknowledged with `""`
//! 6. Legacy `Reply` → resolve `request.id`, acknowledged with null
//! 7. Anything else → `""`
//!
//! Replies are resolved inline on the reader task. Everything that produces
//! a reply runs on its own task, so a slow request never holds up the
//! others.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::capabilities::CapabilityTable;
use crate::commands::CommandTable;
use crate::codec::Value;
use crate::error::CallError;
use crate::peer::Peer;
use crate::protocol::{self, Command, CorrelationId, FrameDecodeError, Inbound};
use crate::proxy::CapabilityProxy;
use crate::registry::ReplyOutcome;

/// Routes inbound frames for one connection
#[derive(Debug)]
pub struct Dispatcher {
    peer: Peer,
    commands: CommandTable,
    capabilities: CapabilityTable,
    quit_received: AtomicBool,
}

impl Dispatcher {
    /// Create a dispatcher replying through `peer`
    pub fn new(peer: Peer, commands: CommandTable, capabilities: CapabilityTable) -> Self {
        Self {
            peer,
            commands,
            capabilities,
            quit_received: AtomicBool::new(false),
        }
    }

    /// Check whether the peer announced it is finishing
    pub fn quit_received(&self) -> bool {
        self.quit_received.load(Ordering::Acquire)
    }

    /// Handle one frame
    ///
    /// Must be called from within a tokio runtime; request handling is
    /// spawned.
    pub fn dispatch(self: &Arc<Self>, frame: &[u8]) {
        match protocol::parse_frame(frame) {
            Err(e) => self.reject(&e),

            Ok(Inbound::Reply { id, outcome }) => {
                if self.peer.pending().resolve(&id, outcome) {
                    tracing::trace!(id = %id, "Reply resolved");
                } else {
                    tracing::debug!(id = %id, "Dropping reply for unknown or settled call");
                }
            }

            Ok(Inbound::DirectedCall {
                id,
                target,
                name,
                args,
            }) => {
                tracing::debug!(id = %id, group = %target.group, capability = %name, "Directed call");
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    let outcome = this.capabilities.dispatch(&target, &name, args).await;
                    if let Err(e) = &outcome {
                        tracing::debug!(id = %id, capability = %name, error = %e, "Directed call failed");
                    }
                    this.peer.send_reply(&id, &outcome);
                });
            }

            Ok(Inbound::Request { id, command }) => {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    let outcome = this.execute(&id, command).await;
                    this.peer.send_reply(&id, &outcome);
                });
            }
        }
    }

    fn reject(&self, err: &FrameDecodeError) {
        match err.reply_id() {
            Some(id) => {
                tracing::warn!(id = %id, error = %err, "Rejecting malformed frame");
                self.peer.send_reply(&id, &Err(err.to_remote()));
            }
            None => tracing::warn!(error = %err, "Dropping frame without usable id"),
        }
    }

    async fn execute(&self, id: &CorrelationId, command: Command) -> ReplyOutcome {
        match command {
            Command::Invoke {
                request_id,
                callback_id,
                args,
            } => match self.peer.callbacks().lookup(&request_id, &callback_id) {
                Some(callback) => {
                    tracing::debug!(id = %id, request_id = %request_id, callback_id = %callback_id, "Invoking callback");
                    callback.invoke(args).await
                }
                None => {
                    tracing::warn!(request_id = %request_id, callback_id = %callback_id, "Invoke of unknown callback");
                    Err(CallError::CallbackNotFound {
                        request_id: request_id.to_string(),
                        callback_id,
                    }
                    .into())
                }
            },

            Command::Quit => {
                tracing::info!(id = %id, "Peer requested quit");
                self.quit_received.store(true, Ordering::Release);
                Ok(Value::from(""))
            }

            Command::Reply {
                request_id,
                outcome,
            } => {
                if !self.peer.pending().resolve(&request_id, outcome) {
                    tracing::debug!(request_id = %request_id, "Legacy reply for unknown or settled call");
                }
                Ok(Value::Null)
            }

            Command::Named { name, payload } => match self.commands.get(&name) {
                Some(handler) => {
                    tracing::debug!(id = %id, command = %name, "Dispatching command");
                    let proxy = CapabilityProxy::new(self.peer.clone(), id.clone());
                    let outcome = handler.handle(payload, proxy).await;
                    if let Err(e) = &outcome {
                        tracing::warn!(id = %id, command = %name, error = %e, "Command failed");
                    }
                    outcome
                }
                None => {
                    tracing::debug!(id = %id, command = %name, "Unrecognized command");
                    Ok(Value::from(""))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::codec::Callback;
    use crate::commands::CommandHandler;
    use crate::config::BridgeConfig;
    use crate::error::RemoteError;
    use crate::registry::{CallbackRegistry, PendingCalls};
    use crate::transport::OutboundQueue;

    struct Echo;

    #[async_trait]
    impl CommandHandler for Echo {
        async fn handle(&self, payload: Value, proxy: CapabilityProxy) -> Result<Value, RemoteError> {
            Ok(Value::object([
                ("request", Value::from(proxy.request_id().as_str())),
                ("appId", payload.get("AppId").cloned().unwrap_or_default()),
            ]))
        }
    }

    fn dispatcher() -> (Arc<Dispatcher>, Peer, mpsc::UnboundedReceiver<String>) {
        let (queue, rx) = OutboundQueue::channel();
        let peer = Peer::new(
            PendingCalls::new(),
            Arc::new(CallbackRegistry::new(16)),
            queue,
            Arc::new(BridgeConfig::default()),
        );
        let mut commands = CommandTable::new();
        commands.register("Echo", Arc::new(Echo));
        let dispatcher = Dispatcher::new(peer.clone(), commands, CapabilityTable::new());
        (Arc::new(dispatcher), peer, rx)
    }

    async fn next_reply(rx: &mut mpsc::UnboundedReceiver<String>) -> serde_json::Value {
        serde_json::from_str(&rx.recv().await.unwrap()).unwrap()
    }

    fn send(dispatcher: &Arc<Dispatcher>, frame: serde_json::Value) {
        dispatcher.dispatch(frame.to_string().as_bytes());
    }

    #[tokio::test]
    async fn test_quit_acknowledged_with_empty_string() {
        let (dispatcher, _peer, mut rx) = dispatcher();
        send(&dispatcher, json!({"id": "q", "payload": {"command": "Quit"}}));

        assert_eq!(next_reply(&mut rx).await, json!({"id": "q", "data": ""}));
        assert!(dispatcher.quit_received());
    }

    #[tokio::test]
    async fn test_unrecognized_command_answered_permissively() {
        let (dispatcher, _peer, mut rx) = dispatcher();
        send(&dispatcher, json!({"id": "u", "payload": {"command": "Frobnicate"}}));

        assert_eq!(next_reply(&mut rx).await, json!({"id": "u", "data": ""}));
    }

    #[tokio::test]
    async fn test_named_command_gets_bound_proxy() {
        let (dispatcher, _peer, mut rx) = dispatcher();
        send(&dispatcher, json!({"id": "e1", "payload": {"command": "Echo", "AppId": "440"}}));

        assert_eq!(
            next_reply(&mut rx).await,
            json!({"id": "e1", "data": {"request": "e1", "appId": "440"}})
        );
    }

    #[tokio::test]
    async fn test_reply_resolves_pending_call_once() {
        let (dispatcher, peer, mut rx) = dispatcher();
        let slot = peer.pending().register("call-1".into());

        send(&dispatcher, json!({"id": "call-1", "data": 42}));
        send(&dispatcher, json!({"id": "call-1", "data": 43}));

        assert_eq!(slot.await.unwrap(), Ok(Value::from(42u32)));
        // Neither reply produces outbound traffic.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_undecodable_reply_fails_pending_call_without_answer() {
        let (dispatcher, peer, mut rx) = dispatcher();
        let slot = peer.pending().register("call-9".into());

        send(&dispatcher, json!({"id": "call-9", "data": {"type": "Buffer", "data": "@@@"}}));

        let err = slot.await.unwrap().unwrap_err();
        assert_eq!(err.name, "DecodeError");
        assert!(!peer.pending().contains(&"call-9".into()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_empty_reply_fails_pending_call() {
        let (dispatcher, peer, mut rx) = dispatcher();
        let slot = peer.pending().register("call-3".into());

        send(&dispatcher, json!({"id": "call-3"}));

        assert_eq!(slot.await.unwrap().unwrap_err().name, "ProtocolError");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_legacy_reply_command() {
        let (dispatcher, peer, mut rx) = dispatcher();
        let slot = peer.pending().register("call-2".into());

        send(
            &dispatcher,
            json!({"id": "x", "payload": {"command": "Reply", "request": {"id": "call-2"}, "error": {"name": "Error", "message": "nope"}}}),
        );

        assert_eq!(next_reply(&mut rx).await, json!({"id": "x", "data": null}));
        assert_eq!(slot.await.unwrap(), Err(RemoteError::new("Error", "nope")));
    }

    #[tokio::test]
    async fn test_invoke_calls_registered_callback_exactly_once() {
        let (dispatcher, peer, mut rx) = dispatcher();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let callback = Callback::variadic(move |args| {
            seen.fetch_add(1, Ordering::SeqCst);
            async move { Ok(Value::Array(args)) }
        });
        peer.send_reply(&"r1".into(), &Ok(callback.into()));
        let placeholder = next_reply(&mut rx).await["data"]["__callback"]
            .as_str()
            .unwrap()
            .to_string();

        send(
            &dispatcher,
            json!({"id": "i1", "payload": {"command": "Invoke", "requestId": "r1", "callbackId": placeholder, "args": ["a", "b"]}}),
        );

        assert_eq!(next_reply(&mut rx).await, json!({"id": "i1", "data": ["a", "b"]}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invoke_unknown_callback_is_error_reply() {
        let (dispatcher, _peer, mut rx) = dispatcher();
        send(
            &dispatcher,
            json!({"id": "i2", "payload": {"command": "Invoke", "requestId": "r0", "callbackId": "gone", "args": []}}),
        );

        let reply = next_reply(&mut rx).await;
        assert_eq!(reply["id"], json!("i2"));
        assert_eq!(reply["error"]["name"], json!("CallbackNotFound"));
        assert!(reply["error"]["message"].as_str().unwrap().contains("gone"));
    }

    #[tokio::test]
    async fn test_directed_call_without_handler() {
        let (dispatcher, _peer, mut rx) = dispatcher();
        send(
            &dispatcher,
            json!({"id": "d1", "callback": {"id": "ctx", "type": "ui"}, "data": {"name": "request2FA", "args": [null]}}),
        );

        let reply = next_reply(&mut rx).await;
        assert_eq!(reply["error"]["name"], json!("CapabilityNotExposed"));
    }

    #[tokio::test]
    async fn test_not_json_answered_under_parseerror() {
        let (dispatcher, _peer, mut rx) = dispatcher();
        dispatcher.dispatch(b"{not json");

        let reply = next_reply(&mut rx).await;
        assert_eq!(reply["id"], json!("parseerror"));
        assert_eq!(reply["error"]["name"], json!("ParseError"));
    }

    #[tokio::test]
    async fn test_frame_without_id_dropped_and_loop_continues() {
        let (dispatcher, _peer, mut rx) = dispatcher();
        send(&dispatcher, json!({"payload": {"command": "Quit"}}));
        send(&dispatcher, json!({"id": "after", "payload": {"command": "Quit"}}));

        assert_eq!(next_reply(&mut rx).await, json!({"id": "after", "data": ""}));
    }

    #[tokio::test]
    async fn test_missing_command_answered_under_id() {
        let (dispatcher, _peer, mut rx) = dispatcher();
        send(&dispatcher, json!({"id": "m", "payload": {"AppId": "440"}}));

        let reply = next_reply(&mut rx).await;
        assert_eq!(reply["id"], json!("m"));
        assert_eq!(reply["error"]["name"], json!("ParseError"));
    }
}
