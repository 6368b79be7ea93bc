//! Correlation and Callback Registries
//!
//! Connection-scoped bookkeeping for the two directions of call-back:
//!
//! - [`PendingCalls`]: calls this side issued that await a reply. A slot is
//!   removed before it is resolved, so a reply is delivered at most once and
//!   a duplicate or late reply finds nothing.
//! - [`CallbackRegistry`]: functions this side handed to the peer inside a
//!   reply, grouped per request id so the peer can `Invoke` them later.
//!   Retention is bounded; the oldest scope is evicted first.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::codec::{Callback, Value};
use crate::error::RemoteError;
use crate::protocol::CorrelationId;

/// Outcome delivered to a waiting caller
pub type ReplyOutcome = Result<Value, RemoteError>;

/// Calls awaiting a reply
#[derive(Debug, Clone, Default)]
pub struct PendingCalls {
    slots: Arc<DashMap<CorrelationId, oneshot::Sender<ReplyOutcome>>>,
}

impl PendingCalls {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call and get the receiver its reply will arrive on
    pub fn register(&self, id: CorrelationId) -> oneshot::Receiver<ReplyOutcome> {
        let (tx, rx) = oneshot::channel();
        if self.slots.insert(id.clone(), tx).is_some() {
            tracing::warn!(id = %id, "Replaced pending call with duplicate id");
        }
        rx
    }

    /// Resolve a pending call
    ///
    /// Returns false if no call with this id is pending (unknown, already
    /// resolved, or abandoned).
    pub fn resolve(&self, id: &CorrelationId, outcome: ReplyOutcome) -> bool {
        match self.slots.remove(id) {
            Some((_, slot)) => {
                if slot.send(outcome).is_err() {
                    tracing::debug!(id = %id, "Reply arrived after caller stopped waiting");
                }
                true
            }
            None => false,
        }
    }

    /// Remove a call without resolving it (timeout)
    pub fn abandon(&self, id: &CorrelationId) -> bool {
        self.slots.remove(id).is_some()
    }

    /// Check whether a call is pending
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.slots.contains_key(id)
    }

    /// Number of pending calls
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every pending slot; waiting callers observe a closed connection
    pub fn close_all(&self) -> usize {
        let count = self.slots.len();
        self.slots.clear();
        count
    }
}

#[derive(Default)]
struct Scopes {
    by_request: HashMap<CorrelationId, HashMap<String, Callback>>,
    order: VecDeque<CorrelationId>,
}

/// Functions handed to the peer, by request id and placeholder id
pub struct CallbackRegistry {
    scopes: Mutex<Scopes>,
    limit: usize,
}

impl CallbackRegistry {
    /// Create a registry retaining at most `limit` request scopes
    pub fn new(limit: usize) -> Self {
        Self {
            scopes: Mutex::new(Scopes::default()),
            limit: limit.max(1),
        }
    }

    /// Store the functions captured for one request
    ///
    /// Empty sets are not stored. Registering into an existing scope adds to
    /// it.
    pub fn register(&self, request_id: &CorrelationId, callbacks: HashMap<String, Callback>) {
        if callbacks.is_empty() {
            return;
        }

        let mut scopes = self.scopes.lock();
        match scopes.by_request.get_mut(request_id) {
            Some(existing) => existing.extend(callbacks),
            None => {
                scopes.by_request.insert(request_id.clone(), callbacks);
                scopes.order.push_back(request_id.clone());
            }
        }

        while scopes.by_request.len() > self.limit {
            let Some(oldest) = scopes.order.pop_front() else {
                break;
            };
            if scopes.by_request.remove(&oldest).is_some() {
                tracing::debug!(request_id = %oldest, "Evicted oldest callback scope");
            }
        }
    }

    /// Find a function by request and placeholder id
    pub fn lookup(&self, request_id: &CorrelationId, callback_id: &str) -> Option<Callback> {
        self.scopes
            .lock()
            .by_request
            .get(request_id)
            .and_then(|scope| scope.get(callback_id))
            .cloned()
    }

    /// Drop every function registered for a request
    pub fn release(&self, request_id: &CorrelationId) -> bool {
        let mut scopes = self.scopes.lock();
        let removed = scopes.by_request.remove(request_id).is_some();
        if removed {
            scopes.order.retain(|id| id != request_id);
        }
        removed
    }

    /// Number of retained scopes
    pub fn scope_count(&self) -> usize {
        self.scopes.lock().by_request.len()
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("scopes", &self.scope_count())
            .field("limit", &self.limit)
            .finish()
    }
}
