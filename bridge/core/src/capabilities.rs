//! Capability Catalogue
//!
//! The closed set of operations each side may ask the other to perform,
//! grouped as `context` (data about the game installation) and `ui`
//! (interaction with the user). Directed calls name a capability by its wire
//! name; anything outside the catalogue is rejected before it reaches a
//! handler.
//!
//! The receiving side registers one [`CapabilityHandler`] per capability in
//! a [`CapabilityTable`]; the calling side uses the typed stubs in
//! [`crate::proxy`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::codec::Value;
use crate::error::RemoteError;

/// Named set of capabilities one side exposes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityGroup {
    /// Game and installation data
    Context,
    /// User interaction
    Ui,
}

impl CapabilityGroup {
    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Context => "context",
            Self::Ui => "ui",
        }
    }
}

impl fmt::Display for CapabilityGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which configured bound applies to a capability
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeoutClass {
    /// Answered by the host without user involvement
    Short,
    /// Waits on the user
    Interactive,
}

/// Every capability in the catalogue
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Capability {
    // context
    GetSteamId,
    GetExistingDataFile,
    GetExistingDataFileList,
    GetGameFileList,
    GetGameExecutable,
    GetDepotIds,
    // ui
    ReportError,
    RequestCredentials,
    RequestSteamGuard,
    Request2Fa,
    ReportMismatch,
    IsVerifyingFiles,
    TimedOut,
    RateLimitExceeded,
}

impl Capability {
    /// The whole catalogue
    pub const ALL: [Capability; 14] = [
        Self::GetSteamId,
        Self::GetExistingDataFile,
        Self::GetExistingDataFileList,
        Self::GetGameFileList,
        Self::GetGameExecutable,
        Self::GetDepotIds,
        Self::ReportError,
        Self::RequestCredentials,
        Self::RequestSteamGuard,
        Self::Request2Fa,
        Self::ReportMismatch,
        Self::IsVerifyingFiles,
        Self::TimedOut,
        Self::RateLimitExceeded,
    ];

    /// Group the capability belongs to
    pub fn group(self) -> CapabilityGroup {
        match self {
            Self::GetSteamId
            | Self::GetExistingDataFile
            | Self::GetExistingDataFileList
            | Self::GetGameFileList
            | Self::GetGameExecutable
            | Self::GetDepotIds => CapabilityGroup::Context,
            _ => CapabilityGroup::Ui,
        }
    }

    /// Name used in directed calls
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::GetSteamId => "getSteamId",
            Self::GetExistingDataFile => "getExistingDataFile",
            Self::GetExistingDataFileList => "getExistingDataFileList",
            Self::GetGameFileList => "getGameFileList",
            Self::GetGameExecutable => "getGameExecutable",
            Self::GetDepotIds => "getDepotIds",
            Self::ReportError => "reportError",
            Self::RequestCredentials => "requestCredentials",
            Self::RequestSteamGuard => "requestSteamGuard",
            Self::Request2Fa => "request2FA",
            Self::ReportMismatch => "reportMismatch",
            Self::IsVerifyingFiles => "isVerifyingFiles",
            Self::TimedOut => "timedOut",
            Self::RateLimitExceeded => "ratelimitExceeded",
        }
    }

    /// Prompts that wait on the user get the interactive bound
    pub fn timeout_class(self) -> TimeoutClass {
        match self {
            Self::RequestCredentials
            | Self::RequestSteamGuard
            | Self::Request2Fa
            | Self::ReportMismatch => TimeoutClass::Interactive,
            _ => TimeoutClass::Short,
        }
    }

    /// Look up a capability by group and wire name
    pub fn from_wire(group: CapabilityGroup, name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.group() == group && c.wire_name() == name)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group(), self.wire_name())
    }
}

/// Addressee of a directed call: a context id within a group
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackTarget {
    /// Context the capability is bound to (the originating request id)
    #[serde(rename = "id")]
    pub context_id: String,
    /// Capability group
    #[serde(rename = "type")]
    pub group: CapabilityGroup,
}

impl CallbackTarget {
    /// Create a target
    pub fn new(context_id: impl Into<String>, group: CapabilityGroup) -> Self {
        Self {
            context_id: context_id.into(),
            group,
        }
    }
}

/// One directed call as seen by a handler
#[derive(Clone, Debug)]
pub struct CapabilityCall {
    /// Context the call is addressed to
    pub context_id: String,
    /// Capability requested
    pub capability: Capability,
    /// Positional arguments
    pub args: Vec<Value>,
}

impl CapabilityCall {
    /// First positional argument, or null
    pub fn first_arg(&self) -> &Value {
        static NULL: Value = Value::Null;
        self.args.first().unwrap_or(&NULL)
    }
}

/// Local implementation of one capability
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// Perform the call
    async fn handle(&self, call: CapabilityCall) -> Result<Value, RemoteError>;
}

#[async_trait]
impl<F, Fut> CapabilityHandler for F
where
    F: Fn(CapabilityCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, RemoteError>> + Send + 'static,
{
    async fn handle(&self, call: CapabilityCall) -> Result<Value, RemoteError> {
        (self)(call).await
    }
}

/// Capabilities this side exposes to directed calls
#[derive(Clone, Default)]
pub struct CapabilityTable {
    handlers: HashMap<Capability, Arc<dyn CapabilityHandler>>,
}

impl CapabilityTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one
    pub fn register(&mut self, capability: Capability, handler: impl CapabilityHandler + 'static) {
        self.handlers.insert(capability, Arc::new(handler));
    }

    /// Builder-style [`register`](Self::register)
    #[must_use]
    pub fn with(mut self, capability: Capability, handler: impl CapabilityHandler + 'static) -> Self {
        self.register(capability, handler);
        self
    }

    /// Check whether a capability is exposed
    pub fn exposes(&self, capability: Capability) -> bool {
        self.handlers.contains_key(&capability)
    }

    /// Route a directed call to its handler
    ///
    /// # Errors
    ///
    /// `UnknownCapability` when `name` is not in the group's catalogue,
    /// `CapabilityNotExposed` when nothing is registered for it, otherwise
    /// whatever the handler returns.
    pub async fn dispatch(
        &self,
        target: &CallbackTarget,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, RemoteError> {
        let capability = Capability::from_wire(target.group, name).ok_or_else(|| {
            RemoteError::new(
                "UnknownCapability",
                format!("'{name}' is not a {} capability", target.group),
            )
        })?;

        let handler = self.handlers.get(&capability).ok_or_else(|| {
            RemoteError::new(
                "CapabilityNotExposed",
                format!("{capability} is not exposed by this side"),
            )
        })?;

        handler
            .handle(CapabilityCall {
                context_id: target.context_id.clone(),
                capability,
                args,
            })
            .await
    }
}

impl fmt::Debug for CapabilityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityTable")
            .field("exposed", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
