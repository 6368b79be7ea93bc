//! Remote Capability Proxy
//!
//! Typed stubs for every capability the host exposes, bound to the request
//! that is being served. Each stub sends one directed call with the
//! capability's timeout and decodes the result strictly: a reply of the wrong
//! shape is a `CallError::Decode`, never coerced.
//!
//! Capabilities without arguments still send `[null]`, one null positional
//! argument, since hosts implement them as single-argument functions.

use crate::capabilities::{CallbackTarget, Capability, CapabilityGroup};
use crate::codec::{FromValue, Value};
use crate::error::CallError;
use crate::peer::Peer;
use crate::protocol::CorrelationId;

/// Username and password returned by a credentials prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Account name
    pub username: String,
    /// Account password
    pub password: String,
}

/// Error details shown to the user by `reportError`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// Short title
    pub title: String,
    /// One-line message
    pub message: String,
    /// Longer detail text
    pub details: String,
}

fn decode_result<T: FromValue>(capability: Capability, value: &Value) -> Result<T, CallError> {
    value.decode().map_err(|source| CallError::Decode {
        operation: capability.wire_name().to_string(),
        source,
    })
}

/// Capabilities from the `context` group
#[derive(Debug, Clone)]
pub struct ContextProxy {
    peer: Peer,
    target: CallbackTarget,
}

impl ContextProxy {
    async fn invoke(&self, capability: Capability, args: Vec<Value>) -> Result<Value, CallError> {
        self.peer.call(&self.target, capability, args).await
    }

    /// `getSteamId`
    ///
    /// # Errors
    ///
    /// Call failure or a non-string result.
    pub async fn get_steam_id(&self) -> Result<String, CallError> {
        let value = self.invoke(Capability::GetSteamId, vec![Value::Null]).await?;
        decode_result(Capability::GetSteamId, &value)
    }

    /// `getExistingDataFile`: contents of a file the host already has
    ///
    /// # Errors
    ///
    /// Call failure or a result that is not a buffer.
    pub async fn get_existing_data_file(&self, path: &str) -> Result<Vec<u8>, CallError> {
        let value = self
            .invoke(Capability::GetExistingDataFile, vec![path.into()])
            .await?;
        value.into_bytes().map_err(|source| CallError::Decode {
            operation: Capability::GetExistingDataFile.wire_name().to_string(),
            source,
        })
    }

    /// `getExistingDataFileList`
    ///
    /// # Errors
    ///
    /// Call failure or a result that is not a list of strings.
    pub async fn get_existing_data_file_list(
        &self,
        folder: &str,
        filter: &str,
        recursive: bool,
    ) -> Result<Vec<String>, CallError> {
        let value = self
            .invoke(
                Capability::GetExistingDataFileList,
                vec![folder.into(), filter.into(), recursive.into()],
            )
            .await?;
        decode_result(Capability::GetExistingDataFileList, &value)
    }

    /// `getGameFileList`: files making up the installed game
    ///
    /// # Errors
    ///
    /// Call failure or a result that is not a list of strings.
    pub async fn get_game_file_list(&self) -> Result<Vec<String>, CallError> {
        let value = self.invoke(Capability::GetGameFileList, Vec::new()).await?;
        decode_result(Capability::GetGameFileList, &value)
    }

    /// `getGameExecutable`
    ///
    /// # Errors
    ///
    /// Call failure or a non-string result.
    pub async fn get_game_executable(&self) -> Result<String, CallError> {
        let value = self
            .invoke(Capability::GetGameExecutable, vec![Value::Null])
            .await?;
        decode_result(Capability::GetGameExecutable, &value)
    }

    /// `getDepotIds`
    ///
    /// # Errors
    ///
    /// Call failure or a result that is not a list of u32.
    pub async fn get_depot_ids(&self) -> Result<Vec<u32>, CallError> {
        let value = self.invoke(Capability::GetDepotIds, vec![Value::Null]).await?;
        decode_result(Capability::GetDepotIds, &value)
    }
}

/// Capabilities from the `ui` group
#[derive(Debug, Clone)]
pub struct UiProxy {
    peer: Peer,
    target: CallbackTarget,
}

impl UiProxy {
    async fn invoke(&self, capability: Capability, args: Vec<Value>) -> Result<Value, CallError> {
        self.peer.call(&self.target, capability, args).await
    }

    async fn notify(&self, capability: Capability, args: Vec<Value>) -> Result<(), CallError> {
        self.invoke(capability, args).await.map(|_| ())
    }

    /// `reportError`
    ///
    /// # Errors
    ///
    /// Call failure; the result itself is ignored.
    pub async fn report_error(&self, report: &ErrorReport) -> Result<(), CallError> {
        let arg = Value::object([
            ("title", Value::from(report.title.as_str())),
            ("message", Value::from(report.message.as_str())),
            ("details", Value::from(report.details.as_str())),
        ]);
        self.notify(Capability::ReportError, vec![arg]).await
    }

    /// `requestCredentials`: prompt for username and password
    ///
    /// # Errors
    ///
    /// Call failure, or a result other than exactly `[username, password]`.
    pub async fn request_credentials(&self, retry: bool) -> Result<Credentials, CallError> {
        let value = self
            .invoke(Capability::RequestCredentials, vec![retry.into()])
            .await?;
        let mut pair: Vec<String> = decode_result(Capability::RequestCredentials, &value)?;
        if pair.len() != 2 {
            return Err(CallError::Decode {
                operation: Capability::RequestCredentials.wire_name().to_string(),
                source: crate::codec::DecodeError::Length {
                    expected: 2,
                    found: pair.len(),
                },
            });
        }
        let password = pair.remove(1);
        let username = pair.remove(0);
        Ok(Credentials { username, password })
    }

    /// `requestSteamGuard`: prompt for an emailed guard code
    ///
    /// # Errors
    ///
    /// Call failure or a non-string result.
    pub async fn request_steam_guard(&self) -> Result<String, CallError> {
        let value = self
            .invoke(Capability::RequestSteamGuard, vec![Value::Null])
            .await?;
        decode_result(Capability::RequestSteamGuard, &value)
    }

    /// `request2FA`: prompt for an authenticator code
    ///
    /// # Errors
    ///
    /// Call failure or a non-string result.
    pub async fn request_2fa(&self) -> Result<String, CallError> {
        let value = self.invoke(Capability::Request2Fa, vec![Value::Null]).await?;
        decode_result(Capability::Request2Fa, &value)
    }

    /// `reportMismatch`: show files that failed verification
    ///
    /// Returns the files the user chose to act on.
    ///
    /// # Errors
    ///
    /// Call failure or a result that is not a list of strings.
    pub async fn report_mismatch(&self, files: &[String]) -> Result<Vec<String>, CallError> {
        let files = Value::Array(files.iter().map(|f| Value::from(f.as_str())).collect());
        let value = self.invoke(Capability::ReportMismatch, vec![files]).await?;
        decode_result(Capability::ReportMismatch, &value)
    }

    /// `isVerifyingFiles`: tell the host verification has started
    ///
    /// # Errors
    ///
    /// Call failure; the result itself is ignored.
    pub async fn is_verifying_files(&self) -> Result<(), CallError> {
        self.notify(Capability::IsVerifyingFiles, vec![Value::Null])
            .await
    }

    /// `timedOut`: tell the host an operation timed out
    ///
    /// # Errors
    ///
    /// Call failure; the result itself is ignored.
    pub async fn timed_out(&self, operation: u32) -> Result<(), CallError> {
        self.notify(Capability::TimedOut, vec![operation.into()])
            .await
    }

    /// `ratelimitExceeded`
    ///
    /// # Errors
    ///
    /// Call failure; the result itself is ignored.
    pub async fn rate_limit_exceeded(&self) -> Result<(), CallError> {
        self.notify(Capability::RateLimitExceeded, vec![Value::Null])
            .await
    }
}

/// Both capability groups bound to one request
#[derive(Debug, Clone)]
pub struct CapabilityProxy {
    /// `context` group
    pub context: ContextProxy,
    /// `ui` group
    pub ui: UiProxy,
    request_id: CorrelationId,
}

impl CapabilityProxy {
    /// Bind the host's capabilities to the request being served
    pub fn new(peer: Peer, request_id: CorrelationId) -> Self {
        let context_id = request_id.as_str().to_string();
        Self {
            context: ContextProxy {
                peer: peer.clone(),
                target: CallbackTarget::new(context_id.clone(), CapabilityGroup::Context),
            },
            ui: UiProxy {
                peer,
                target: CallbackTarget::new(context_id, CapabilityGroup::Ui),
            },
            request_id,
        }
    }

    /// Request the proxy is bound to
    pub fn request_id(&self) -> &CorrelationId {
        &self.request_id
    }
}
