//! Domain Commands
//!
//! Named commands the host sends to the worker, other than the protocol
//! commands (`Invoke`, `Quit`, `Reply`) the dispatcher handles itself.
//!
//! The one domain command the worker serves is `VerifyFiles`: it resolves
//! the request's parameters and hands them, together with a capability proxy
//! bound to the request, to an [`IntegrityVerifier`] collaborator.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::codec::{DecodeError, Value};
use crate::error::{CallError, RemoteError};
use crate::proxy::CapabilityProxy;

/// Name of the file verification command
pub const COMMAND_VERIFY_FILES: &str = "VerifyFiles";

/// Handler for one named command
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Serve the command
    ///
    /// `payload` is the request payload including the `command` field.
    async fn handle(&self, payload: Value, proxy: CapabilityProxy) -> Result<Value, RemoteError>;
}

/// Handlers by command name
#[derive(Clone, Default)]
pub struct CommandTable {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Look up a handler
    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(name).cloned()
    }
}

impl fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandTable")
            .field("commands", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Parameters of a `VerifyFiles` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyParameters {
    /// Account name
    pub username: Option<String>,
    /// Account password
    pub password: Option<String>,
    /// Persist the login
    pub remember_password: bool,
    /// Only fetch manifests
    pub manifest_only: bool,
    /// Content server cell
    pub cell_id: i32,
    /// Newline-separated files to check; `regex:` lines are patterns
    pub file_list: Option<String>,
    /// Game installation directory
    pub install_directory: Option<String>,
    /// Verify every file rather than only the listed ones
    pub verify_all: bool,
    /// Content server fan-out
    pub max_servers: u32,
    /// Concurrent chunk downloads
    pub max_downloads: u32,
    /// Login session discriminator
    pub login_id: Option<u32>,
    /// Application id
    pub app_id: Option<String>,
    /// Published file id (`u64::MAX` = none)
    pub pub_file: u64,
    /// UGC id (`u64::MAX` = none)
    pub ugc_id: u64,
    /// Branch name
    pub branch: Option<String>,
    /// Password for a protected branch
    pub beta_branch_password: Option<String>,
    /// Depots to verify
    pub depot_ids: Vec<u32>,
    /// Manifest per depot, same order as `depot_ids`
    pub manifest_ids: Vec<u64>,
}

impl Default for VerifyParameters {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            remember_password: false,
            manifest_only: false,
            cell_id: i32::MAX,
            file_list: None,
            install_directory: None,
            verify_all: false,
            max_servers: 20,
            max_downloads: 8,
            login_id: None,
            app_id: None,
            pub_file: u64::MAX,
            ugc_id: u64::MAX,
            branch: None,
            beta_branch_password: None,
            depot_ids: Vec::new(),
            manifest_ids: Vec::new(),
        }
    }
}

impl VerifyParameters {
    /// Decode from a request payload; absent fields keep their defaults
    ///
    /// # Errors
    ///
    /// Returns a `DecodeError` naming the first malformed field.
    pub fn from_payload(payload: &Value) -> Result<Self, DecodeError> {
        let d = Self::default();
        Ok(Self {
            username: payload.field("Username")?,
            password: payload.field("Password")?,
            remember_password: payload.field_or("RememberPassword", d.remember_password)?,
            manifest_only: payload.field_or("ManifestOnly", d.manifest_only)?,
            cell_id: payload.field_or("CellId", d.cell_id)?,
            file_list: payload.field("FileList")?,
            install_directory: payload.field("InstallDirectory")?,
            verify_all: payload.field_or("VerifyAll", d.verify_all)?,
            max_servers: payload.field_or("MaxServers", d.max_servers)?,
            max_downloads: payload.field_or("MaxDownloads", d.max_downloads)?,
            login_id: payload.field("LoginId")?,
            app_id: payload.field("AppId")?,
            pub_file: payload.field_or("PubFile", d.pub_file)?,
            ugc_id: payload.field_or("UgcId", d.ugc_id)?,
            branch: payload.field("Branch")?,
            beta_branch_password: payload.field("BetaBranchPassword")?,
            depot_ids: payload.field_or("DepotIdList", d.depot_ids)?,
            manifest_ids: payload.field_or("ManifestIdList", d.manifest_ids)?,
        })
    }

    /// Entries of the file list, blank lines dropped
    pub fn file_entries(&self) -> impl Iterator<Item = &str> {
        self.file_list
            .as_deref()
            .unwrap_or_default()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
    }
}

/// Failures of the verification collaborator
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Login was refused or credentials were unavailable
    #[error("Credentials rejected: {0}")]
    Credentials(String),

    /// Content could not be fetched or checked
    #[error("Content failure: {0}")]
    Content(String),

    /// The operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// A capability call failed
    #[error(transparent)]
    Call(#[from] CallError),
}

impl VerifyError {
    /// Stable error name used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Self::Credentials(_) => "CredentialsError",
            Self::Content(_) => "ContentError",
            Self::Cancelled => "OperationCancelled",
            Self::Call(e) => e.name(),
        }
    }
}

impl From<VerifyError> for RemoteError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::Call(call) => call.into(),
            other => RemoteError::new(other.name(), other.to_string()),
        }
    }
}

/// The collaborator that actually checks installed content
#[async_trait]
pub trait IntegrityVerifier: Send + Sync {
    /// Verify an installation
    ///
    /// `proxy` reaches the host's capabilities for this request.
    async fn verify(
        &self,
        params: VerifyParameters,
        proxy: CapabilityProxy,
    ) -> Result<Value, VerifyError>;
}

/// `VerifyFiles` command handler
pub struct VerifyFilesCommand {
    verifier: Arc<dyn IntegrityVerifier>,
}

impl VerifyFilesCommand {
    /// Create a handler delegating to `verifier`
    pub fn new(verifier: Arc<dyn IntegrityVerifier>) -> Self {
        Self { verifier }
    }
}

#[async_trait]
impl CommandHandler for VerifyFilesCommand {
    async fn handle(&self, mut payload: Value, proxy: CapabilityProxy) -> Result<Value, RemoteError> {
        if payload.get("FileList").map_or(true, Value::is_null) {
            let files = proxy.context.get_game_file_list().await?;
            tracing::debug!(
                request_id = %proxy.request_id(),
                files = files.len(),
                "Fetched game file list"
            );
            payload.insert("FileList", Value::from(files.join("\n")));
        }

        let params = VerifyParameters::from_payload(&payload)
            .map_err(|e| RemoteError::from_error("ArgumentError", &e))?;

        tracing::info!(
            request_id = %proxy.request_id(),
            app_id = params.app_id.as_deref().unwrap_or("-"),
            depots = params.depot_ids.len(),
            "Verifying files"
        );
        Ok(self.verifier.verify(params, proxy).await?)
    }
}
