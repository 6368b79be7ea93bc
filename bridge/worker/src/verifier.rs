//! Local Integrity Verifier
//!
//! Checks the files named in a `VerifyFiles` request against the install
//! directory and reports anything missing back to the host's `ui` group.
//! Depot ids the request leaves out are fetched from the host's `context`
//! group.
//!
//! Invalid requests are answered with a `{message}` value rather than an
//! error, matching what hosts already display.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use bridge_core::{CapabilityProxy, IntegrityVerifier, Value, VerifyError, VerifyParameters};

/// File list entries with this prefix are patterns, not paths
const REGEX_PREFIX: &str = "regex:";

/// Verifies installed files on the local disk
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalVerifier;

fn message(text: impl Into<String>) -> Value {
    Value::object([("message", Value::from(text.into()))])
}

impl LocalVerifier {
    async fn resolve_depots(params: &VerifyParameters, proxy: &CapabilityProxy) -> Vec<u32> {
        if !params.depot_ids.is_empty() {
            return params.depot_ids.clone();
        }
        match proxy.context.get_depot_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(request_id = %proxy.request_id(), error = %e, "Could not fetch installed depots");
                Vec::new()
            }
        }
    }

    /// Literal entries missing under `root`, in request order
    async fn missing_files(root: &Path, params: &VerifyParameters) -> Vec<String> {
        let mut missing = Vec::new();
        for entry in params.file_entries() {
            if let Some(pattern) = entry.strip_prefix(REGEX_PREFIX) {
                debug!(pattern, "Skipping pattern entry");
                continue;
            }
            let relative: PathBuf = entry.replace('\\', "/").split('/').collect();
            let present = tokio::fs::try_exists(root.join(&relative))
                .await
                .unwrap_or(false);
            if !present {
                missing.push(entry.to_string());
            }
        }
        missing
    }
}

#[async_trait]
impl IntegrityVerifier for LocalVerifier {
    async fn verify(
        &self,
        params: VerifyParameters,
        proxy: CapabilityProxy,
    ) -> Result<Value, VerifyError> {
        let Some(app_id) = params
            .app_id
            .as_deref()
            .and_then(|id| id.trim().parse::<u32>().ok())
        else {
            return Ok(message("Error: SteamAppId not specified"));
        };

        let depots = Self::resolve_depots(&params, &proxy).await;
        if !params.manifest_ids.is_empty() && params.manifest_ids.len() != depots.len() {
            return Ok(message(
                "Error: one manifest id is required for every depot specified",
            ));
        }

        let root = params
            .install_directory
            .as_deref()
            .map(PathBuf::from)
            .ok_or_else(|| VerifyError::Content("install directory not specified".into()))?;

        if let Err(e) = proxy.ui.is_verifying_files().await {
            warn!(request_id = %proxy.request_id(), error = %e, "Host did not acknowledge verification start");
        }

        let checked = params
            .file_entries()
            .filter(|entry| !entry.starts_with(REGEX_PREFIX))
            .count();
        let missing = Self::missing_files(&root, &params).await;
        info!(app_id, checked, missing = missing.len(), "Verification finished");

        if !missing.is_empty() {
            match proxy.ui.report_mismatch(&missing).await {
                Ok(selected) => debug!(selected = selected.len(), "Host acknowledged mismatches"),
                Err(e) => warn!(error = %e, "Could not report mismatches"),
            }
        }

        Ok(Value::object([
            (
                "message",
                Value::from(format!(
                    "Verified {checked} files, {} missing",
                    missing.len()
                )),
            ),
            ("missing", Value::from(missing)),
            ("depots", Value::from(depots)),
        ]))
    }
}
