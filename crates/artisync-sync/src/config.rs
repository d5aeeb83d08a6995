//! Sync settings.
//!
//! The keys a deployment reads at startup, with the defaults the protocol
//! assumes. Server and client option structs are built from one of these.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Configuration keys for a repository taking part in sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    /// Server outbound byte cap per reply.
    pub max_download: usize,
    /// Server deadline in seconds for composing one reply.
    pub max_download_time: u64,
    /// Client outbound byte cap per request.
    pub max_upload: usize,
    /// Never push, even when asked to sync.
    pub dont_push: bool,
    /// This repository's server code.
    pub server_code: String,
    /// This repository's project code; empty until first clone.
    pub project_code: Option<String>,
    /// Most recent cookie handed out by the remote.
    pub cookie: Option<String>,
    /// Project code of the parent project, for `--from-parent` pulls.
    pub parent_project_code: Option<String>,
    /// Display name of the parent project.
    pub parent_project_name: Option<String>,
    /// Accept transport-level basic-auth identities for login.
    pub remote_user_ok: bool,
    /// Announce the unversioned-content side channel on clones.
    pub uv_sync: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_download: 5_000_000,
            max_download_time: 30,
            max_upload: 250_000,
            dont_push: false,
            server_code: String::new(),
            project_code: None,
            cookie: None,
            parent_project_code: None,
            parent_project_name: None,
            remote_user_ok: false,
            uv_sync: false,
        }
    }
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| SyncError::Protocol(format!("bad settings: {e}")))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Protocol(format!("cannot read settings: {e}")))?;
        Self::from_json(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_protocol_assumptions() {
        let settings = Settings::default();
        assert_eq!(settings.max_download, 5_000_000);
        assert_eq!(settings.max_download_time, 30);
        assert_eq!(settings.max_upload, 250_000);
        assert!(!settings.dont_push);
    }

    #[test]
    fn json_keys_are_kebab_case_and_partial() {
        let settings = Settings::from_json(
            r#"{"max-upload": 4096, "project-code": "p", "dont-push": true}"#,
        )
        .unwrap();
        assert_eq!(settings.max_upload, 4096);
        assert_eq!(settings.project_code.as_deref(), Some("p"));
        assert!(settings.dont_push);
        assert_eq!(settings.max_download, 5_000_000);
    }
}
