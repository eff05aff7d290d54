//! Access-token suppliers.
//!
//! The session asks its [`TokenSupplier`] for a credential once per
//! `connect`. An absent credential is not an error: the connection is still
//! attempted and the server decides whether to reject it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Source of the bearer credential attached to outbound connections.
#[async_trait]
pub trait TokenSupplier: Send + Sync {
    /// The current access token, or `None` if the user is signed out.
    async fn access_token(&self) -> Option<String>;
}

/// The token set the app stores after sign-in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    /// Bearer token for API and socket requests.
    pub access_token: String,
    /// Token used to obtain a new access token.
    pub refresh_token: String,
    /// Access token expiry as issued by the backend.
    pub access_exp_time: i64,
    /// Refresh token expiry as issued by the backend.
    pub refresh_exp_time: i64,
}

/// On-disk form; a set with any field missing counts as signed out.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredTokens {
    access_token: Option<String>,
    refresh_token: Option<String>,
    access_exp_time: Option<i64>,
    refresh_exp_time: Option<i64>,
}

impl StoredTokens {
    fn complete(self) -> Option<AuthTokens> {
        let access_token = self.access_token.filter(|t| !t.is_empty())?;
        let refresh_token = self.refresh_token.filter(|t| !t.is_empty())?;
        Some(AuthTokens {
            access_token,
            refresh_token,
            access_exp_time: self.access_exp_time?,
            refresh_exp_time: self.refresh_exp_time?,
        })
    }
}

impl AuthTokens {
    /// Parse a stored token set. Returns `None` when incomplete.
    pub fn from_json(json: &str) -> Result<Option<Self>, serde_json::Error> {
        let stored: StoredTokens = serde_json::from_str(json)?;
        Ok(stored.complete())
    }
}

/// Supplies a fixed token (or none).
#[derive(Clone, Debug, Default)]
pub struct StaticTokenSupplier {
    token: Option<String>,
}

impl StaticTokenSupplier {
    /// Always supply `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Never supply a token.
    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl TokenSupplier for StaticTokenSupplier {
    async fn access_token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// Reads the stored token set from a JSON file on every lookup, so a token
/// refreshed by another process is picked up on the next connect.
#[derive(Clone, Debug)]
pub struct FileTokenSupplier {
    path: PathBuf,
}

impl FileTokenSupplier {
    /// Read tokens from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file being read.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the full token set.
    pub async fn load(&self) -> Option<AuthTokens> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no token file, signed out");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), "failed to read token file: {e}");
                return None;
            }
        };

        match AuthTokens::from_json(&data) {
            Ok(Some(tokens)) => Some(tokens),
            Ok(None) => {
                debug!(path = %self.path.display(), "token file is incomplete, signed out");
                None
            }
            Err(e) => {
                warn!(path = %self.path.display(), "failed to parse token file: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl TokenSupplier for FileTokenSupplier {
    async fn access_token(&self) -> Option<String> {
        self.load().await.map(|tokens| tokens.access_token)
    }
}
