//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a user
//! file may specify any subset of fields.

mod network;

pub use network::*;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Root settings type for the Tally client.
///
/// # JSON Format
///
/// ```json
/// {
///   "realtime": { "websocketUrl": "wss://api.example.com/ws" },
///   "api": { "baseUrl": "https://api.example.com/" },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TallySettings {
    /// Realtime socket settings.
    pub realtime: RealtimeSettings,
    /// REST API settings.
    pub api: ApiSettings,
    /// Credential lookup settings.
    pub auth: AuthSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl TallySettings {
    /// Resolve the token file against `data_dir` unless it is absolute.
    pub fn token_file_path(&self, data_dir: &Path) -> PathBuf {
        let path = Path::new(&self.auth.token_file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            data_dir.join(path)
        }
    }
}

/// Where the client finds its access credential.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Token set file (relative to `~/.tally` unless absolute).
    pub token_file: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            token_file: "auth.json".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
