//! Realtime socket and REST API settings.

use serde::{Deserialize, Serialize};

/// Realtime socket settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeSettings {
    /// Socket endpoint the application connects to at startup.
    pub websocket_url: String,
    /// Capacity of the outbound frame channel.
    pub outbound_buffer: usize,
    /// Capacity of the inbound frame channel.
    pub inbound_buffer: usize,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            websocket_url: "ws://127.0.0.1:8080/ws".to_string(),
            outbound_buffer: 256,
            inbound_buffer: 256,
        }
    }
}

/// REST API settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// Base URL that endpoint paths such as `group/history/{id}` are joined to.
    pub base_url: String,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/".to_string(),
            timeout_ms: 15_000,
        }
    }
}
