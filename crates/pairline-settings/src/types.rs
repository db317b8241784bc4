use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PairlineSettings {
    pub server: ServerSettings,
    pub session: SessionSettings,
    pub bridge: BridgeSettings,
    pub logging: LoggingSettings,
}

/// HTTP listener and stream delivery settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    pub port: u16,
    /// Events buffered per stream subscriber before it is considered stalled
    /// and dropped.
    pub max_send_queue: usize,
    /// Interval between SSE keep-alive comments.
    pub keep_alive_secs: u64,
    /// Grace period for background tasks on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            max_send_queue: 64,
            keep_alive_secs: 15,
            shutdown_timeout_secs: 10,
        }
    }
}

impl ServerSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Pairing session lifecycle settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Identity used for non-fresh starts, so stored credentials are resumed.
    pub default_identity: String,
    /// Start a session as soon as the server is up.
    pub autostart: bool,
    /// Upper bound on destroying a previous session before replacing it.
    pub teardown_timeout_ms: u64,
    /// Capacity of the notification channel between client and controller.
    pub notification_buffer: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_identity: "default".to_string(),
            autostart: true,
            teardown_timeout_ms: 10_000,
            notification_buffer: 256,
        }
    }
}

impl SessionSettings {
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}

/// External helper process that drives the real pairing client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Per-command reply timeout.
    pub request_timeout_ms: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            request_timeout_ms: 30_000,
        }
    }
}

impl BridgeSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module level overrides, e.g. `{"pairline_client": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            modules: BTreeMap::new(),
        }
    }
}
