//! Connection settings: endpoint, calls, handshake, heartbeat, reconnect.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Endpoint location.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointSettings {
    /// Base WebSocket URL, without the channel segment.
    pub base_url: String,
    /// Logical channel appended as the last path segment.
    pub channel: String,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            base_url: "ws://127.0.0.1:8080/ws".to_string(),
            channel: "chat".to_string(),
        }
    }
}

/// Remote call behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RpcSettings {
    /// Deadline applied to every call, in milliseconds.
    pub call_timeout_ms: u64,
    /// Name of the params field carrying the topic in `subscribe`/`unsubscribe`.
    /// The default matches the `chat` channel, which keys topics by chat id.
    pub topic_param: String,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            call_timeout_ms: 20_000,
            topic_param: "chatId".to_string(),
        }
    }
}

impl RpcSettings {
    /// Call deadline as a [`Duration`].
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Credential acceptance.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HandshakeSettings {
    /// Wait for an `authenticated` frame before reporting the connection open.
    /// When `false`, a completed transport handshake counts as acceptance.
    pub require_auth_ack: bool,
    /// How long to wait for the acceptance frame, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for HandshakeSettings {
    fn default() -> Self {
        Self {
            require_auth_ack: true,
            timeout_ms: 10_000,
        }
    }
}

impl HandshakeSettings {
    /// Acceptance window as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Liveness probe.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Send probes while open.
    pub enabled: bool,
    /// Probe interval in milliseconds.
    pub interval_ms: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
        }
    }
}

impl HeartbeatSettings {
    /// Probe interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Reconnect policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Reconnect automatically after retriable closures.
    pub enabled: bool,
    /// Delay before the first attempt, in milliseconds. Doubles per attempt.
    pub base_delay_ms: u64,
    /// Upper bound on the delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay_ms: 3_000,
            max_delay_ms: 30_000,
            max_attempts: 8,
        }
    }
}
