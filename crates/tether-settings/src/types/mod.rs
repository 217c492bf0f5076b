//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` to match the JSON file
//! format. Each type implements [`Default`] with production values, and every
//! section is `#[serde(default)]` so partial files are accepted.

mod connection;

pub use connection::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// # JSON Format
///
/// ```json
/// {
///   "endpoint": { "baseUrl": "wss://example.test/ws", "channel": "chat" },
///   "reconnect": { "maxAttempts": 5 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Where to connect.
    pub endpoint: EndpointSettings,
    /// Call behavior.
    pub rpc: RpcSettings,
    /// Credential acceptance.
    pub handshake: HandshakeSettings,
    /// Liveness probe.
    pub heartbeat: HeartbeatSettings,
    /// Retry policy after abnormal closure.
    pub reconnect: ReconnectSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl TetherSettings {
    /// Correct invalid values in place.
    ///
    /// Called automatically during loading. Values that would stall the
    /// session (zero intervals, inverted backoff bounds) are replaced with a
    /// warning rather than rejected.
    pub fn validate(&mut self) {
        fn non_zero(val: &mut u64, fallback: u64, name: &str) {
            if *val == 0 {
                tracing::warn!("{name} must be positive, using {fallback}");
                *val = fallback;
            }
        }

        non_zero(
            &mut self.rpc.call_timeout_ms,
            RpcSettings::default().call_timeout_ms,
            "rpc.callTimeoutMs",
        );
        non_zero(
            &mut self.heartbeat.interval_ms,
            HeartbeatSettings::default().interval_ms,
            "heartbeat.intervalMs",
        );
        non_zero(
            &mut self.handshake.timeout_ms,
            HandshakeSettings::default().timeout_ms,
            "handshake.timeoutMs",
        );
        non_zero(
            &mut self.reconnect.base_delay_ms,
            ReconnectSettings::default().base_delay_ms,
            "reconnect.baseDelayMs",
        );

        let rc = &mut self.reconnect;
        if rc.max_delay_ms < rc.base_delay_ms {
            tracing::warn!(
                "reconnect.maxDelayMs ({}) < baseDelayMs ({}), correcting",
                rc.max_delay_ms,
                rc.base_delay_ms
            );
            rc.max_delay_ms = rc.base_delay_ms;
        }

        let ep = &mut self.endpoint;
        while ep.base_url.ends_with('/') {
            let _ = ep.base_url.pop();
        }
        let trimmed = ep.channel.trim_matches('/');
        if trimmed.len() != ep.channel.len() {
            ep.channel = trimmed.to_string();
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
