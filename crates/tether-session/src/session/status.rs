//! Observable session status.

use std::fmt;

use serde::Serialize;
use tether_core::SessionError;

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// Never opened.
    #[default]
    Idle,
    /// Transport handshake or credential acceptance in progress.
    Connecting,
    /// Connected and accepted.
    Open,
    /// Closing handshake sent, waiting for the transport to finish.
    Closing,
    /// Closed. A reconnect may be pending.
    Closed,
    /// Terminal failure. Only a new `open` or an explicit `reconnect` leaves it.
    Failed,
}

impl LinkState {
    /// Whether a connection exists or is being established.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }

    /// Stable label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot published on every change.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionStatus {
    /// Lifecycle state.
    pub state: LinkState,
    /// Open, and every subscription replay has settled.
    pub ready: bool,
    /// Most recent failure. Cleared when a connection opens.
    pub error: Option<SessionError>,
    /// Consecutive reconnect attempts since the last successful open.
    pub reconnect_attempt: u32,
    /// A reconnect attempt is armed.
    pub reconnect_pending: bool,
}

impl SessionStatus {
    /// Whether nothing more will happen without a caller action: failed, or
    /// closed with no reconnect armed.
    pub fn awaits_caller(&self) -> bool {
        match self.state {
            LinkState::Failed => true,
            LinkState::Closed => !self.reconnect_pending,
            _ => false,
        }
    }
}
