//! Liveness probe timer.
//!
//! While the connection is open the driver sends `{"action":"ping"}` every
//! interval. A missing `pong` is never treated as failure here; detecting a
//! dead link is left to the transport.

use std::time::Duration;

use tether_settings::HeartbeatSettings;
use tokio::time::Instant;

/// Probe schedule. Armed only while the connection is open.
#[derive(Debug)]
pub struct Heartbeat {
    enabled: bool,
    interval: Duration,
    next: Option<Instant>,
}

impl Heartbeat {
    /// Create a stopped heartbeat.
    pub fn new(settings: &HeartbeatSettings) -> Self {
        Self {
            enabled: settings.enabled,
            interval: settings.interval(),
            next: None,
        }
    }

    /// Arm the first probe one interval after `now`.
    pub fn start(&mut self, now: Instant) {
        if self.enabled {
            self.next = Some(now + self.interval);
        }
    }

    /// Disarm.
    pub fn stop(&mut self) {
        self.next = None;
    }

    /// If a probe is due at `now`, re-arm and return `true`.
    pub fn poll_due(&mut self, now: Instant) -> bool {
        match self.next {
            Some(at) if at <= now => {
                self.next = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }

    /// Next probe instant, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.next
    }
}
