//! WebSocket closure code classification.
//!
//! The lifecycle manager decides between "done", "failed for good" and
//! "try again" purely from the close code the transport reports.

/// Normal closure (operator- or client-initiated).
pub const NORMAL: u16 = 1000;
/// Protocol error (malformed negotiation).
pub const PROTOCOL_ERROR: u16 = 1002;
/// A close frame arrived without a status code.
pub const NO_STATUS: u16 = 1005;
/// Abnormal closure: the link dropped without a close frame.
pub const ABNORMAL: u16 = 1006;
/// Policy violation; the endpoint uses it for rejected credentials.
pub const POLICY_VIOLATION: u16 = 1008;

/// How a closure code affects the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseClass {
    /// Intentional closure, no reconnect.
    Normal,
    /// Credential refused, terminal until a fresh credential arrives.
    AuthRejected,
    /// Non-retriable protocol violation.
    ProtocolViolation,
    /// Anything else: schedule a reconnect.
    Retriable,
}

impl CloseClass {
    /// Classify a close code.
    pub fn of(code: u16) -> Self {
        match code {
            NORMAL => Self::Normal,
            POLICY_VIOLATION => Self::AuthRejected,
            PROTOCOL_ERROR => Self::ProtocolViolation,
            _ => Self::Retriable,
        }
    }
}
