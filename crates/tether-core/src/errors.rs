//! Session error taxonomy.
//!
//! Every failure a caller can observe is a [`SessionError`]: rejected calls,
//! local credential rejection, and the terminal connection error carried in
//! the session status. Transport and decode failures are converted into these
//! variants by the session driver; they never surface as panics.

/// Errors surfaced by the session to application code.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// A call was attempted while no connection was open.
    #[error("not connected")]
    NotConnected,

    /// No response arrived before the request deadline.
    #[error("request {action} timed out after {after_ms}ms")]
    Timeout {
        /// Action name of the timed-out call.
        action: String,
        /// Configured deadline in milliseconds.
        after_ms: u64,
    },

    /// The connection closed while the call was pending.
    #[error("connection closed")]
    ConnectionClosed,

    /// The credential has expired (checked locally before or during use).
    #[error("credential expired")]
    AuthExpired,

    /// The remote endpoint refused the credential.
    #[error("credential rejected: {reason}")]
    AuthRejected {
        /// Reason reported by the transport or endpoint.
        reason: String,
    },

    /// No credential was supplied.
    #[error("no credential supplied")]
    MissingCredential,

    /// The connection opened but the endpoint never accepted the credential.
    #[error("handshake timeout")]
    HandshakeTimeout,

    /// The endpoint closed the connection with a non-retriable protocol code.
    #[error("protocol violation (code {code}): {reason}")]
    ProtocolViolation {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },

    /// An incoming frame could not be decoded.
    #[error("malformed frame: {reason}")]
    MalformedFrame {
        /// What was wrong with the frame.
        reason: String,
    },

    /// The endpoint answered the call with an explicit error.
    #[error("remote error {code}: {message}")]
    Remote {
        /// Endpoint error code.
        code: i64,
        /// Endpoint error message.
        message: String,
    },

    /// Automatic reconnection gave up; an explicit retry is required.
    #[error("reconnect gave up after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of failed attempts.
        attempts: u32,
    },

    /// The transport failed (connect error, dropped link).
    #[error("transport error: {reason}")]
    Transport {
        /// Error description.
        reason: String,
    },

    /// Outgoing params or an incoming result did not match the expected type.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Error description.
        reason: String,
    },

    /// The session driver has stopped.
    #[error("session shut down")]
    Shutdown,
}

impl SessionError {
    /// Whether this error requires a fresh credential before any retry.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::AuthExpired | Self::AuthRejected { .. } | Self::MissingCredential
        )
    }

    /// Stable snake_case label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::Timeout { .. } => "timeout",
            Self::ConnectionClosed => "connection_closed",
            Self::AuthExpired => "auth_expired",
            Self::AuthRejected { .. } => "auth_rejected",
            Self::MissingCredential => "missing_credential",
            Self::HandshakeTimeout => "handshake_timeout",
            Self::ProtocolViolation { .. } => "protocol_violation",
            Self::MalformedFrame { .. } => "malformed_frame",
            Self::Remote { .. } => "remote",
            Self::ReconnectExhausted { .. } => "reconnect_exhausted",
            Self::Transport { .. } => "transport",
            Self::Serialization { .. } => "serialization",
            Self::Shutdown => "shutdown",
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(SessionError::NotConnected.to_string(), "not connected");
        assert_eq!(
            SessionError::Timeout {
                action: "getChats".into(),
                after_ms: 20_000
            }
            .to_string(),
            "request getChats timed out after 20000ms"
        );
        assert_eq!(
            SessionError::Remote {
                code: 404,
                message: "Chat not found".into()
            }
            .to_string(),
            "remote error 404: Chat not found"
        );
    }

    #[test]
    fn auth_failures() {
        assert!(SessionError::AuthExpired.is_auth_failure());
        assert!(SessionError::MissingCredential.is_auth_failure());
        assert!(
            SessionError::AuthRejected {
                reason: "Unauthorized".into()
            }
            .is_auth_failure()
        );
        assert!(!SessionError::ConnectionClosed.is_auth_failure());
        assert!(!SessionError::HandshakeTimeout.is_auth_failure());
    }

    #[test]
    fn kinds_are_snake_case() {
        let errors = [
            SessionError::NotConnected,
            SessionError::ConnectionClosed,
            SessionError::AuthExpired,
            SessionError::HandshakeTimeout,
            SessionError::Shutdown,
            SessionError::ReconnectExhausted { attempts: 3 },
        ];
        for e in errors {
            assert!(
                e.kind().chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "kind '{}' must be snake_case",
                e.kind()
            );
        }
    }

    #[test]
    fn from_serde_error() {
        let err = serde_json::from_str::<u32>("nope").unwrap_err();
        let e: SessionError = err.into();
        assert_eq!(e.kind(), "serialization");
    }
}
