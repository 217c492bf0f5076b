//! Metric names recorded by the session.
//!
//! Recorded through the `metrics` facade. No recorder is installed here; the
//! embedding binary decides whether and how to export them.

// Metric name constants to avoid typos across modules.

/// Calls issued (counter, labels: action).
pub const SESSION_CALLS_TOTAL: &str = "session_calls_total";
/// Calls that settled with an error (counter, labels: action, `error_type`).
pub const SESSION_CALL_ERRORS_TOTAL: &str = "session_call_errors_total";
/// Transport connect attempts (counter).
pub const SESSION_CONNECTS_TOTAL: &str = "session_connects_total";
/// Transport closures observed (counter, labels: code).
pub const SESSION_DISCONNECTS_TOTAL: &str = "session_disconnects_total";
/// Reconnect attempts scheduled (counter).
pub const SESSION_RECONNECTS_SCHEDULED_TOTAL: &str = "session_reconnects_scheduled_total";
/// Incoming frames dropped as undecodable (counter).
pub const SESSION_MALFORMED_FRAMES_TOTAL: &str = "session_malformed_frames_total";
/// Listener invocations that panicked (counter).
pub const SESSION_LISTENER_PANICS_TOTAL: &str = "session_listener_panics_total";
/// Calls awaiting a response (gauge).
pub const SESSION_PENDING_REQUESTS: &str = "session_pending_requests";
