//! JSON wire codec.
//!
//! Outgoing frames are calls (`{id, action, params?}`) and the liveness probe
//! (`{"action":"ping"}`). Incoming frames decode into a [`Frame`]:
//!
//! | Shape | Frame |
//! |-------|-------|
//! | `{id, result}` | [`Frame::Result`] |
//! | `{id, error: {code, message}}` | [`Frame::Error`] |
//! | `{event: "pong"}` | [`Frame::Pong`] |
//! | `{event: "authenticated", payload: {success}}` | [`Frame::Authenticated`] |
//! | `{event, payload}` | [`Frame::Event`] |
//! | anything else | [`Frame::Malformed`] |
//!
//! Decoding is total: an undecodable input yields `Malformed`, never an error.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::SessionError;

/// Exact probe text. The endpoint compares the raw frame against this string.
pub const PING_FRAME: &str = r#"{"action":"ping"}"#;

/// Event name of the liveness acknowledgement.
pub const PONG_EVENT: &str = "pong";

/// Event name of the handshake acceptance frame.
pub const AUTHENTICATED_EVENT: &str = "authenticated";

/// Client-generated correlation identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An outgoing call envelope.
#[derive(Debug, Serialize)]
struct OutgoingCall<'a> {
    id: RequestId,
    action: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

/// Error body of an RPC error frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Endpoint error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

impl From<RemoteError> for SessionError {
    fn from(e: RemoteError) -> Self {
        Self::Remote {
            code: e.code,
            message: e.message,
        }
    }
}

/// A decoded incoming frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Successful response to a call.
    Result {
        /// Correlation id of the call.
        id: RequestId,
        /// Result value (may be `null`).
        value: Value,
    },
    /// Error response to a call.
    Error {
        /// Correlation id of the call.
        id: RequestId,
        /// Error body.
        error: RemoteError,
    },
    /// Server-pushed event.
    Event {
        /// Event name (topic).
        topic: String,
        /// Event payload (`null` when absent).
        payload: Value,
    },
    /// Handshake acceptance (or refusal) of the credential.
    Authenticated {
        /// Whether the credential was accepted.
        success: bool,
    },
    /// Liveness acknowledgement.
    Pong,
    /// Undecodable input.
    Malformed {
        /// What was wrong.
        reason: String,
    },
}

impl Frame {
    fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Frame kind label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Result { .. } => "result",
            Self::Error { .. } => "error",
            Self::Event { .. } => "event",
            Self::Authenticated { .. } => "authenticated",
            Self::Pong => "pong",
            Self::Malformed { .. } => "malformed",
        }
    }
}

/// Encode an outgoing call.
pub fn encode_call(
    id: RequestId,
    action: &str,
    params: Option<&Value>,
) -> Result<String, SessionError> {
    let call = OutgoingCall { id, action, params };
    Ok(serde_json::to_string(&call)?)
}

/// Encode the liveness probe.
pub fn encode_ping() -> String {
    PING_FRAME.to_string()
}

/// Decode an incoming text frame.
pub fn decode(raw: &str) -> Frame {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => return Frame::malformed(format!("invalid json: {e}")),
    };
    let Value::Object(obj) = value else {
        return Frame::malformed("expected a JSON object");
    };

    if let Some(id) = obj.get("id") {
        return decode_response(id, &obj);
    }

    if let Some(event) = obj.get("event") {
        let Some(topic) = event.as_str() else {
            return Frame::malformed("event name is not a string");
        };
        let payload = obj.get("payload").cloned().unwrap_or(Value::Null);
        return match topic {
            PONG_EVENT => Frame::Pong,
            AUTHENTICATED_EVENT => Frame::Authenticated {
                success: payload
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            },
            _ => Frame::Event {
                topic: topic.to_string(),
                payload,
            },
        };
    }

    if let Some(error) = obj.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("<no message>");
        return Frame::malformed(format!("error frame without id: {message}"));
    }

    Frame::malformed("unrecognized frame shape")
}

fn decode_response(id: &Value, obj: &Map<String, Value>) -> Frame {
    let Some(id) = id.as_u64() else {
        return Frame::malformed(format!("invalid request id: {id}"));
    };
    let id = RequestId(id);

    if let Some(error) = obj.get("error") {
        return match serde_json::from_value::<RemoteError>(error.clone()) {
            Ok(error) => Frame::Error { id, error },
            Err(e) => Frame::malformed(format!("invalid error body for request {id}: {e}")),
        };
    }

    match obj.get("result") {
        Some(result) => Frame::Result {
            id,
            value: result.clone(),
        },
        None => Frame::malformed(format!("response {id} has neither result nor error")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn encode_call_with_params() {
        let params = json!({"chatId": "c1", "limit": 20});
        let text = encode_call(RequestId(7), "getMessages", Some(&params)).unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["id"], 7);
        assert_eq!(parsed["action"], "getMessages");
        assert_eq!(parsed["params"]["chatId"], "c1");
    }

    #[test]
    fn encode_call_omits_missing_params() {
        let text = encode_call(RequestId(1), "getChats", None).unwrap();
        assert_eq!(text, r#"{"id":1,"action":"getChats"}"#);
    }

    #[test]
    fn ping_matches_endpoint_literal() {
        assert_eq!(encode_ping(), serde_json::to_string(&json!({"action": "ping"})).unwrap());
    }

    #[test]
    fn decode_result() {
        let frame = decode(r#"{"id":3,"result":{"subscribed":true}}"#);
        assert_eq!(
            frame,
            Frame::Result {
                id: RequestId(3),
                value: json!({"subscribed": true})
            }
        );
    }

    #[test]
    fn decode_null_result_is_still_a_result() {
        let frame = decode(r#"{"id":4,"result":null}"#);
        assert_eq!(
            frame,
            Frame::Result {
                id: RequestId(4),
                value: Value::Null
            }
        );
    }

    #[test]
    fn decode_error() {
        let frame = decode(r#"{"id":5,"error":{"code":404,"message":"Chat not found"}}"#);
        assert_matches!(frame, Frame::Error { id: RequestId(5), error } if error.code == 404);
    }

    #[test]
    fn decode_error_with_bad_body_is_malformed() {
        let frame = decode(r#"{"id":5,"error":"boom"}"#);
        assert_matches!(frame, Frame::Malformed { .. });
    }

    #[test]
    fn decode_event() {
        let frame = decode(r#"{"event":"new_message","payload":{"chatId":"c1"}}"#);
        assert_eq!(
            frame,
            Frame::Event {
                topic: "new_message".into(),
                payload: json!({"chatId": "c1"})
            }
        );
    }

    #[test]
    fn decode_event_without_payload() {
        let frame = decode(r#"{"event":"typing"}"#);
        assert_eq!(
            frame,
            Frame::Event {
                topic: "typing".into(),
                payload: Value::Null
            }
        );
    }

    #[test]
    fn decode_pong() {
        assert_eq!(decode(r#"{"event":"pong"}"#), Frame::Pong);
    }

    #[test]
    fn decode_authenticated() {
        assert_eq!(
            decode(r#"{"event":"authenticated","payload":{"success":true}}"#),
            Frame::Authenticated { success: true }
        );
        assert_eq!(
            decode(r#"{"event":"authenticated","payload":{"success":false}}"#),
            Frame::Authenticated { success: false }
        );
        assert_eq!(
            decode(r#"{"event":"authenticated"}"#),
            Frame::Authenticated { success: false }
        );
    }

    #[test]
    fn decode_malformed_inputs() {
        for raw in [
            "not json",
            "[1,2,3]",
            "42",
            r#"{"foo":"bar"}"#,
            r#"{"id":"abc","result":1}"#,
            r#"{"id":-1,"result":1}"#,
            r#"{"id":9}"#,
            r#"{"event":12}"#,
            r#"{"error":{"code":400,"message":"Invalid JSON"}}"#,
        ] {
            assert_matches!(decode(raw), Frame::Malformed { .. }, "input: {raw}");
        }
    }

    #[test]
    fn frame_kinds() {
        assert_eq!(Frame::Pong.kind(), "pong");
        assert_eq!(decode("nope").kind(), "malformed");
    }

    #[test]
    fn remote_error_converts_to_session_error() {
        let e: SessionError = RemoteError {
            code: 403,
            message: "Forbidden".into(),
        }
        .into();
        assert_eq!(
            e,
            SessionError::Remote {
                code: 403,
                message: "Forbidden".into()
            }
        );
    }

    proptest::proptest! {
        #[test]
        fn decode_never_panics(raw in ".*") {
            let _ = decode(&raw);
        }

        #[test]
        fn encoded_calls_carry_their_id(id in 1u64..u64::MAX, action in "[a-zA-Z]{1,16}") {
            let text = encode_call(RequestId(id), &action, None).unwrap();
            let parsed: Value = serde_json::from_str(&text).unwrap();
            proptest::prop_assert_eq!(parsed["id"].as_u64(), Some(id));
            proptest::prop_assert_eq!(parsed["action"].as_str(), Some(action.as_str()));
        }
    }
}
