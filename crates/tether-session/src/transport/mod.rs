//! Transport seam between the session driver and the network.
//!
//! A [`Connector`] turns an endpoint URL into a [`Link`]: a pair of channels
//! carrying text frames out and text frames plus one terminal
//! [`Inbound::Closed`] in. Dropping the link's sender closes the connection.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `ws` | `tokio-tungstenite` client |
//! | `memory` | In-process endpoint for tests and embedding |

pub mod memory;
pub mod ws;

use async_trait::async_trait;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tether_core::Credential;
use tether_settings::EndpointSettings;
use tokio::sync::mpsc;

pub use memory::{ConnectPlan, MemoryConnector, MemoryEndpoint, MemoryPeer, ReceivedCall};
pub use ws::WsConnector;

/// Characters escaped in a query component. Unreserved characters pass
/// through unchanged.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Frame written by the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// A text frame.
    Text(String),
    /// Start the closing handshake.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Event read from the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A text frame.
    Text(String),
    /// The connection ended. Always the last item.
    Closed {
        /// WebSocket close code (1006 when the link dropped without one).
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// An established connection.
#[derive(Debug)]
pub struct Link {
    /// Outgoing frames.
    pub outbound: mpsc::UnboundedSender<Outbound>,
    /// Incoming frames.
    pub inbound: mpsc::UnboundedReceiver<Inbound>,
}

/// Connect failures.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The endpoint refused the upgrade with an auth status.
    #[error("upgrade rejected with HTTP {status}")]
    Rejected {
        /// HTTP status code (401 or 403).
        status: u16,
    },
    /// The connection could not be established.
    #[error("connect failed: {reason}")]
    Connect {
        /// Error description.
        reason: String,
    },
}

/// Opens links to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a connection to `url`.
    async fn connect(&self, url: &str) -> Result<Link, TransportError>;
}

/// Build the connection URL: `{base_url}/{channel}?token={credential}`.
pub fn endpoint_url(endpoint: &EndpointSettings, credential: &Credential) -> String {
    let base = endpoint.base_url.trim_end_matches('/');
    let channel = endpoint.channel.trim_matches('/');
    let token = utf8_percent_encode(credential.value(), QUERY_COMPONENT);
    if channel.is_empty() {
        format!("{base}?token={token}")
    } else {
        format!("{base}/{channel}?token={token}")
    }
}

/// URL with the token query stripped, for logs.
pub(crate) fn loggable_url(url: &str) -> &str {
    url.split_once('?').map_or(url, |(head, _)| head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn endpoint(base: &str, channel: &str) -> EndpointSettings {
        EndpointSettings {
            base_url: base.into(),
            channel: channel.into(),
        }
    }

    fn cred(value: &str) -> Credential {
        Credential::new(value, Utc::now() + Duration::hours(1))
    }

    #[test]
    fn url_joins_base_channel_and_token() {
        let url = endpoint_url(&endpoint("wss://api.test/ws", "chat"), &cred("abc.def.ghi"));
        assert_eq!(url, "wss://api.test/ws/chat?token=abc.def.ghi");
    }

    #[test]
    fn url_tolerates_stray_slashes() {
        let url = endpoint_url(&endpoint("wss://api.test/ws/", "/chat/"), &cred("t"));
        assert_eq!(url, "wss://api.test/ws/chat?token=t");
    }

    #[test]
    fn url_escapes_token() {
        let url = endpoint_url(&endpoint("ws://h", "c"), &cred("a b+c/d=&e"));
        assert_eq!(url, "ws://h/c?token=a%20b%2Bc%2Fd%3D%26e");
    }

    #[test]
    fn url_without_channel() {
        let url = endpoint_url(&endpoint("ws://h/ws", ""), &cred("t"));
        assert_eq!(url, "ws://h/ws?token=t");
    }

    #[test]
    fn loggable_url_drops_query() {
        assert_eq!(loggable_url("ws://h/c?token=secret"), "ws://h/c");
        assert_eq!(loggable_url("ws://h/c"), "ws://h/c");
    }
}
