//! In-process transport.
//!
//! [`MemoryConnector`] hands each accepted link's far end to a
//! [`MemoryEndpoint`] as a [`MemoryPeer`], which plays the remote side:
//! reading calls, answering them, pushing events and closing. Every connect
//! attempt is recorded, and outcomes can be scripted with [`ConnectPlan`].

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tether_core::wire::{AUTHENTICATED_EVENT, PING_FRAME};
use tokio::sync::mpsc;

use super::{Connector, Inbound, Link, Outbound, TransportError};

/// Scripted outcome of one connect attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectPlan {
    /// Establish the link.
    Accept,
    /// Refuse the upgrade with an HTTP status.
    Reject {
        /// HTTP status code.
        status: u16,
    },
    /// Fail to connect.
    Fail {
        /// Error description.
        reason: String,
    },
    /// Never complete, like an upgrade the host never answers.
    Stall,
}

#[derive(Debug, Default)]
struct Shared {
    attempts: Vec<String>,
    plans: VecDeque<ConnectPlan>,
}

/// Connector producing in-process links.
#[derive(Clone, Debug)]
pub struct MemoryConnector {
    shared: Arc<Mutex<Shared>>,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryConnector {
    /// Create a connector and the endpoint receiving its links.
    pub fn new() -> (Self, MemoryEndpoint) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let connector = Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            peers: peers_tx,
        };
        (connector, MemoryEndpoint { peers: peers_rx })
    }

    /// Queue the outcome of a future connect attempt. Attempts with no
    /// queued plan are accepted.
    pub fn plan(&self, plan: ConnectPlan) {
        self.shared.lock().plans.push_back(plan);
    }

    /// URLs of every connect attempt so far, oldest first.
    pub fn attempts(&self) -> Vec<String> {
        self.shared.lock().attempts.clone()
    }

    /// Number of connect attempts so far.
    pub fn attempt_count(&self) -> usize {
        self.shared.lock().attempts.len()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        let plan = {
            let mut shared = self.shared.lock();
            shared.attempts.push(url.to_string());
            shared.plans.pop_front().unwrap_or(ConnectPlan::Accept)
        };
        match plan {
            ConnectPlan::Accept => {
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                let (in_tx, in_rx) = mpsc::unbounded_channel();
                let peer = MemoryPeer {
                    url: url.to_string(),
                    from_session: out_rx,
                    to_session: in_tx,
                };
                self.peers
                    .send(peer)
                    .map_err(|_| TransportError::Connect {
                        reason: "memory endpoint dropped".into(),
                    })?;
                Ok(Link {
                    outbound: out_tx,
                    inbound: in_rx,
                })
            }
            ConnectPlan::Reject { status } => Err(TransportError::Rejected { status }),
            ConnectPlan::Fail { reason } => Err(TransportError::Connect { reason }),
            ConnectPlan::Stall => std::future::pending().await,
        }
    }
}

/// Receives the far end of every accepted link.
#[derive(Debug)]
pub struct MemoryEndpoint {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryEndpoint {
    /// Wait for the next accepted link.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    /// Take an already accepted link without waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.peers.try_recv().ok()
    }
}

/// A call read from the session.
#[derive(Clone, Debug, PartialEq)]
pub struct ReceivedCall {
    /// Correlation id.
    pub id: u64,
    /// Action name.
    pub action: String,
    /// Params (`null` when omitted).
    pub params: Value,
}

/// The remote side of one in-process link.
#[derive(Debug)]
pub struct MemoryPeer {
    url: String,
    from_session: mpsc::UnboundedReceiver<Outbound>,
    to_session: mpsc::UnboundedSender<Inbound>,
}

impl MemoryPeer {
    /// URL the session connected with.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The `token` query parameter of the URL, still percent-encoded.
    pub fn token(&self) -> Option<&str> {
        let (_, query) = self.url.split_once('?')?;
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("token="))
    }

    /// Next frame written by the session, or `None` once it dropped the link.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.from_session.recv().await
    }

    /// Next frame written by the session, without waiting.
    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.from_session.try_recv().ok()
    }

    /// Next call, skipping liveness probes. `None` on close or drop.
    pub async fn next_call(&mut self) -> Option<ReceivedCall> {
        loop {
            match self.recv().await? {
                Outbound::Text(text) if text == PING_FRAME => {}
                Outbound::Text(text) => {
                    let value: Value = serde_json::from_str(&text).ok()?;
                    return Some(ReceivedCall {
                        id: value.get("id")?.as_u64()?,
                        action: value.get("action")?.as_str()?.to_string(),
                        params: value.get("params").cloned().unwrap_or(Value::Null),
                    });
                }
                Outbound::Close { .. } => return None,
            }
        }
    }

    /// Wait for the session's close frame and echo it back, completing the
    /// closing handshake. Returns the code and reason the session sent.
    pub async fn echo_close(&mut self) -> Option<(u16, String)> {
        loop {
            if let Outbound::Close { code, reason } = self.recv().await? {
                self.close(code, &reason);
                return Some((code, reason));
            }
        }
    }

    /// Send a raw text frame. Returns `false` if the session dropped the link.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_session.send(Inbound::Text(text.into())).is_ok()
    }

    /// Send a JSON frame.
    pub fn send_json(&self, value: &Value) -> bool {
        self.send_text(value.to_string())
    }

    /// Send the handshake acceptance (or refusal) frame.
    pub fn authenticate(&self, success: bool) -> bool {
        self.send_json(&json!({"event": AUTHENTICATED_EVENT, "payload": {"success": success}}))
    }

    /// Answer call `id` with a result.
    pub fn respond(&self, id: u64, result: Value) -> bool {
        self.send_json(&json!({"id": id, "result": result}))
    }

    /// Answer call `id` with an error.
    pub fn respond_error(&self, id: u64, code: i64, message: &str) -> bool {
        self.send_json(&json!({"id": id, "error": {"code": code, "message": message}}))
    }

    /// Push an event.
    pub fn push(&self, event: &str, payload: Value) -> bool {
        self.send_json(&json!({"event": event, "payload": payload}))
    }

    /// Close the link from the remote side.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.to_session.send(Inbound::Closed {
            code,
            reason: reason.to_string(),
        });
    }
}
