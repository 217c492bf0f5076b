//! WebSocket transport over `tokio-tungstenite`.
//!
//! Each link runs two tasks: a writer draining [`Outbound`] into the socket
//! and a reader forwarding text frames as [`Inbound::Text`]. The reader ends
//! with exactly one [`Inbound::Closed`], carrying the peer's close code or
//! 1006 when the stream ended without a close frame. It also stops as soon
//! as the session drops the [`Link`], which releases the socket even when
//! the peer never answers a close frame.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tether_core::close_code::{ABNORMAL, NO_STATUS};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, instrument, trace, warn};

use super::{Connector, Inbound, Link, Outbound, TransportError, loggable_url};

/// Production connector.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Create a connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    #[instrument(skip_all, fields(url = loggable_url(url)))]
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        let (stream, response) = connect_async(url).await.map_err(map_connect_error)?;
        debug!(status = response.status().as_u16(), "websocket upgraded");

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Inbound>();

        let _writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let (message, closing) = match frame {
                    Outbound::Text(text) => (Message::text(text), false),
                    Outbound::Close { code, reason } => (
                        Message::Close(Some(CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        })),
                        true,
                    ),
                };
                if let Err(e) = sink.send(message).await {
                    debug!(error = %e, "websocket write failed");
                    return;
                }
                if closing {
                    return;
                }
            }
            // Session dropped the link without a close frame.
            let _ = sink.send(Message::Close(None)).await;
        });

        let _reader = tokio::spawn(async move {
            let closed = loop {
                let next = tokio::select! {
                    next = source.next() => next,
                    () = in_tx.closed() => {
                        debug!("link dropped, releasing socket");
                        return;
                    }
                };
                match next {
                    Some(Ok(Message::Text(text))) => {
                        if in_tx.send(Inbound::Text(text.as_str().to_owned())).is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => Inbound::Closed {
                                code: u16::from(frame.code),
                                reason: frame.reason.as_str().to_owned(),
                            },
                            None => Inbound::Closed {
                                code: NO_STATUS,
                                reason: String::new(),
                            },
                        };
                    }
                    Some(Ok(other)) => {
                        trace!(kind = message_kind(&other), "ignoring non-text frame");
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read failed");
                        break Inbound::Closed {
                            code: ABNORMAL,
                            reason: e.to_string(),
                        };
                    }
                    None => {
                        break Inbound::Closed {
                            code: ABNORMAL,
                            reason: "stream ended".into(),
                        };
                    }
                }
            };
            let _ = in_tx.send(closed);
        });

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

fn map_connect_error(error: WsError) -> TransportError {
    match error {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                TransportError::Rejected { status }
            } else {
                TransportError::Connect {
                    reason: format!("upgrade refused with HTTP {status}"),
                }
            }
        }
        other => TransportError::Connect {
            reason: other.to_string(),
        },
    }
}

fn message_kind(message: &Message) -> &'static str {
    match message {
        Message::Text(_) => "text",
        Message::Binary(_) => "binary",
        Message::Ping(_) => "ping",
        Message::Pong(_) => "pong",
        Message::Close(_) => "close",
        Message::Frame(_) => "frame",
    }
}
