#![allow(missing_docs)]

use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tether_session::{Credential, LinkState, Session, SessionError};
use tether_settings::TetherSettings;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

/// What the loopback server observed.
#[derive(Debug, Default)]
struct Observed {
    uri: String,
    actions: Vec<String>,
    close_code: Option<u16>,
}

/// Accept one connection, acknowledge the credential, answer `echo` calls
/// with their params and `fail` calls with an error, and push one event
/// after the first call.
async fn serve_once(listener: TcpListener) -> Observed {
    let (stream, _) = listener.accept().await.unwrap();
    let mut observed = Observed::default();
    let uri = &mut observed.uri;
    let mut ws = accept_hdr_async(stream, |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        *uri = req.uri().to_string();
        Ok(resp)
    })
    .await
    .unwrap();

    ws.send(Message::text(
        json!({"event": "authenticated", "payload": {"success": true}}).to_string(),
    ))
    .await
    .unwrap();

    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let call: Value = serde_json::from_str(text.as_str()).unwrap();
                let action = call["action"].as_str().unwrap_or_default().to_string();
                let reply = match action.as_str() {
                    "ping" => json!({"event": "pong"}),
                    "fail" => json!({"id": call["id"], "error": {"code": 400, "message": "bad"}}),
                    _ => json!({"id": call["id"], "result": call["params"]}),
                };
                if observed.actions.is_empty() {
                    ws.send(Message::text(
                        json!({"event": "new_message", "payload": {"chatId": "c1"}}).to_string(),
                    ))
                    .await
                    .unwrap();
                }
                observed.actions.push(action);
                ws.send(Message::text(reply.to_string())).await.unwrap();
            }
            Ok(Message::Close(frame)) => {
                observed.close_code = frame.map(|f| u16::from(f.code));
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    observed
}

#[tokio::test]
async fn session_round_trips_over_a_real_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(serve_once(listener));

    let mut settings = TetherSettings::default();
    settings.endpoint.base_url = format!("ws://{addr}/ws");
    let session = Session::websocket(&settings);

    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    let _listener = session.add_listener(move |event| {
        let _ = events_tx.send(event.topic.clone());
    });

    session
        .open(Credential::new("abc.def", Utc::now() + chrono::Duration::hours(1)))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), session.ready())
        .await
        .unwrap()
        .unwrap();

    let echoed = session.call("echo", Some(json!({"x": 1}))).await.unwrap();
    assert_eq!(echoed, json!({"x": 1}));
    assert_eq!(events_rx.recv().await.as_deref(), Some("new_message"));

    assert_eq!(
        session.call("fail", None).await,
        Err(SessionError::Remote {
            code: 400,
            message: "bad".into()
        })
    );

    session.close().await;
    let mut status = session.watch_status();
    let _ = tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| s.state == LinkState::Closed),
    )
    .await
    .unwrap()
    .unwrap();

    let observed = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(observed.uri, "/ws/chat?token=abc.def");
    assert_eq!(observed.actions, vec!["echo", "fail"]);
    assert_eq!(observed.close_code, Some(1000));
}

#[tokio::test]
async fn refused_port_schedules_a_reconnect() {
    // Bind then drop to get a port nothing listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let mut settings = TetherSettings::default();
    settings.endpoint.base_url = format!("ws://{addr}/ws");
    settings.reconnect.base_delay_ms = 60_000;
    let session = Session::websocket(&settings);

    session
        .open(Credential::new("tok", Utc::now() + chrono::Duration::hours(1)))
        .await
        .unwrap();
    let mut status = session.watch_status();
    let closed = tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| s.state == LinkState::Closed),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert!(closed.reconnect_pending);
    assert!(matches!(closed.error, Some(SessionError::Transport { .. })));
}
