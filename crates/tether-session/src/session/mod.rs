//! The session handle.
//!
//! [`Session`] is a cheap clonable handle onto one driver task. Every clone
//! talks to the same connection; the driver exits (closing the connection)
//! once the last clone is dropped.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `driver` | The task owning all connection state |
//! | `status` | [`LinkState`] and the published [`SessionStatus`] |

mod driver;
mod status;

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tether_core::{Credential, SessionError};
use tether_settings::TetherSettings;
use tokio::sync::{mpsc, oneshot, watch};

use crate::dispatcher::{Dispatcher, ListenerHandle, PushEvent};
use crate::transport::{Connector, WsConnector};
use driver::{Command, Driver};

pub use driver::SUPERSEDED_REASON;
pub use status::{LinkState, SessionStatus};

/// Depth of the command queue between handles and the driver.
const COMMAND_QUEUE: usize = 64;

/// Handle to a persistent RPC/event session.
#[derive(Clone, Debug)]
pub struct Session {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SessionStatus>,
    dispatcher: Dispatcher,
}

impl Session {
    /// Spawn a session driver on the current Tokio runtime.
    pub fn new(settings: &TetherSettings, connector: Arc<dyn Connector>) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let dispatcher = Dispatcher::new();
        let driver = Driver::new(
            settings.clone(),
            connector,
            commands_rx,
            status_tx,
            dispatcher.clone(),
        );
        let _driver = tokio::spawn(driver.run());
        Self {
            commands: commands_tx,
            status: status_rx,
            dispatcher,
        }
    }

    /// Spawn a session connecting over WebSocket.
    pub fn websocket(settings: &TetherSettings) -> Self {
        Self::new(settings, Arc::new(WsConnector::new()))
    }

    /// Connect with `credential`.
    ///
    /// Returns once the attempt has started; use [`Session::ready`] or
    /// [`Session::watch_status`] to follow it. An empty or expired credential
    /// fails immediately without touching the network. Opening with the
    /// credential already in use is a no-op; a different credential replaces
    /// the live connection.
    pub async fn open(&self, credential: Credential) -> Result<(), SessionError> {
        self.request(|reply| Command::Open { credential, reply })
            .await?
    }

    /// Close the connection, cancel any pending reconnect, forget the
    /// credential and the subscriptions. Listeners stay registered.
    pub async fn close(&self) {
        let _ = self.request(|reply| Command::Close { reply }).await;
    }

    /// Retry with the current credential after a failure or exhausted
    /// reconnects. A no-op while connecting or open.
    pub async fn reconnect(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Reconnect { reply }).await?
    }

    /// Perform a remote call. Fails with [`SessionError::NotConnected`] when
    /// no connection is open; calls are never queued.
    pub async fn call(&self, action: &str, params: Option<Value>) -> Result<Value, SessionError> {
        self.request(|reply| Command::Call {
            action: action.to_string(),
            params,
            reply,
        })
        .await?
    }

    /// Perform a remote call with typed params and result.
    pub async fn call_as<P, R>(&self, action: &str, params: &P) -> Result<R, SessionError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let params = (!params.is_null()).then_some(params);
        let value = self.call(action, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Subscribe to `topic`. The topic is remembered (and replayed after
    /// reconnects) only if the call succeeds. Subscribing to a remembered
    /// topic succeeds without a call.
    pub async fn subscribe(&self, topic: &str) -> Result<(), SessionError> {
        self.request(|reply| Command::Subscribe {
            topic: topic.to_string(),
            reply,
        })
        .await?
        .map(|_| ())
    }

    /// Unsubscribe from `topic`. The topic is forgotten whatever the call's
    /// outcome.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), SessionError> {
        self.request(|reply| Command::Unsubscribe {
            topic: topic.to_string(),
            reply,
        })
        .await?
        .map(|_| ())
    }

    /// Topics currently remembered, in subscription order.
    pub async fn subscriptions(&self) -> Vec<String> {
        self.request(|reply| Command::Subscriptions { reply })
            .await
            .unwrap_or_default()
    }

    /// Register a listener for every pushed event.
    pub fn add_listener(
        &self,
        listener: impl Fn(&PushEvent) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.dispatcher.add(listener)
    }

    /// Latest status snapshot.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every status change.
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Wait until the connection is open and every subscription has been
    /// replayed.
    ///
    /// Fails with the session's error once nothing more will happen without
    /// caller action: a terminal failure, a normal close, or exhausted
    /// reconnects. Fails with [`SessionError::NotConnected`] if the session
    /// was never opened.
    pub async fn ready(&self) -> Result<(), SessionError> {
        let mut status = self.status.clone();
        let snapshot = status
            .wait_for(|s| s.ready || s.state == LinkState::Idle || s.awaits_caller())
            .await
            .map_err(|_| SessionError::Shutdown)?
            .clone();
        if snapshot.ready {
            Ok(())
        } else if snapshot.state == LinkState::Idle {
            Err(SessionError::NotConnected)
        } else {
            Err(snapshot.error.unwrap_or(SessionError::ConnectionClosed))
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| SessionError::Shutdown)?;
        rx.await.map_err(|_| SessionError::Shutdown)
    }
}
