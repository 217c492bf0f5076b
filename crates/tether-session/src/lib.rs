//! # tether-session
//!
//! A persistent RPC and event session over one WebSocket connection.
//!
//! - **Session**: [`Session`] handle onto a single driver task that owns the link
//! - **Correlation**: [`correlator::Correlator`] matches responses to calls and enforces deadlines
//! - **Events**: [`dispatcher::Dispatcher`] fans pushed events out to listeners, isolating panics
//! - **Subscriptions**: [`subscriptions::SubscriptionRegistry`] remembers topics to replay after reconnects
//! - **Liveness**: [`heartbeat::Heartbeat`] probes and [`reconnect::ReconnectScheduler`] backoff
//! - **Transport**: [`transport::Connector`] seam with WebSocket and in-process implementations
//! - **Chat**: [`chat::ChatClient`] typed actions and events of the chat endpoint
//!
//! ## Crate Position
//!
//! Depends on tether-core and tether-settings. Depended on by the `tether` binary.

#![deny(unsafe_code)]

pub mod chat;
pub mod correlator;
pub mod dispatcher;
pub mod heartbeat;
pub mod metrics;
pub mod reconnect;
pub mod session;
pub mod subscriptions;
pub mod transport;

pub use chat::{ChatClient, ChatEvent};
pub use dispatcher::{ListenerHandle, PushEvent};
pub use session::{LinkState, Session, SessionStatus};
pub use tether_core::{Credential, SessionError};
pub use transport::{Connector, MemoryConnector, WsConnector};
