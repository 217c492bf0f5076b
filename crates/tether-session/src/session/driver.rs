//! The session driver.
//!
//! One task owns every piece of mutable session state: the link, the
//! credential, the pending table, the subscription registry and the three
//! timers. Commands from [`Session`](super::Session) handles, transport
//! frames, connect outcomes and timer expiries are all handled sequentially
//! inside [`Driver::run`]'s loop, so no state is ever shared or locked.
//!
//! Connects run in spawned tasks tagged with a generation number. Bumping
//! the generation detaches whatever connect is in flight: the task is
//! aborted and any outcome it already produced is discarded on arrival. The
//! handshake window is armed when the connect starts, so it bounds the
//! transport upgrade and the acceptance frame together.

use std::future::pending;
use std::sync::Arc;

use metrics::counter;
use serde_json::{Map, Value};
use tether_core::close_code::{self, CloseClass};
use tether_core::text::truncate_str;
use tether_core::wire::{self, Frame};
use tether_core::{Credential, SessionError};
use tether_settings::TetherSettings;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace, warn};

use super::status::{LinkState, SessionStatus};
use crate::correlator::{CallResult, Correlator, Purpose};
use crate::dispatcher::{Dispatcher, PushEvent};
use crate::heartbeat::Heartbeat;
use crate::metrics::{
    SESSION_CALLS_TOTAL, SESSION_CONNECTS_TOTAL, SESSION_DISCONNECTS_TOTAL,
    SESSION_MALFORMED_FRAMES_TOTAL, SESSION_RECONNECTS_SCHEDULED_TOTAL,
};
use crate::reconnect::{BackoffPolicy, ReconnectScheduler, Schedule};
use crate::subscriptions::SubscriptionRegistry;
use crate::transport::{
    Connector, Inbound, Link, Outbound, TransportError, endpoint_url, loggable_url,
};

/// Close reason sent when a new credential replaces the live one.
pub const SUPERSEDED_REASON: &str = "credential superseded";

/// Longest frame excerpt included in malformed-frame logs.
const MALFORMED_EXCERPT_BYTES: usize = 200;

/// Requests from session handles.
pub(crate) enum Command {
    Open {
        credential: Credential,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
    Reconnect {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Call {
        action: String,
        params: Option<Value>,
        reply: oneshot::Sender<CallResult>,
    },
    Subscribe {
        topic: String,
        reply: oneshot::Sender<CallResult>,
    },
    Unsubscribe {
        topic: String,
        reply: oneshot::Sender<CallResult>,
    },
    Subscriptions {
        reply: oneshot::Sender<Vec<String>>,
    },
}

struct ConnectOutcome {
    generation: u64,
    result: Result<Link, TransportError>,
}

pub(crate) struct Driver {
    settings: TetherSettings,
    connector: Arc<dyn Connector>,
    commands: mpsc::Receiver<Command>,
    connects_tx: mpsc::UnboundedSender<ConnectOutcome>,
    connects_rx: mpsc::UnboundedReceiver<ConnectOutcome>,
    status: watch::Sender<SessionStatus>,
    dispatcher: Dispatcher,

    state: LinkState,
    credential: Option<Credential>,
    generation: u64,
    connecting: Option<JoinHandle<()>>,
    link: Option<Link>,
    correlator: Correlator,
    heartbeat: Heartbeat,
    reconnect: ReconnectScheduler,
    subscriptions: SubscriptionRegistry,
    handshake_deadline: Option<Instant>,
    closing_deadline: Option<Instant>,
    replays_outstanding: usize,
    ready: bool,
    error: Option<SessionError>,
}

impl Driver {
    pub(crate) fn new(
        settings: TetherSettings,
        connector: Arc<dyn Connector>,
        commands: mpsc::Receiver<Command>,
        status: watch::Sender<SessionStatus>,
        dispatcher: Dispatcher,
    ) -> Self {
        let (connects_tx, connects_rx) = mpsc::unbounded_channel();
        Self {
            correlator: Correlator::new(settings.rpc.call_timeout()),
            heartbeat: Heartbeat::new(&settings.heartbeat),
            reconnect: ReconnectScheduler::new(BackoffPolicy::from_settings(&settings.reconnect)),
            settings,
            connector,
            commands,
            connects_tx,
            connects_rx,
            status,
            dispatcher,
            state: LinkState::Idle,
            credential: None,
            generation: 0,
            connecting: None,
            link: None,
            subscriptions: SubscriptionRegistry::new(),
            handshake_deadline: None,
            closing_deadline: None,
            replays_outstanding: 0,
            ready: false,
            error: None,
        }
    }

    /// Process events until every session handle is dropped.
    pub(crate) async fn run(mut self) {
        loop {
            let wake = self.next_wake();
            tokio::select! {
                biased;
                inbound = next_inbound(&mut self.link) => self.on_inbound(inbound),
                Some(outcome) = self.connects_rx.recv() => self.on_connect_outcome(outcome),
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                () = sleep_or_pend(wake) => self.on_timers(Instant::now()),
            }
            self.publish();
        }
        self.shutdown();
    }

    // ── commands ────────────────────────────────────────────────────────

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Open { credential, reply } => {
                let result = self.open(credential);
                self.publish();
                let _ = reply.send(result);
            }
            Command::Close { reply } => {
                self.close();
                self.publish();
                let _ = reply.send(());
            }
            Command::Reconnect { reply } => {
                let result = self.reconnect_now();
                self.publish();
                let _ = reply.send(result);
            }
            Command::Call {
                action,
                params,
                reply,
            } => self.call(&action, params.as_ref(), Purpose::App, Some(reply)),
            Command::Subscribe { topic, reply } => {
                if self.subscriptions.contains(&topic) {
                    debug!(topic = %topic, "already subscribed");
                    let _ = reply.send(Ok(Value::Null));
                } else {
                    let params = self.topic_params(&topic);
                    self.call("subscribe", Some(&params), Purpose::Subscribe(topic), Some(reply));
                }
            }
            Command::Unsubscribe { topic, reply } => {
                if self.subscriptions.remove(&topic) {
                    info!(topic = %topic, "unsubscribed");
                }
                let params = self.topic_params(&topic);
                self.call("unsubscribe", Some(&params), Purpose::App, Some(reply));
            }
            Command::Subscriptions { reply } => {
                let _ = reply.send(self.subscriptions.topics());
            }
        }
    }

    fn open(&mut self, credential: Credential) -> Result<(), SessionError> {
        if credential.is_empty() {
            self.credential = None;
            self.fail(SessionError::MissingCredential);
            return Err(SessionError::MissingCredential);
        }
        if credential.is_expired() {
            warn!(credential = %credential.redacted(), "refusing to open with expired credential");
            self.credential = None;
            self.fail(SessionError::AuthExpired);
            return Err(SessionError::AuthExpired);
        }
        if self.state.is_active() && self.credential.as_ref() == Some(&credential) {
            debug!(state = %self.state, "open ignored, already active with this credential");
            return Ok(());
        }
        if self.link.is_some() || self.state == LinkState::Connecting {
            info!(state = %self.state, "replacing connection for new credential");
            self.detach(close_code::NORMAL, SUPERSEDED_REASON);
        }
        self.reconnect.reset();
        self.error = None;
        self.credential = Some(credential);
        self.start_connect();
        Ok(())
    }

    fn close(&mut self) {
        self.reconnect.reset();
        self.credential = None;
        self.error = None;

        if let Some(link) = &self.link {
            let _ = link.outbound.send(Outbound::Close {
                code: close_code::NORMAL,
                reason: "client closed".into(),
            });
            self.set_state(LinkState::Closing);
            self.closing_deadline = Some(Instant::now() + self.settings.handshake.timeout());
        } else {
            self.cancel_connect();
            if self.state != LinkState::Idle {
                self.set_state(LinkState::Closed);
            }
        }
        self.leave_open();
        self.reject_pending(&SessionError::ConnectionClosed);
    }

    fn reconnect_now(&mut self) -> Result<(), SessionError> {
        let Some(credential) = self.credential.clone() else {
            return Err(SessionError::MissingCredential);
        };
        if self.state.is_active() {
            debug!(state = %self.state, "reconnect ignored, already active");
            return Ok(());
        }
        if credential.is_expired() {
            self.credential = None;
            self.fail(SessionError::AuthExpired);
            return Err(SessionError::AuthExpired);
        }
        if self.link.is_some() {
            self.detach(close_code::NORMAL, "reconnect requested");
        }
        self.reconnect.reset();
        self.error = None;
        self.start_connect();
        Ok(())
    }

    fn call(
        &mut self,
        action: &str,
        params: Option<&Value>,
        purpose: Purpose,
        reply: Option<oneshot::Sender<CallResult>>,
    ) {
        match self.send_call(action, params) {
            Ok(id) => {
                counter!(SESSION_CALLS_TOTAL, "action" => action.to_string()).increment(1);
                debug!(request_id = %id, action, "call sent");
                self.correlator
                    .track(id, action, purpose, reply, Instant::now());
            }
            Err(error) => {
                debug!(action, error = %error, "call rejected before sending");
                if let Some(reply) = reply {
                    let _ = reply.send(Err(error.clone()));
                }
                self.after_settle(purpose, Some(error));
            }
        }
    }

    fn send_call(
        &mut self,
        action: &str,
        params: Option<&Value>,
    ) -> Result<tether_core::RequestId, SessionError> {
        if self.state != LinkState::Open {
            return Err(SessionError::NotConnected);
        }
        let Some(link) = &self.link else {
            return Err(SessionError::NotConnected);
        };
        let id = self.correlator.next_id();
        let text = wire::encode_call(id, action, params)?;
        link.outbound
            .send(Outbound::Text(text))
            .map_err(|_| SessionError::ConnectionClosed)?;
        Ok(id)
    }

    fn topic_params(&self, topic: &str) -> Value {
        let mut params = Map::new();
        let _ = params.insert(
            self.settings.rpc.topic_param.clone(),
            Value::String(topic.to_string()),
        );
        Value::Object(params)
    }

    // ── settlement ──────────────────────────────────────────────────────

    fn after_settle(&mut self, purpose: Purpose, error: Option<SessionError>) {
        match purpose {
            Purpose::App => {}
            Purpose::Subscribe(topic) => {
                if error.is_none() && self.subscriptions.insert(&topic) {
                    info!(topic = %topic, "subscribed");
                }
            }
            Purpose::Replay(topic) => {
                match error {
                    None => {}
                    Some(e @ SessionError::Remote { .. }) => {
                        warn!(topic = %topic, error = %e, "replay subscribe refused, dropping topic");
                        let _ = self.subscriptions.remove(&topic);
                    }
                    // Only a refusal from the endpoint drops the topic.
                    Some(e) => {
                        debug!(topic = %topic, error = %e, "replay subscribe unsettled, keeping topic");
                    }
                }
                self.replays_outstanding = self.replays_outstanding.saturating_sub(1);
                if self.replays_outstanding == 0 && self.state == LinkState::Open && !self.ready {
                    self.ready = true;
                    info!(topics = self.subscriptions.len(), "subscriptions replayed, session ready");
                }
            }
        }
    }

    fn reject_pending(&mut self, error: &SessionError) {
        for settled in self.correlator.reject_all(error) {
            self.after_settle(settled.purpose, settled.error);
        }
        self.replays_outstanding = 0;
    }

    // ── connection lifecycle ────────────────────────────────────────────

    fn start_connect(&mut self) {
        if self.credential.is_none() {
            return;
        }
        self.cancel_connect();
        let Some(credential) = &self.credential else {
            return;
        };
        let generation = self.generation;
        let url = endpoint_url(&self.settings.endpoint, credential);
        info!(
            generation,
            url = loggable_url(&url),
            credential = %credential.redacted(),
            "connecting"
        );
        self.set_state(LinkState::Connecting);
        self.ready = false;
        self.handshake_deadline = Some(Instant::now() + self.settings.handshake.timeout());
        counter!(SESSION_CONNECTS_TOTAL).increment(1);

        let connector = Arc::clone(&self.connector);
        let outcomes = self.connects_tx.clone();
        self.connecting = Some(tokio::spawn(async move {
            let result = connector.connect(&url).await;
            let _ = outcomes.send(ConnectOutcome { generation, result });
        }));
    }

    /// Detach and abort the connect in flight, if any.
    fn cancel_connect(&mut self) {
        self.generation += 1;
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
    }

    fn on_connect_outcome(&mut self, outcome: ConnectOutcome) {
        if outcome.generation != self.generation {
            debug!(
                generation = outcome.generation,
                current = self.generation,
                "discarding stale connect"
            );
            if let Ok(link) = outcome.result {
                let _ = link.outbound.send(Outbound::Close {
                    code: close_code::NORMAL,
                    reason: SUPERSEDED_REASON.into(),
                });
            }
            return;
        }

        self.connecting = None;
        match outcome.result {
            Ok(link) => {
                self.link = Some(link);
                if self.settings.handshake.require_auth_ack {
                    debug!("transport connected, awaiting credential acceptance");
                } else {
                    self.on_open();
                }
            }
            Err(TransportError::Rejected { status }) => {
                warn!(status, "endpoint rejected the credential during upgrade");
                self.fail(SessionError::AuthRejected {
                    reason: format!("upgrade rejected with HTTP {status}"),
                });
            }
            Err(TransportError::Connect { reason }) => {
                warn!(reason = %reason, "connect failed");
                self.handshake_deadline = None;
                self.set_state(LinkState::Closed);
                self.error = Some(SessionError::Transport { reason });
                self.schedule_reconnect();
            }
        }
    }

    fn on_open(&mut self) {
        self.handshake_deadline = None;
        self.set_state(LinkState::Open);
        self.error = None;
        self.reconnect.reset();
        self.heartbeat.start(Instant::now());
        info!("connection open");

        if self.subscriptions.is_empty() {
            self.ready = true;
            return;
        }
        let topics = self.subscriptions.topics();
        info!(count = topics.len(), "replaying subscriptions");
        self.ready = false;
        self.replays_outstanding = topics.len();
        for topic in topics {
            let params = self.topic_params(&topic);
            self.call("subscribe", Some(&params), Purpose::Replay(topic), None);
        }
    }

    fn on_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Text(raw) => self.on_frame(&raw),
            Inbound::Closed { code, reason } => self.on_transport_closed(code, &reason),
        }
    }

    fn on_frame(&mut self, raw: &str) {
        match wire::decode(raw) {
            Frame::Result { id, value } => {
                if let Some(settled) = self.correlator.settle(id, Ok(value)) {
                    self.after_settle(settled.purpose, settled.error);
                }
            }
            Frame::Error { id, error } => {
                if let Some(settled) = self.correlator.settle(id, Err(error.into())) {
                    self.after_settle(settled.purpose, settled.error);
                }
            }
            Frame::Event { topic, payload } => {
                let event = PushEvent { topic, payload };
                let delivered = self.dispatcher.dispatch(&event);
                trace!(topic = %event.topic, delivered, "event dispatched");
            }
            Frame::Authenticated { success } => self.on_authenticated(success),
            Frame::Pong => trace!("pong"),
            Frame::Malformed { reason } => {
                counter!(SESSION_MALFORMED_FRAMES_TOTAL).increment(1);
                warn!(reason = %reason, "dropping malformed frame");
                debug!(
                    frame = truncate_str(raw, MALFORMED_EXCERPT_BYTES),
                    "malformed frame"
                );
            }
        }
    }

    fn on_authenticated(&mut self, success: bool) {
        if self.state != LinkState::Connecting || self.link.is_none() {
            debug!(state = %self.state, success, "ignoring authenticated frame");
            return;
        }
        if success {
            self.on_open();
        } else {
            self.fail(SessionError::AuthRejected {
                reason: "credential refused by endpoint".into(),
            });
        }
    }

    fn on_transport_closed(&mut self, code: u16, reason: &str) {
        self.link = None;
        self.closing_deadline = None;
        counter!(SESSION_DISCONNECTS_TOTAL, "code" => code.to_string()).increment(1);
        let previous = self.state;
        info!(
            code,
            reason,
            state = %previous,
            pending = self.correlator.len(),
            "transport closed"
        );

        match previous {
            LinkState::Closing => {
                self.set_state(LinkState::Closed);
                self.leave_open();
                self.reject_pending(&SessionError::ConnectionClosed);
            }
            LinkState::Open | LinkState::Connecting => match CloseClass::of(code) {
                CloseClass::Normal => {
                    self.set_state(LinkState::Closed);
                    self.leave_open();
                    self.reject_pending(&SessionError::ConnectionClosed);
                }
                CloseClass::AuthRejected => {
                    let reason = if reason.is_empty() {
                        "Unauthorized".to_string()
                    } else {
                        reason.to_string()
                    };
                    self.fail(SessionError::AuthRejected { reason });
                }
                CloseClass::ProtocolViolation => {
                    self.fail(SessionError::ProtocolViolation {
                        code,
                        reason: reason.to_string(),
                    });
                }
                CloseClass::Retriable => {
                    self.set_state(LinkState::Closed);
                    self.leave_open();
                    self.error = Some(SessionError::Transport {
                        reason: format!("connection closed with code {code}"),
                    });
                    self.reject_pending(&SessionError::ConnectionClosed);
                    self.schedule_reconnect();
                }
            },
            LinkState::Idle | LinkState::Closed | LinkState::Failed => {
                debug!(state = %previous, "close on detached link ignored");
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.credential.is_none() {
            return;
        }
        match self.reconnect.schedule(Instant::now()) {
            Schedule::Armed { attempt, delay } => {
                counter!(SESSION_RECONNECTS_SCHEDULED_TOTAL).increment(1);
                info!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "reconnect scheduled"
                );
            }
            Schedule::Exhausted { attempts } => {
                warn!(attempts, "reconnect attempts exhausted");
                self.error = Some(SessionError::ReconnectExhausted { attempts });
            }
            Schedule::Disabled => debug!("automatic reconnect disabled"),
        }
    }

    fn fire_reconnect(&mut self) {
        if self.state != LinkState::Closed {
            debug!(state = %self.state, "reconnect skipped");
            return;
        }
        let Some(credential) = &self.credential else {
            debug!("reconnect skipped, no credential");
            return;
        };
        if credential.is_expired() {
            warn!("credential expired before reconnect");
            self.credential = None;
            self.fail(SessionError::AuthExpired);
            return;
        }
        info!(attempt = self.reconnect.attempt(), "reconnecting");
        self.start_connect();
    }

    /// Enter `Failed`: drop the link, cancel timers, reject pending calls.
    fn fail(&mut self, error: SessionError) {
        warn!(error = %error, kind = error.kind(), "session failed");
        self.set_state(LinkState::Failed);
        self.error = Some(error);
        self.reconnect.cancel();
        self.detach(close_code::NORMAL, "session failed");
    }

    /// Close and forget the current link (if any) and any connect in flight.
    fn detach(&mut self, code: u16, reason: &str) {
        self.cancel_connect();
        if let Some(link) = self.link.take() {
            let _ = link.outbound.send(Outbound::Close {
                code,
                reason: reason.to_string(),
            });
        }
        self.closing_deadline = None;
        self.leave_open();
        self.reject_pending(&SessionError::ConnectionClosed);
    }

    fn leave_open(&mut self) {
        self.heartbeat.stop();
        self.handshake_deadline = None;
        self.ready = false;
    }

    fn set_state(&mut self, next: LinkState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "state change");
            self.state = next;
        }
    }

    // ── timers ──────────────────────────────────────────────────────────

    fn next_wake(&self) -> Option<Instant> {
        [
            self.heartbeat.deadline(),
            self.reconnect.deadline(),
            self.handshake_deadline,
            self.closing_deadline,
            self.correlator.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn on_timers(&mut self, now: Instant) {
        if self.handshake_deadline.is_some_and(|at| at <= now) {
            self.handshake_deadline = None;
            warn!(
                timeout_ms = self.settings.handshake.timeout_ms,
                linked = self.link.is_some(),
                "handshake timed out"
            );
            self.fail(SessionError::HandshakeTimeout);
        }

        if self.closing_deadline.is_some_and(|at| at <= now) {
            self.closing_deadline = None;
            if self.state == LinkState::Closing {
                debug!("closing handshake timed out, dropping link");
                self.link = None;
                self.set_state(LinkState::Closed);
            }
        }

        for settled in self.correlator.expire(now) {
            self.after_settle(settled.purpose, settled.error);
        }

        if self.heartbeat.poll_due(now)
            && let Some(link) = &self.link
        {
            trace!("ping");
            let _ = link.outbound.send(Outbound::Text(wire::encode_ping()));
        }

        if self.reconnect.take_due(now) {
            self.fire_reconnect();
        }
    }

    // ── status ──────────────────────────────────────────────────────────

    fn publish(&self) {
        let next = SessionStatus {
            state: self.state,
            ready: self.ready,
            error: self.error.clone(),
            reconnect_attempt: self.reconnect.attempt(),
            reconnect_pending: self.reconnect.deadline().is_some(),
        };
        let _ = self.status.send_if_modified(move |current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn shutdown(&mut self) {
        info!("all session handles dropped, shutting down");
        self.reconnect.reset();
        self.credential = None;
        if let Some(link) = self.link.take() {
            let _ = link.outbound.send(Outbound::Close {
                code: close_code::NORMAL,
                reason: "session dropped".into(),
            });
        }
        self.cancel_connect();
        self.leave_open();
        let _ = self.correlator.reject_all(&SessionError::Shutdown);
        if self.state != LinkState::Idle {
            self.set_state(LinkState::Closed);
        }
        self.publish();
    }
}

async fn next_inbound(link: &mut Option<Link>) -> Inbound {
    match link {
        Some(link) => link.inbound.recv().await.unwrap_or_else(|| Inbound::Closed {
            code: close_code::ABNORMAL,
            reason: "transport dropped".into(),
        }),
        None => pending().await,
    }
}

async fn sleep_or_pend(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}
