//! Request/response correlation.
//!
//! Every call gets a fresh [`RequestId`] from a counter that starts at 1 and
//! never goes back, across reconnects included. The pending table holds one
//! [`PendingRequest`] per id until a matching frame, its deadline, or the
//! loss of the connection settles it. Deadlines are plain fields swept by
//! [`Correlator::expire`]; there is no timer per request.

use std::collections::BTreeMap;
use std::time::Duration;

use metrics::{counter, gauge};
use serde_json::Value;
use tether_core::{RequestId, SessionError};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::metrics::{SESSION_CALL_ERRORS_TOTAL, SESSION_PENDING_REQUESTS};

/// Outcome delivered to the caller of a remote call.
pub type CallResult = Result<Value, SessionError>;

/// Why a request was issued.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Purpose {
    /// Application call.
    App,
    /// `subscribe` issued by the application; the topic is recorded on success.
    Subscribe(String),
    /// `subscribe` re-issued after a reconnect.
    Replay(String),
}

/// One in-flight call.
#[derive(Debug)]
pub struct PendingRequest {
    action: String,
    reply: Option<oneshot::Sender<CallResult>>,
    created_at: Instant,
    deadline: Instant,
    purpose: Purpose,
}

/// A request removed from the table, with how it settled.
#[derive(Debug, PartialEq, Eq)]
pub struct Settled {
    /// Correlation id.
    pub id: RequestId,
    /// Why it was issued.
    pub purpose: Purpose,
    /// The error it settled with, if any.
    pub error: Option<SessionError>,
}

/// Id allocator plus pending-request table.
#[derive(Debug)]
pub struct Correlator {
    next_id: u64,
    timeout: Duration,
    pending: BTreeMap<RequestId, PendingRequest>,
}

impl Correlator {
    /// Create an empty correlator with the given per-call deadline.
    pub fn new(timeout: Duration) -> Self {
        Self {
            next_id: 1,
            timeout,
            pending: BTreeMap::new(),
        }
    }

    /// Allocate the next id.
    pub fn next_id(&mut self) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Track a request sent at `now`.
    pub fn track(
        &mut self,
        id: RequestId,
        action: &str,
        purpose: Purpose,
        reply: Option<oneshot::Sender<CallResult>>,
        now: Instant,
    ) {
        let entry = PendingRequest {
            action: action.to_string(),
            reply,
            created_at: now,
            deadline: now + self.timeout,
            purpose,
        };
        if self.pending.insert(id, entry).is_some() {
            warn!(request_id = %id, "request id reused");
        }
        self.report_depth();
    }

    /// Settle the request `id` with `outcome`. Unknown ids are ignored.
    pub fn settle(&mut self, id: RequestId, outcome: CallResult) -> Option<Settled> {
        let Some(entry) = self.pending.remove(&id) else {
            debug!(request_id = %id, "response for unknown request ignored");
            return None;
        };
        self.report_depth();
        debug!(
            request_id = %id,
            action = %entry.action,
            elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "request settled"
        );
        Some(finish(id, entry, outcome))
    }

    /// Reject every request whose deadline is at or before `now` with
    /// [`SessionError::Timeout`].
    pub fn expire(&mut self, now: Instant) -> Vec<Settled> {
        let due: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        let after_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        let mut settled = Vec::with_capacity(due.len());
        for id in due {
            if let Some(entry) = self.pending.remove(&id) {
                warn!(request_id = %id, action = %entry.action, after_ms, "request timed out");
                let error = SessionError::Timeout {
                    action: entry.action.clone(),
                    after_ms,
                };
                settled.push(finish(id, entry, Err(error)));
            }
        }
        if !settled.is_empty() {
            self.report_depth();
        }
        settled
    }

    /// Reject every pending request with `error` and clear the table.
    pub fn reject_all(&mut self, error: &SessionError) -> Vec<Settled> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        let pending = std::mem::take(&mut self.pending);
        debug!(count = pending.len(), error = %error, "rejecting pending requests");
        let settled = pending
            .into_iter()
            .map(|(id, entry)| finish(id, entry, Err(error.clone())))
            .collect();
        self.report_depth();
        settled
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|entry| entry.deadline).min()
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn report_depth(&self) {
        gauge!(SESSION_PENDING_REQUESTS).set(self.pending.len() as f64);
    }
}

fn finish(id: RequestId, entry: PendingRequest, outcome: CallResult) -> Settled {
    let error = outcome.as_ref().err().cloned();
    if let Some(ref e) = error {
        counter!(
            SESSION_CALL_ERRORS_TOTAL,
            "action" => entry.action.clone(),
            "error_type" => e.kind()
        )
        .increment(1);
    }
    if let Some(reply) = entry.reply {
        // The caller may have stopped waiting.
        let _ = reply.send(outcome);
    }
    Settled {
        id,
        purpose: entry.purpose,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_secs(20);

    fn tracked(c: &mut Correlator, action: &str) -> (RequestId, oneshot::Receiver<CallResult>) {
        let (tx, rx) = oneshot::channel();
        let id = c.next_id();
        c.track(id, action, Purpose::App, Some(tx), Instant::now());
        (id, rx)
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let mut c = Correlator::new(TIMEOUT);
        assert_eq!(c.next_id(), RequestId(1));
        assert_eq!(c.next_id(), RequestId(2));
        assert_eq!(c.next_id(), RequestId(3));
    }

    #[tokio::test(start_paused = true)]
    async fn settle_resolves_matching_request() {
        let mut c = Correlator::new(TIMEOUT);
        let (id, rx) = tracked(&mut c, "echo");
        let settled = c.settle(id, Ok(json!({"x": 1}))).unwrap();
        assert_eq!(settled.error, None);
        assert_eq!(settled.purpose, Purpose::App);
        assert_eq!(rx.await.unwrap().unwrap(), json!({"x": 1}));
        assert!(c.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_id_is_ignored() {
        let mut c = Correlator::new(TIMEOUT);
        let (_id, _rx) = tracked(&mut c, "echo");
        assert!(c.settle(RequestId(99), Ok(Value::Null)).is_none());
        assert_eq!(c.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expire_times_out_once() {
        let mut c = Correlator::new(TIMEOUT);
        let start = Instant::now();
        let (id, rx) = tracked(&mut c, "getChats");
        assert_eq!(c.next_deadline(), Some(start + TIMEOUT));
        assert!(c.expire(start + Duration::from_secs(19)).is_empty());

        let settled = c.expire(start + TIMEOUT);
        assert_eq!(settled.len(), 1);
        assert!(settled[0].error.is_some());
        assert_matches!(
            rx.await.unwrap(),
            Err(SessionError::Timeout { ref action, after_ms: 20_000 }) if action == "getChats"
        );

        // A late response finds nothing.
        assert!(c.settle(id, Ok(Value::Null)).is_none());
        assert!(c.expire(start + TIMEOUT * 2).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reject_all_settles_every_request() {
        let mut c = Correlator::new(TIMEOUT);
        let receivers: Vec<_> = (0..4).map(|_| tracked(&mut c, "echo")).collect();
        let settled = c.reject_all(&SessionError::ConnectionClosed);
        assert_eq!(settled.len(), 4);
        assert!(c.is_empty());
        assert_eq!(c.next_deadline(), None);
        for (id, rx) in receivers {
            assert_eq!(rx.await.unwrap(), Err(SessionError::ConnectionClosed));
            assert!(c.settle(id, Ok(Value::Null)).is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn purpose_survives_settlement() {
        let mut c = Correlator::new(TIMEOUT);
        let id = c.next_id();
        c.track(id, "subscribe", Purpose::Replay("c1".into()), None, Instant::now());
        let settled = c.settle(id, Err(SessionError::NotConnected)).unwrap();
        assert_eq!(settled.purpose, Purpose::Replay("c1".into()));
        assert_eq!(settled.error, Some(SessionError::NotConnected));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_caller_does_not_break_settlement() {
        let mut c = Correlator::new(TIMEOUT);
        let (id, rx) = tracked(&mut c, "echo");
        drop(rx);
        assert!(c.settle(id, Ok(Value::Null)).is_some());
    }

    proptest::proptest! {
        #[test]
        fn ids_never_repeat(n in 1usize..500) {
            let mut c = Correlator::new(TIMEOUT);
            let mut seen = std::collections::HashSet::new();
            for _ in 0..n {
                proptest::prop_assert!(seen.insert(c.next_id()));
            }
        }
    }
}
