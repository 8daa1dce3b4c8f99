//! In-flight request correlation
//!
//! The tracker is the one piece of state shared between the connection task
//! and callers issuing requests. Every entry reaches exactly one terminal
//! outcome: `resolve` removes the entry atomically with the lookup, and the
//! eviction paths drain entries under the same lock. Completion callbacks
//! always run after the lock is released.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::error::{RequestFailure, TrackerError};

/// Outcome delivered to the issuer of an outbound request
pub type RequestOutcome = Result<Value, RequestFailure>;

/// An outbound request awaiting its response
#[derive(Debug)]
pub struct PendingRequest {
    /// Correlation id
    pub id: String,
    /// Method that was invoked
    pub method: String,
    /// Wall-clock submission time
    pub submitted_at: DateTime<Utc>,
    deadline: Option<Instant>,
    reply: Option<oneshot::Sender<RequestOutcome>>,
}

impl PendingRequest {
    /// Deliver the terminal outcome to whoever is waiting, if anyone.
    pub fn complete(mut self, outcome: RequestOutcome) {
        if let Some(reply) = self.reply.take() {
            // The caller may have dropped its handle; that is not an error.
            let _ = reply.send(outcome);
        }
    }

    /// Time this entry has been in flight
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.submitted_at
    }
}

/// Caller-side handle for an outbound request
#[derive(Debug)]
pub struct ResponseHandle {
    id: String,
    rx: oneshot::Receiver<RequestOutcome>,
}

impl ResponseHandle {
    /// Correlation id assigned to the request
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the paired response.
    ///
    /// A tracker entry dropped without completion is reported as a closed
    /// connection.
    pub async fn wait(self) -> RequestOutcome {
        self.rx
            .await
            .unwrap_or(Err(RequestFailure::ConnectionClosed))
    }
}

/// Thread-safe map of in-flight request ids
#[derive(Debug, Default)]
pub struct RequestTracker {
    pending: Mutex<HashMap<String, PendingRequest>>,
}

impl RequestTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request nobody waits on.
    pub fn register(&self, id: &str, method: &str) -> Result<(), TrackerError> {
        self.insert(id, method, None, None)
    }

    /// Record a request and hand back a handle that receives its outcome.
    pub fn register_awaiting(
        &self,
        id: &str,
        method: &str,
        timeout: Option<Duration>,
    ) -> Result<ResponseHandle, TrackerError> {
        let (tx, rx) = oneshot::channel();
        let deadline = timeout.map(|t| Instant::now() + t);
        self.insert(id, method, deadline, Some(tx))?;
        Ok(ResponseHandle {
            id: id.to_string(),
            rx,
        })
    }

    fn insert(
        &self,
        id: &str,
        method: &str,
        deadline: Option<Instant>,
        reply: Option<oneshot::Sender<RequestOutcome>>,
    ) -> Result<(), TrackerError> {
        let mut pending = self.pending.lock();
        if pending.contains_key(id) {
            return Err(TrackerError::DuplicateId(id.to_string()));
        }
        pending.insert(
            id.to_string(),
            PendingRequest {
                id: id.to_string(),
                method: method.to_string(),
                submitted_at: Utc::now(),
                deadline,
                reply,
            },
        );
        Ok(())
    }

    /// Remove and return the entry for `id`.
    pub fn resolve(&self, id: &str) -> Result<PendingRequest, TrackerError> {
        self.pending
            .lock()
            .remove(id)
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))
    }

    /// Drain every entry.
    pub fn evict_all(&self) -> Vec<PendingRequest> {
        let mut pending = self.pending.lock();
        pending.drain().map(|(_, request)| request).collect()
    }

    /// Drain entries whose deadline is at or before `now`.
    pub fn evict_expired(&self, now: Instant) -> Vec<PendingRequest> {
        let mut pending = self.pending.lock();
        let expired: Vec<String> = pending
            .iter()
            .filter(|(_, request)| request.deadline.is_some_and(|d| d <= now))
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| pending.remove(&id))
            .collect()
    }

    /// Whether `id` is in flight
    pub fn contains(&self, id: &str) -> bool {
        self.pending.lock().contains_key(id)
    }

    /// Number of in-flight requests
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// True when nothing is in flight
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolve_yields_entry_exactly_once() {
        let tracker = RequestTracker::new();
        tracker.register("req_1_abcd1234", "get_server_status").unwrap();

        let entry = tracker.resolve("req_1_abcd1234").unwrap();
        assert_eq!(entry.method, "get_server_status");
        assert_eq!(
            tracker.resolve("req_1_abcd1234").unwrap_err(),
            TrackerError::NotFound("req_1_abcd1234".into())
        );
        assert!(tracker.is_empty());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let tracker = RequestTracker::new();
        tracker.register("a", "x").unwrap();
        assert_eq!(
            tracker.register("a", "y").unwrap_err(),
            TrackerError::DuplicateId("a".into())
        );
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test]
    async fn eviction_reaches_awaiting_caller() {
        let tracker = RequestTracker::new();
        let handle = tracker.register_awaiting("a", "compile_blueprint", None).unwrap();
        tracker.register("b", "ping").unwrap();

        let evicted = tracker.evict_all();
        assert_eq!(evicted.len(), 2);
        for entry in evicted {
            entry.complete(Err(RequestFailure::ConnectionClosed));
        }
        assert_eq!(handle.wait().await, Err(RequestFailure::ConnectionClosed));
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn resolved_entry_delivers_result() {
        let tracker = RequestTracker::new();
        let handle = tracker.register_awaiting("a", "get_server_status", None).unwrap();
        assert_eq!(handle.id(), "a");

        tracker.resolve("a").unwrap().complete(Ok(json!({"online": true})));
        assert_eq!(handle.wait().await, Ok(json!({"online": true})));
    }

    #[tokio::test(start_paused = true)]
    async fn only_expired_entries_are_swept() {
        let tracker = RequestTracker::new();
        let _short = tracker
            .register_awaiting("short", "x", Some(Duration::from_secs(1)))
            .unwrap();
        let _long = tracker
            .register_awaiting("long", "x", Some(Duration::from_secs(10)))
            .unwrap();
        tracker.register("forever", "x").unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        let expired = tracker.evict_expired(Instant::now());
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "short");
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn dropped_handle_does_not_block_completion() {
        let tracker = RequestTracker::new();
        let handle = tracker.register_awaiting("a", "x", None).unwrap();
        drop(handle);
        tracker.resolve("a").unwrap().complete(Ok(Value::Null));
    }
}
