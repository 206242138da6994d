//! Request/response correlation.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use claw_pwa_core::error::{ClawPwaError, Result};
use claw_pwa_core::protocol::ErrorShape;

/// What came back for one request.
#[derive(Debug, Clone)]
pub struct ResponseOutcome {
    pub ok: bool,
    pub payload: Option<Value>,
    pub error: Option<ErrorShape>,
}

impl ResponseOutcome {
    /// Turn the outcome into the payload, or a request-level error.
    pub fn into_result(self, method: &str) -> Result<Option<Value>> {
        if self.ok {
            return Ok(self.payload);
        }
        Err(ClawPwaError::Request {
            method: method.to_string(),
            error: self
                .error
                .unwrap_or_else(|| ErrorShape::new("unknown", "Request failed without error detail")),
        })
    }
}

pub type ResponseReceiver = oneshot::Receiver<Result<ResponseOutcome>>;

struct Pending {
    method: String,
    tx: oneshot::Sender<Result<ResponseOutcome>>,
}

/// Allocates request ids and matches responses back to their callers.
///
/// Ids are `"1"`, `"2"`, ... in allocation order and never reused within one
/// connection. Each pending request is completed at most once.
#[derive(Default)]
pub struct Correlator {
    last_id: u64,
    pending: HashMap<String, Pending>,
    closed: bool,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next id without registering a waiter (used by the handshake).
    pub fn allocate_id(&mut self) -> String {
        self.last_id += 1;
        self.last_id.to_string()
    }

    /// Allocate an id for `method` and register a waiter for its response.
    ///
    /// Fails with [`ClawPwaError::Closed`] once the connection is gone.
    pub fn register(&mut self, method: &str) -> Result<(String, ResponseReceiver)> {
        if self.closed {
            return Err(ClawPwaError::Closed);
        }
        let id = self.allocate_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id.clone(),
            Pending {
                method: method.to_string(),
                tx,
            },
        );
        Ok((id, rx))
    }

    /// Complete the waiter for `id`. Returns false for unknown or stale ids.
    pub fn resolve(&mut self, id: &str, outcome: ResponseOutcome) -> bool {
        match self.pending.remove(id) {
            Some(pending) => {
                debug!(id, method = %pending.method, ok = outcome.ok, "Response matched");
                // The caller may have stopped waiting; that is fine.
                let _ = pending.tx.send(Ok(outcome));
                true
            }
            None => {
                debug!(id, "Discarding response with no pending request");
                false
            }
        }
    }

    /// Drop the waiter for `id` without completing it (send failed).
    pub fn cancel(&mut self, id: &str) {
        self.pending.remove(id);
    }

    /// Fail every pending request and refuse new ones. Returns how many failed.
    pub fn fail_all(&mut self, make_error: impl Fn() -> ClawPwaError) -> usize {
        self.closed = true;
        let count = self.pending.len();
        for (id, pending) in self.pending.drain() {
            debug!(id, method = %pending.method, "Failing pending request");
            let _ = pending.tx.send(Err(make_error()));
        }
        count
    }

    pub fn method_of(&self, id: &str) -> Option<&str> {
        self.pending.get(id).map(|p| p.method.as_str())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok(payload: Value) -> ResponseOutcome {
        ResponseOutcome {
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    #[test]
    fn test_ids_strictly_increase() {
        let mut c = Correlator::new();
        let first = c.allocate_id();
        let (second, _rx2) = c.register("chat.send").unwrap();
        let (third, _rx3) = c.register("chat.history").unwrap();
        assert_eq!(first, "1");
        assert_eq!(second, "2");
        assert_eq!(third, "3");
        assert_eq!(c.pending_count(), 2);
        assert_eq!(c.method_of("3"), Some("chat.history"));
    }

    #[tokio::test]
    async fn test_out_of_order_resolution() {
        let mut c = Correlator::new();
        let (a, rx_a) = c.register("chat.send").unwrap();
        let (b, rx_b) = c.register("chat.history").unwrap();

        assert!(c.resolve(&b, ok(json!([]))));
        assert!(c.resolve(&a, ok(json!({"runId": "r1"}))));

        let a_payload = rx_a.await.unwrap().unwrap().into_result("chat.send").unwrap();
        let b_payload = rx_b.await.unwrap().unwrap().into_result("chat.history").unwrap();
        assert_eq!(a_payload.unwrap()["runId"], "r1");
        assert_eq!(b_payload, Some(json!([])));
    }

    #[test]
    fn test_second_response_for_same_id_discarded() {
        let mut c = Correlator::new();
        let (id, _rx) = c.register("chat.send").unwrap();
        assert!(c.resolve(&id, ok(json!({}))));
        assert!(!c.resolve(&id, ok(json!({}))));
        assert!(!c.resolve("999", ok(json!({}))));
    }

    #[tokio::test]
    async fn test_failed_response_is_request_error() {
        let mut c = Correlator::new();
        let (id, rx) = c.register("chat.history").unwrap();
        c.resolve(
            &id,
            ResponseOutcome {
                ok: false,
                payload: None,
                error: Some(ErrorShape::new("not_found", "no session")),
            },
        );
        let err = rx.await.unwrap().unwrap().into_result("chat.history").unwrap_err();
        match err {
            ClawPwaError::Request { method, error } => {
                assert_eq!(method, "chat.history");
                assert_eq!(error.code, "not_found");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fail_all_and_refuse_new() {
        let mut c = Correlator::new();
        let (_a, rx_a) = c.register("chat.send").unwrap();
        let (_b, rx_b) = c.register("chat.history").unwrap();

        assert_eq!(c.fail_all(|| ClawPwaError::Transport("reset".into())), 2);
        assert!(matches!(rx_a.await.unwrap(), Err(ClawPwaError::Transport(_))));
        assert!(matches!(rx_b.await.unwrap(), Err(ClawPwaError::Transport(_))));
        assert!(c.is_closed());
        assert!(matches!(c.register("chat.send"), Err(ClawPwaError::Closed)));
    }
}
