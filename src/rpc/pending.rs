// src/rpc/pending.rs
//! Correlates asynchronous node responses to the call that triggered them.
//!
//! Every outstanding call is keyed by a per-connection request id; the id is
//! unique by construction, so two concurrent calls of the same method can
//! never receive each other's response.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use crate::error::RpcError;

/// What a waiting caller eventually receives.
pub type CallResult = Result<Value, RpcError>;

struct Waiter {
    method: String,
    tx: oneshot::Sender<CallResult>,
}

/// Registry of calls still waiting for a correlated response.
///
/// Each entry is settled exactly once: by a matching response, by an error
/// frame, by caller-side cancellation (timeout), or by connection teardown.
#[derive(Default)]
pub struct PendingRequests {
    waiters: Mutex<HashMap<u64, Waiter>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outstanding call and hand back the receiving half.
    pub async fn register(&self, id: u64, method: &str) -> oneshot::Receiver<CallResult> {
        let (tx, rx) = oneshot::channel();
        let prior = self.waiters.lock().await.insert(
            id,
            Waiter {
                method: method.to_string(),
                tx,
            },
        );
        debug_assert!(prior.is_none(), "correlation id reused while outstanding");
        rx
    }

    /// Deliver a result payload. Returns false when no caller is waiting,
    /// in which case the payload is unsolicited and the caller should drop it.
    pub async fn resolve(&self, id: u64, payload: Value) -> bool {
        match self.waiters.lock().await.remove(&id) {
            Some(waiter) => {
                let _ = waiter.tx.send(Ok(payload));
                true
            }
            None => false,
        }
    }

    /// Reject one call with the node's error message. Returns false when no
    /// caller is waiting.
    pub async fn reject(&self, id: u64, message: String) -> bool {
        match self.waiters.lock().await.remove(&id) {
            Some(waiter) => {
                let _ = waiter.tx.send(Err(RpcError::Remote {
                    method: waiter.method,
                    message,
                }));
                true
            }
            None => false,
        }
    }

    /// Forget an entry whose caller gave up waiting. A response arriving
    /// later is then treated as unsolicited.
    pub async fn cancel(&self, id: u64) {
        self.waiters.lock().await.remove(&id);
    }

    /// Reject every outstanding call; used on transport teardown so no
    /// caller hangs on a connection that can no longer answer.
    pub async fn fail_all(&self) {
        let drained: Vec<Waiter> = {
            let mut waiters = self.waiters.lock().await;
            waiters.drain().map(|(_, waiter)| waiter).collect()
        };
        for waiter in drained {
            let _ = waiter.tx.send(Err(RpcError::ConnectionClosed));
        }
    }

    pub async fn outstanding(&self) -> usize {
        self.waiters.lock().await.len()
    }
}
