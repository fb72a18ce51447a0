//! Process-wide registry pairing async job ids with pending completions.
//!
//! A `wait_for` call parks until the matching `success`/`failed` signal is
//! delivered by the inbound callback handler, or until its deadline passes.
//! Whichever of the three arrives first wins; a signal with no registered
//! waiter is dropped, never queued, so a late callback for an already
//! timed-out wait has no effect.

use crate::error::{EngineError, EngineResult};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

enum Outcome {
    Success(Value),
    Failed(Value),
}

#[derive(Default)]
pub struct CallbackRegistry {
    pending: Mutex<HashMap<String, oneshot::Sender<Outcome>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the job completes, fails, or the timeout elapses.
    /// The pending entry is removed on every exit path.
    pub async fn wait_for(&self, job_id: &str, timeout: Duration) -> EngineResult<Value> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(job_id.to_string(), tx);
        debug!(job_id, timeout_ms = timeout.as_millis() as u64, "waiting for callback");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Outcome::Success(payload))) => Ok(payload),
            Ok(Ok(Outcome::Failed(error))) => Err(EngineError::JobFailed {
                job_id: job_id.to_string(),
                detail: error.to_string(),
            }),
            // Timed out, or the sender vanished without a signal.
            Ok(Err(_)) | Err(_) => {
                self.pending.lock().await.remove(job_id);
                Err(EngineError::JobTimeout {
                    job_id: job_id.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Resolves a pending wait with the delivered payload.
    pub async fn success(&self, job_id: &str, payload: Value) {
        self.deliver(job_id, Outcome::Success(payload)).await;
    }

    /// Rejects a pending wait with the delivered error payload.
    pub async fn failed(&self, job_id: &str, error: Value) {
        self.deliver(job_id, Outcome::Failed(error)).await;
    }

    async fn deliver(&self, job_id: &str, outcome: Outcome) {
        match self.pending.lock().await.remove(job_id) {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    debug!(job_id, "waiter gone before signal delivery");
                }
            }
            None => debug!(job_id, "dropping signal with no registered waiter"),
        }
    }
}
