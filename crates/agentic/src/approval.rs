//! Approval gating for sensitive tools.
//!
//! Each wait is a rendezvous keyed `(execution_id, tool_name)`. Approval,
//! rejection, and timeout all complete the wait with a typed outcome; the
//! gate never raises.

use std::{
    collections::HashMap,
    time::Duration,
};

use common::execution_context::ExecutionId;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::oneshot;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResponse {
    pub granted: bool,
    #[serde(default)]
    pub approved_by: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Granted { approved_by: Option<String> },
    Denied,
    TimedOut,
}

impl ApprovalOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }
}

type PendingKey = (String, String);

/// The per-process approval rendezvous.
#[derive(Default)]
pub struct ApprovalGate {
    pending: Mutex<HashMap<PendingKey, oneshot::Sender<ApprovalResponse>>>,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park until a decision arrives for `(execution_id, tool_name)` or the
    /// timeout fires.
    pub async fn wait_for_approval(
        &self,
        execution_id: &ExecutionId,
        tool_name: &str,
        timeout: Duration,
    ) -> ApprovalOutcome {
        let key = (execution_id.to_string(), tool_name.to_string());
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            // A second wait for the same key replaces the first; the
            // replaced waiter resolves as timed out via its dropped sender.
            pending.insert(key.clone(), tx);
        }
        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) if response.granted => ApprovalOutcome::Granted {
                approved_by: response.approved_by,
            },
            Ok(Ok(_)) => ApprovalOutcome::Denied,
            // Sender dropped without a decision.
            Ok(Err(_)) => ApprovalOutcome::TimedOut,
            Err(_) => ApprovalOutcome::TimedOut,
        };
        self.pending.lock().remove(&key);
        outcome
    }

    /// Deliver a decision for a parked tool call. Returns false when
    /// nothing was waiting under that key.
    pub fn approve_tool_call(
        &self,
        execution_id: &ExecutionId,
        tool_name: &str,
        response: ApprovalResponse,
    ) -> bool {
        let key = (execution_id.to_string(), tool_name.to_string());
        let Some(sender) = self.pending.lock().remove(&key) else {
            return false;
        };
        sender.send(response).is_ok()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}
