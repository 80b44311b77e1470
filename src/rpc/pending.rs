use crate::error::{RpcError, Result};
use crate::protocol::CallOutcome;
use crate::rpc::future::{CallFailure, Completer};
use crate::types::{Rank, WorkerId};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

struct PendingCall {
    target: WorkerId,
    completer: Completer,
}

/// Table of in-flight calls issued by this worker, keyed by request id.
///
/// Responses are matched by id only; there is no ordering between calls.
pub(crate) struct PendingCalls {
    calls: Mutex<HashMap<u64, PendingCall>>,
    next_id: AtomicU64,
    drained: Notify,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            drained: Notify::new(),
        }
    }

    /// Allocate a fresh, monotonically increasing request id.
    pub(crate) fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<u64, PendingCall>>> {
        self.calls
            .lock()
            .map_err(|_| RpcError::LockPoisoned("pending calls"))
    }

    pub(crate) fn register(&self, req_id: u64, target: WorkerId, completer: Completer) -> Result<()> {
        self.lock()?.insert(req_id, PendingCall { target, completer });
        Ok(())
    }

    /// Drop a call without completing it. Used when the request never left.
    pub(crate) fn forget(&self, req_id: u64) -> Result<()> {
        let mut calls = self.lock()?;
        calls.remove(&req_id);
        self.notify_if_empty(&calls);
        Ok(())
    }

    /// Resolve call `req_id` with a response that arrived from rank `from`.
    ///
    /// Returns `false` (and leaves the table untouched) when the id is
    /// unknown or the response came from a worker other than the target.
    pub(crate) fn complete(&self, from: Rank, req_id: u64, outcome: CallOutcome) -> Result<bool> {
        let call = {
            let mut calls = self.lock()?;
            match calls.get(&req_id) {
                None => {
                    tracing::warn!(peer = from, req_id, "response for unknown request, dropping");
                    return Ok(false);
                }
                Some(call) if call.target.id != from => {
                    tracing::warn!(
                        peer = from,
                        req_id,
                        expected = call.target.id,
                        "response from the wrong worker, dropping"
                    );
                    return Ok(false);
                }
                Some(_) => {}
            }
            let call = calls.remove(&req_id);
            self.notify_if_empty(&calls);
            call
        };

        if let Some(PendingCall { target, completer }) = call {
            match outcome {
                CallOutcome::Value(value) => completer.resolve(value),
                CallOutcome::Error(message) => completer.fail(CallFailure::Remote {
                    worker: target.name,
                    message,
                }),
            }
        }
        Ok(true)
    }

    /// Fail every call addressed to `target`. Returns how many were failed.
    pub(crate) fn fail_target(&self, target: Rank, reason: &str) -> Result<usize> {
        let failed: Vec<PendingCall> = {
            let mut calls = self.lock()?;
            let ids: Vec<u64> = calls
                .iter()
                .filter(|(_, c)| c.target.id == target)
                .map(|(id, _)| *id)
                .collect();
            let failed = ids.iter().filter_map(|id| calls.remove(id)).collect();
            self.notify_if_empty(&calls);
            failed
        };
        let count = failed.len();
        for call in failed {
            call.completer.fail(CallFailure::Transport(reason.to_owned()));
        }
        Ok(count)
    }

    /// Fail every outstanding call. Returns how many were failed.
    pub(crate) fn fail_all(&self, reason: &str) -> Result<usize> {
        let failed: Vec<PendingCall> = {
            let mut calls = self.lock()?;
            let failed = calls.drain().map(|(_, c)| c).collect();
            self.notify_if_empty(&calls);
            failed
        };
        let count = failed.len();
        for call in failed {
            call.completer.fail(CallFailure::Transport(reason.to_owned()));
        }
        Ok(count)
    }

    pub(crate) fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    /// Wait until no call is outstanding.
    pub(crate) async fn wait_drained(&self) -> Result<()> {
        loop {
            // Register interest before checking so a completion between the
            // check and the await is not missed.
            let notified = self.drained.notified();
            if self.len()? == 0 {
                return Ok(());
            }
            notified.await;
        }
    }

    fn notify_if_empty(&self, calls: &HashMap<u64, PendingCall>) {
        if calls.is_empty() {
            self.drained.notify_waiters();
        }
    }
}
