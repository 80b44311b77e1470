use crate::error::{RpcError, Result};
use crate::types::WorkerId;
use crate::value::Value;
use tokio::sync::watch;

/// Why a call did not produce a value.
#[derive(Debug, Clone, PartialEq)]
pub enum CallFailure {
    /// The target ran the function and it failed (or panicked).
    Remote { worker: String, message: String },
    /// The call never completed on the target: send failure, peer loss, or
    /// agent shutdown.
    Transport(String),
}

impl CallFailure {
    fn to_error(&self) -> RpcError {
        match self {
            CallFailure::Remote { worker, message } => RpcError::RemoteExecution {
                worker: worker.clone(),
                message: message.clone(),
            },
            CallFailure::Transport(message) => RpcError::transport(message.clone()),
        }
    }
}

/// Observable state of a call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallState {
    Pending,
    Resolved(Value),
    Failed(CallFailure),
}

impl CallState {
    pub fn is_pending(&self) -> bool {
        matches!(self, CallState::Pending)
    }
}

/// Read side of a remote call result.
///
/// Cloneable; every clone observes the same terminal outcome. Dropping a
/// handle does not cancel the call.
#[derive(Debug, Clone)]
pub struct CompletionHandle {
    req_id: u64,
    target: WorkerId,
    state: watch::Receiver<CallState>,
}

/// Write side of a remote call result. Completing consumes it, so the
/// state leaves `Pending` at most once.
#[derive(Debug)]
pub(crate) struct Completer {
    tx: watch::Sender<CallState>,
}

/// Create a connected completer/handle pair for request `req_id`.
pub(crate) fn completion_pair(req_id: u64, target: WorkerId) -> (Completer, CompletionHandle) {
    let (tx, state) = watch::channel(CallState::Pending);
    (
        Completer { tx },
        CompletionHandle {
            req_id,
            target,
            state,
        },
    )
}

impl Completer {
    pub(crate) fn resolve(self, value: Value) {
        self.tx.send_replace(CallState::Resolved(value));
    }

    pub(crate) fn fail(self, failure: CallFailure) {
        self.tx.send_replace(CallState::Failed(failure));
    }
}

impl CompletionHandle {
    /// Wait for the result. Returns immediately if the call already finished.
    pub async fn wait(&self) -> Result<Value> {
        let mut rx = self.state.clone();
        let state = match rx.wait_for(|s| !s.is_pending()).await {
            Ok(state) => state.clone(),
            // Completer dropped without writing a result.
            Err(_) => {
                return Err(RpcError::transport(format!(
                    "request {} to {} was abandoned",
                    self.req_id, self.target
                )));
            }
        };
        match state {
            CallState::Resolved(value) => Ok(value),
            CallState::Failed(failure) => Err(failure.to_error()),
            CallState::Pending => Err(RpcError::transport("call still pending")),
        }
    }

    /// Block the current thread until the result is available.
    ///
    /// For native threads only; inside an async context use [`wait`](Self::wait).
    pub fn wait_blocking(&self) -> Result<Value> {
        futures::executor::block_on(self.wait())
    }

    /// Whether the call has finished, without blocking.
    pub fn is_completed(&self) -> bool {
        !self.state.borrow().is_pending()
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> CallState {
        self.state.borrow().clone()
    }

    pub fn request_id(&self) -> u64 {
        self.req_id
    }

    /// The worker the call was sent to.
    pub fn target(&self) -> &WorkerId {
        &self.target
    }
}
