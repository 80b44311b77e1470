use crate::error::{RpcError, Result};
use crate::group::ProcessGroup;
use crate::protocol::{CallOutcome, CallPayload, RpcMessage};
use crate::rpc::builtin::BuiltinOp;
use crate::rpc::dispatcher::{Target, build_payload};
use crate::rpc::functions::FunctionRegistry;
use crate::rpc::future::{CompletionHandle, completion_pair};
use crate::rpc::names::{NameTable, collect_worker_names};
use crate::rpc::pending::PendingCalls;
use crate::rpc::udf::deserialize_call;
use crate::types::{Priority, Rank, WorkerId};
use crate::value::{Kwargs, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// State shared between the agent and its background tasks.
struct Shared {
    group: Arc<ProcessGroup>,
    local: WorkerId,
    functions: FunctionRegistry,
    pending: PendingCalls,
    inflight: Arc<Semaphore>,
}

/// The RPC agent: owns the name table, the in-flight call table, and one
/// inbound task per peer.
///
/// Inbound tasks read the peer's rpc lane. Requests run on the blocking
/// pool (so a worker keeps serving while its own calls wait) and are
/// answered under the caller's request id; responses resolve the matching
/// pending call.
pub struct RpcAgent {
    shared: Arc<Shared>,
    names: NameTable,
    serve_tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    sync_lock: tokio::sync::Mutex<()>,
    stopped: AtomicBool,
}

impl RpcAgent {
    /// Attach an agent to `group` and exchange worker names.
    ///
    /// Collective: every rank must call it. At most one agent may be
    /// attached to a group at a time; the check is per group rather than
    /// per process, so several groups formed in one process (as
    /// `bootstrap_local` does) each carry their own agent. Fails with
    /// `AlreadyInitialized` if this group already has one.
    pub async fn start(
        local_name: &str,
        group: Arc<ProcessGroup>,
        functions: FunctionRegistry,
    ) -> Result<Arc<Self>> {
        group.attach_agent()?;

        let names = match Self::exchange_names(&group, local_name).await {
            Ok(names) => names,
            Err(e) => {
                group.detach_agent();
                return Err(e);
            }
        };

        let rank = group.rank();
        let local = names
            .by_id(rank)
            .cloned()
            .unwrap_or_else(|| WorkerId::new(local_name, rank));
        let inflight = Arc::new(Semaphore::new(group.config().max_inflight_requests.max(1)));

        let shared = Arc::new(Shared {
            group: Arc::clone(&group),
            local,
            functions,
            pending: PendingCalls::new(),
            inflight,
        });

        let serve_tasks = group
            .peer_ranks()
            .into_iter()
            .map(|peer| tokio::spawn(serve_peer(Arc::clone(&shared), peer)))
            .collect();

        tracing::info!(
            rank,
            name = %shared.local.name,
            world_size = group.world_size(),
            "rpc agent started"
        );

        Ok(Arc::new(Self {
            shared,
            names,
            serve_tasks: std::sync::Mutex::new(serve_tasks),
            sync_lock: tokio::sync::Mutex::new(()),
            stopped: AtomicBool::new(false),
        }))
    }

    async fn exchange_names(group: &ProcessGroup, local_name: &str) -> Result<NameTable> {
        let names = collect_worker_names(group, local_name).await?;
        NameTable::from_names(names)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(RpcError::NotInitialized);
        }
        Ok(())
    }

    /// Look up a worker by name.
    pub fn resolve_id(&self, name: &str) -> Result<WorkerId> {
        self.names.resolve(name)
    }

    /// This worker's own identity.
    pub fn self_id(&self) -> &WorkerId {
        &self.shared.local
    }

    /// Look up a worker by id.
    pub fn worker_by_id(&self, id: Rank) -> Result<WorkerId> {
        self.names.by_id(id).cloned().ok_or(RpcError::InvalidRank {
            rank: id,
            world_size: self.shared.group.world_size(),
        })
    }

    /// The full name table, in rank order.
    pub fn workers(&self) -> &NameTable {
        &self.names
    }

    pub fn resolve_target(&self, target: &Target) -> Result<WorkerId> {
        match target {
            Target::Name(name) => self.resolve_id(name),
            Target::Id(id) => self.worker_by_id(*id),
        }
    }

    /// Dispatch `function` to `target` and return a handle to the result.
    ///
    /// Built-ins are looked up first, then the function registry. Errors in
    /// the function reference or the target are returned before any I/O.
    pub async fn call(
        &self,
        target: &Target,
        function: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<CompletionHandle> {
        self.ensure_running()?;
        let payload = build_payload(function, args, kwargs, &self.shared.functions)?;
        let target = self.resolve_target(target)?;
        self.send_request(&target, payload).await
    }

    /// Register a pending call, transmit the request and return at once.
    ///
    /// A request addressed to this worker runs locally without touching the
    /// network. A failed send fails only this call.
    pub async fn send_request(
        &self,
        target: &WorkerId,
        payload: CallPayload,
    ) -> Result<CompletionHandle> {
        self.ensure_running()?;
        let shared = &self.shared;
        let req_id = shared.pending.next_request_id();
        let (completer, handle) = completion_pair(req_id, target.clone());
        shared.pending.register(req_id, target.clone(), completer)?;

        tracing::debug!(
            req_id,
            peer = target.id,
            function = payload.label(),
            "sending request"
        );

        if target.id == shared.local.id {
            let shared = Arc::clone(shared);
            tokio::spawn(async move {
                let Ok(_permit) = Arc::clone(&shared.inflight).acquire_owned().await else {
                    return;
                };
                let outcome = execute(&shared, payload).await;
                let local = shared.local.id;
                if let Err(e) = shared.pending.complete(local, req_id, outcome) {
                    tracing::error!(req_id, "failed to complete local call: {e}");
                }
            });
            return Ok(handle);
        }

        let msg = RpcMessage::Request {
            req_id,
            call: payload,
        };
        if let Err(e) = shared
            .group
            .send_message(target.id, &msg, Priority::Realtime)
            .await
        {
            shared.pending.forget(req_id)?;
            return Err(e);
        }
        Ok(handle)
    }

    /// Wait for every call issued by this worker, then barrier the group.
    ///
    /// Only one `sync` may run at a time; a concurrent caller gets
    /// `ConcurrentSync`.
    pub async fn sync(&self) -> Result<()> {
        let _guard = self
            .sync_lock
            .try_lock()
            .map_err(|_| RpcError::ConcurrentSync)?;
        self.shared.pending.wait_drained().await?;
        self.shared.group.barrier().await
    }

    /// `sync`, then stop serving and detach from the group.
    ///
    /// If the barrier fails (for example on `BarrierTimeout`) the agent keeps
    /// serving, since peers may still be calling in, and `join` can be
    /// retried. Calls issued after the barrier passed are failed.
    pub async fn join(&self) -> Result<()> {
        self.ensure_running()?;
        self.sync().await?;
        self.stop();
        tracing::info!(rank = self.shared.local.id, "rpc agent joined");
        Ok(())
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut tasks) = self.serve_tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        match self.shared.pending.fail_all("rpc agent shut down") {
            Ok(0) => {}
            Ok(n) => tracing::warn!(count = n, "failed outstanding calls at shutdown"),
            Err(e) => tracing::error!("could not fail outstanding calls: {e}"),
        }
        self.shared.group.detach_agent();
    }

    /// Number of calls issued by this worker that have not been answered.
    pub fn pending_calls(&self) -> Result<usize> {
        self.shared.pending.len()
    }
}

impl Drop for RpcAgent {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Inbound loop for one peer's rpc lane.
async fn serve_peer(shared: Arc<Shared>, peer: Rank) {
    loop {
        let msg = match shared.group.recv_rpc(peer).await {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(peer, "rpc lane closed: {e}");
                match shared.pending.fail_target(peer, &e.to_string()) {
                    Ok(0) => {}
                    Ok(n) => tracing::error!(peer, count = n, "peer lost with calls outstanding"),
                    Err(e) => tracing::error!(peer, "could not fail outstanding calls: {e}"),
                }
                return;
            }
        };

        match msg {
            // The permit is taken inside the task: waiting for it here would
            // hold up responses to this worker's own calls on the same lane.
            RpcMessage::Request { req_id, call } => {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    let Ok(permit) = Arc::clone(&shared.inflight).acquire_owned().await else {
                        return;
                    };
                    tracing::debug!(peer, req_id, function = call.label(), "executing request");
                    let outcome = execute(&shared, call).await;
                    drop(permit);
                    respond(&shared, peer, req_id, outcome).await;
                });
            }
            RpcMessage::Response { req_id, outcome } => {
                if let Err(e) = shared.pending.complete(peer, req_id, outcome) {
                    tracing::error!(peer, req_id, "could not complete call: {e}");
                }
            }
            other => {
                tracing::warn!(peer, "unexpected message on rpc lane: {other:?}");
            }
        }
    }
}

/// Send the outcome of `req_id` back to `peer`.
///
/// If the outcome cannot be sent (too large, or not encodable) the caller
/// gets an error in its place, so its call still completes.
async fn respond(shared: &Shared, peer: Rank, req_id: u64, outcome: CallOutcome) {
    let response = RpcMessage::Response { req_id, outcome };
    let Err(e) = shared
        .group
        .send_message(peer, &response, Priority::Realtime)
        .await
    else {
        return;
    };
    tracing::warn!(peer, req_id, "could not send response: {e}");

    let fallback = RpcMessage::Response {
        req_id,
        outcome: CallOutcome::Error(format!("result could not be sent back: {e}")),
    };
    if let Err(e) = shared
        .group
        .send_message(peer, &fallback, Priority::Realtime)
        .await
    {
        tracing::error!(peer, req_id, "response lost: {e}");
    }
}

/// Run a call on the blocking pool. Panics become failures.
async fn execute(shared: &Shared, call: CallPayload) -> CallOutcome {
    let functions = shared.functions.clone();
    match tokio::task::spawn_blocking(move || run_call(&functions, call)).await {
        Ok(Ok(value)) => CallOutcome::Value(value),
        Ok(Err(message)) => CallOutcome::Error(message),
        Err(e) if e.is_panic() => CallOutcome::Error(format!(
            "function panicked: {}",
            panic_message(e.into_panic())
        )),
        Err(e) => CallOutcome::Error(format!("execution cancelled: {e}")),
    }
}

fn run_call(functions: &FunctionRegistry, call: CallPayload) -> std::result::Result<Value, String> {
    match call {
        CallPayload::Builtin {
            qualified_name,
            args,
            kwargs,
        } => {
            let op = BuiltinOp::from_qualified_name(&qualified_name)
                .ok_or_else(|| format!("unknown built-in '{qualified_name}'"))?;
            op.invoke(&args, &kwargs.into_iter().collect())
        }
        CallPayload::User { blob } => {
            let call = deserialize_call(&blob).map_err(|e| e.to_string())?;
            let function = functions
                .get(&call.name)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("function '{}' is not registered on this worker", call.name))?;
            function(&call.args, &call.kwargs)
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
