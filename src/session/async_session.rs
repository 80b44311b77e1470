use crate::error::{RpcError, Result};
use crate::group::ProcessGroup;
use crate::rpc::{CompletionHandle, FunctionRegistry, RpcAgent, Target};
use crate::session::Backend;
use crate::types::WorkerId;
use crate::value::{Kwargs, Value};
use std::sync::{Arc, Mutex};

enum SessionState {
    Uninitialized,
    Initializing,
    Active(Arc<RpcAgent>),
}

/// What `Session::call` returns: the value itself for a synchronous call,
/// a handle for an asynchronous one.
#[derive(Debug)]
pub enum CallResult {
    Value(Value),
    Pending(CompletionHandle),
}

impl CallResult {
    pub fn into_value(self) -> Option<Value> {
        match self {
            CallResult::Value(v) => Some(v),
            CallResult::Pending(_) => None,
        }
    }

    pub fn into_handle(self) -> Option<CompletionHandle> {
        match self {
            CallResult::Pending(h) => Some(h),
            CallResult::Value(_) => None,
        }
    }
}

/// The process-level RPC handle.
///
/// Wraps one process group and at most one active agent on it. Every RPC
/// operation requires `initialize` to have completed; after
/// `shutdown_and_join` the session is uninitialized again.
///
/// # Example
///
/// ```no_run
/// use rankcall::{Backend, Kwargs, ProcessGroup, RpcConfig, Session, Value};
/// use std::sync::Arc;
///
/// # async fn example() -> rankcall::Result<()> {
/// let group = ProcessGroup::from_env().await?;
/// let name = format!("worker{}", group.rank());
/// let session = Session::new(Arc::new(group));
/// session.initialize(&name, Backend::ProcessGroup).await?;
///
/// let sum = session
///     .rpc_sync("worker1", "aten::add", vec![Value::Int(1), Value::Int(2)], Kwargs::new())
///     .await?;
/// assert_eq!(sum, Value::Int(3));
///
/// session.shutdown_and_join().await?;
/// # Ok(())
/// # }
/// ```
pub struct Session {
    group: Arc<ProcessGroup>,
    functions: FunctionRegistry,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(group: Arc<ProcessGroup>) -> Self {
        Self {
            group,
            functions: FunctionRegistry::new(),
            state: Mutex::new(SessionState::Uninitialized),
        }
    }

    pub fn group(&self) -> &Arc<ProcessGroup> {
        &self.group
    }

    /// User functions callable on this worker. Register the same names on
    /// every worker.
    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Register a user function under `name`.
    pub fn register_function<F>(&self, name: impl Into<String>, function: F) -> Result<()>
    where
        F: Fn(&[Value], &Kwargs) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.register(name, function)
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, SessionState>> {
        self.state
            .lock()
            .map_err(|_| RpcError::LockPoisoned("session state"))
    }

    /// Start the agent under `local_name` and exchange names with the group.
    ///
    /// Collective: every rank must call it.
    pub async fn initialize(&self, local_name: &str, backend: Backend) -> Result<()> {
        {
            let mut state = self.lock_state()?;
            if !matches!(*state, SessionState::Uninitialized) {
                return Err(RpcError::AlreadyInitialized);
            }
            *state = SessionState::Initializing;
        }

        tracing::debug!(name = local_name, %backend, "initializing rpc session");
        let started = RpcAgent::start(local_name, Arc::clone(&self.group), self.functions.clone()).await;

        let mut state = self.lock_state()?;
        match started {
            Ok(agent) => {
                *state = SessionState::Active(agent);
                Ok(())
            }
            Err(e) => {
                *state = SessionState::Uninitialized;
                Err(e)
            }
        }
    }

    /// Whether `initialize` has completed and no join has happened since.
    pub fn is_initialized(&self) -> bool {
        matches!(self.lock_state().as_deref(), Ok(SessionState::Active(_)))
    }

    /// The active agent.
    pub fn agent(&self) -> Result<Arc<RpcAgent>> {
        match &*self.lock_state()? {
            SessionState::Active(agent) => Ok(Arc::clone(agent)),
            _ => Err(RpcError::NotInitialized),
        }
    }

    /// Wait for outstanding calls, barrier, and tear the agent down.
    ///
    /// A no-op when the session was never initialized. The session keeps
    /// serving until the barrier passes; if the barrier fails the session
    /// stays initialized and the join can be retried.
    pub async fn shutdown_and_join(&self) -> Result<()> {
        let agent = match &*self.lock_state()? {
            SessionState::Active(agent) => Arc::clone(agent),
            SessionState::Uninitialized => return Ok(()),
            SessionState::Initializing => return Err(RpcError::NotInitialized),
        };
        agent.join().await?;

        let mut state = self.lock_state()?;
        if matches!(&*state, SessionState::Active(current) if Arc::ptr_eq(current, &agent)) {
            *state = SessionState::Uninitialized;
        }
        Ok(())
    }

    /// Wait until every call issued here is answered, then barrier the group.
    pub async fn barrier_sync(&self) -> Result<()> {
        self.agent()?.sync().await
    }

    /// Resolve a worker by name, or this worker's own id for `None`.
    pub fn resolve_worker_id(&self, name: Option<&str>) -> Result<WorkerId> {
        let agent = self.agent()?;
        match name {
            Some(name) => agent.resolve_id(name),
            None => Ok(agent.self_id().clone()),
        }
    }

    /// Call `function` on `target`.
    ///
    /// With `async_call` the handle is returned as soon as the request is
    /// sent; otherwise the call waits and returns the value, or the remote
    /// failure as `RemoteExecution`.
    pub async fn call(
        &self,
        target: impl Into<Target>,
        function: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
        async_call: bool,
    ) -> Result<CallResult> {
        let agent = self.agent()?;
        let handle = agent.call(&target.into(), function, args, kwargs).await?;
        if async_call {
            Ok(CallResult::Pending(handle))
        } else {
            handle.wait().await.map(CallResult::Value)
        }
    }

    /// Blocking-style call: returns the remote value.
    pub async fn rpc_sync(
        &self,
        target: impl Into<Target>,
        function: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<Value> {
        self.agent()?
            .call(&target.into(), function, args, kwargs)
            .await?
            .wait()
            .await
    }

    /// Fire the call and return its handle.
    pub async fn rpc_async(
        &self,
        target: impl Into<Target>,
        function: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<CompletionHandle> {
        self.agent()?
            .call(&target.into(), function, args, kwargs)
            .await
    }
}
