use crate::config::RpcConfig;
use crate::error::{RpcError, Result};
use crate::group::ProcessGroup;
use crate::rpc::{CompletionHandle, Target};
use crate::session::{Backend, Session};
use crate::types::WorkerId;
use crate::value::{Kwargs, Value};
use std::sync::Arc;

/// Blocking wrapper around [`Session`].
///
/// Calls `block_on()` on a tokio runtime for each operation, so it can be
/// driven from plain native threads. Sessions created together share one
/// multi-threaded runtime, which serves their inbound calls in the
/// background.
pub struct SyncSession {
    inner: Session,
    rt: Arc<tokio::runtime::Runtime>,
}

fn new_runtime() -> Result<Arc<tokio::runtime::Runtime>> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map(Arc::new)
        .map_err(|e| RpcError::transport(format!("tokio runtime: {e}")))
}

impl SyncSession {
    /// Bootstrap a local group and return one uninitialized session per rank.
    pub fn bootstrap_local(world_size: u32, config: RpcConfig) -> Result<Vec<Self>> {
        let rt = new_runtime()?;
        let groups = rt.block_on(ProcessGroup::bootstrap_local(world_size, config))?;
        Ok(groups
            .into_iter()
            .map(|group| Self::with_runtime(Arc::new(group), Arc::clone(&rt)))
            .collect())
    }

    /// Join the group described by the environment on a fresh runtime.
    pub fn from_env() -> Result<Self> {
        let rt = new_runtime()?;
        let group = rt.block_on(ProcessGroup::from_env())?;
        Ok(Self::with_runtime(Arc::new(group), rt))
    }

    /// Wrap `group` using an existing runtime.
    pub fn with_runtime(group: Arc<ProcessGroup>, rt: Arc<tokio::runtime::Runtime>) -> Self {
        Self {
            inner: Session::new(group),
            rt,
        }
    }

    /// The async session underneath.
    pub fn session(&self) -> &Session {
        &self.inner
    }

    pub fn runtime(&self) -> &Arc<tokio::runtime::Runtime> {
        &self.rt
    }

    pub fn register_function<F>(&self, name: impl Into<String>, function: F) -> Result<()>
    where
        F: Fn(&[Value], &Kwargs) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.inner.register_function(name, function)
    }

    /// See [`Session::initialize`]. Every rank must call it, each on its own thread.
    pub fn initialize(&self, local_name: &str, backend: Backend) -> Result<()> {
        self.rt.block_on(self.inner.initialize(local_name, backend))
    }

    pub fn shutdown_and_join(&self) -> Result<()> {
        self.rt.block_on(self.inner.shutdown_and_join())
    }

    pub fn barrier_sync(&self) -> Result<()> {
        self.rt.block_on(self.inner.barrier_sync())
    }

    pub fn resolve_worker_id(&self, name: Option<&str>) -> Result<WorkerId> {
        self.inner.resolve_worker_id(name)
    }

    pub fn rpc_sync(
        &self,
        target: impl Into<Target>,
        function: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<Value> {
        self.rt
            .block_on(self.inner.rpc_sync(target, function, args, kwargs))
    }

    /// Returns once the request is sent; use
    /// [`CompletionHandle::wait_blocking`] for the result.
    pub fn rpc_async(
        &self,
        target: impl Into<Target>,
        function: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<CompletionHandle> {
        self.rt
            .block_on(self.inner.rpc_async(target, function, args, kwargs))
    }
}
