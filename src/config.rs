//! Runtime-configurable tuning parameters for rankcall.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `RANKCALL_`) or by constructing a custom `RpcConfig`.

use crate::transport::MAX_MESSAGE_SIZE;
use std::time::Duration;

/// Tuning parameters for the process group and the RPC agent.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Timeout for individual send/recv steps inside all-gather.
    pub collective_timeout: Duration,

    /// Timeout for barrier operations (`sync`, `join`). `None` waits for
    /// every rank however long it takes; a timed-out barrier can be retried.
    pub barrier_timeout: Option<Duration>,

    /// Timeout for forming the QUIC mesh.
    pub mesh_timeout: Duration,

    /// QUIC keep-alive interval. Keeps idle workers from hitting the
    /// transport idle timeout between calls.
    pub keep_alive_interval: Duration,

    /// Upper bound on inbound requests executing at the same time.
    pub max_inflight_requests: usize,

    /// Largest framed message this worker sends, in bytes. Capped at
    /// `MAX_MESSAGE_SIZE`, the most any receiver accepts.
    pub max_message_size: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            collective_timeout: Duration::from_secs(30),
            barrier_timeout: None,
            mesh_timeout: Duration::from_secs(60),
            keep_alive_interval: Duration::from_secs(5),
            max_inflight_requests: 64,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl RpcConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `RANKCALL_COLLECTIVE_TIMEOUT_SECS`
    /// - `RANKCALL_BARRIER_TIMEOUT_SECS`
    /// - `RANKCALL_MESH_TIMEOUT_SECS`
    /// - `RANKCALL_KEEP_ALIVE_SECS`
    /// - `RANKCALL_MAX_INFLIGHT_REQUESTS`
    /// - `RANKCALL_MAX_MESSAGE_BYTES`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        let secs = |key: &str| {
            lookup(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
        };

        if let Some(d) = secs("RANKCALL_COLLECTIVE_TIMEOUT_SECS") {
            cfg.collective_timeout = d;
        }
        if let Some(d) = secs("RANKCALL_BARRIER_TIMEOUT_SECS") {
            cfg.barrier_timeout = Some(d);
        }
        if let Some(d) = secs("RANKCALL_MESH_TIMEOUT_SECS") {
            cfg.mesh_timeout = d;
        }
        if let Some(d) = secs("RANKCALL_KEEP_ALIVE_SECS") {
            cfg.keep_alive_interval = d;
        }
        if let Some(n) = lookup("RANKCALL_MAX_INFLIGHT_REQUESTS").and_then(|v| v.parse().ok()) {
            cfg.max_inflight_requests = n;
        }
        if let Some(n) = lookup("RANKCALL_MAX_MESSAGE_BYTES").and_then(|v| v.parse().ok()) {
            cfg.max_message_size = n;
        }

        cfg
    }
}
