use crate::error::{RpcError, Result};
use crate::value::{Kwargs, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A user function callable over RPC.
///
/// Receives positional and keyword arguments, returns a value or an error
/// message that is delivered to the caller as `RemoteExecution`.
pub type UserFunction =
    Arc<dyn Fn(&[Value], &Kwargs) -> std::result::Result<Value, String> + Send + Sync>;

/// Registry mapping function names to user functions.
///
/// Every worker registers the same functions under the same names; a call
/// carries only the name. Cloning shares the underlying table.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: Arc<RwLock<HashMap<String, UserFunction>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `function` under `name`, replacing any previous entry.
    pub fn register<F>(&self, name: impl Into<String>, function: F) -> Result<()>
    where
        F: Fn(&[Value], &Kwargs) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(RpcError::InvalidArgument(
                "function name must not be empty".into(),
            ));
        }
        let mut functions = self
            .functions
            .write()
            .map_err(|_| RpcError::LockPoisoned("function registry"))?;
        if functions.insert(name.clone(), Arc::new(function)).is_some() {
            tracing::debug!(name = %name, "replaced registered function");
        }
        Ok(())
    }

    /// Look up a function by name.
    pub fn get(&self, name: &str) -> Result<Option<UserFunction>> {
        let functions = self
            .functions
            .read()
            .map_err(|_| RpcError::LockPoisoned("function registry"))?;
        Ok(functions.get(name).cloned())
    }

    /// Check if a function is registered.
    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.get(name)?.is_some())
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .functions
            .read()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}
