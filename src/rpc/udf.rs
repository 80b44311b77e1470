//! Opaque encoding of user function calls.
//!
//! A call is carried as an rkyv blob holding the function name and its
//! arguments. The receiving worker looks the name up in its own registry.

use crate::error::{RpcError, Result};
use crate::value::{Kwargs, Value};

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq)]
struct EncodedCall {
    name: String,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
}

/// A decoded user function call.
#[derive(Debug, Clone, PartialEq)]
pub struct UserCall {
    pub name: String,
    pub args: Vec<Value>,
    pub kwargs: Kwargs,
}

/// Bundle a user function call into an opaque blob.
pub fn serialize_call(name: &str, args: &[Value], kwargs: &Kwargs) -> Result<Vec<u8>> {
    let call = EncodedCall {
        name: name.to_owned(),
        args: args.to_vec(),
        kwargs: kwargs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    };
    rkyv::to_bytes::<rkyv::rancor::Error>(&call)
        .map(|bytes| bytes.to_vec())
        .map_err(|e| RpcError::EncodeFailed(e.to_string()))
}

/// Inverse of [`serialize_call`].
pub fn deserialize_call(blob: &[u8]) -> Result<UserCall> {
    let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(blob.len());
    aligned.extend_from_slice(blob);
    let call = rkyv::from_bytes::<EncodedCall, rkyv::rancor::Error>(&aligned)
        .map_err(|e| RpcError::DecodeFailed(format!("user call: {e}")))?;
    Ok(UserCall {
        name: call.name,
        args: call.args,
        kwargs: call.kwargs.into_iter().collect(),
    })
}
