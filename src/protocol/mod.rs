pub mod codec;
pub mod header;
pub mod message;

pub use message::{CallOutcome, CallPayload, RpcMessage};
