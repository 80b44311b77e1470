//! The collective group the RPC layer runs on.

mod bootstrap;
mod process_group;

pub use process_group::ProcessGroup;
