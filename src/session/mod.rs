mod async_session;
mod backend;
mod sync_session;

pub use async_session::{CallResult, Session};
pub use backend::Backend;
pub use sync_session::SyncSession;
