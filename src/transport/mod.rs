mod connection;
mod listener;
pub mod router;
pub(crate) mod tls;

pub(crate) use connection::read_framed_stream;
pub use connection::{MAX_MESSAGE_SIZE, PeerConnection};
pub use listener::TransportListener;
pub use router::PeerRouter;
