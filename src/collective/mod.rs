mod allgather;
mod barrier;
mod helpers;

pub(crate) use allgather::ring_allgather;
pub(crate) use barrier::{BarrierProgress, barrier};
