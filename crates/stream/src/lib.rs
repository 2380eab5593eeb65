//! Shared-memory transports between a session's render thread and its peers.
//!
//! - [BlockStream]: a pool of fixed-size blocks plus a ready ring and a free ring. Used for
//!   telemetry snapshots and script-processor request/response bridging.
//! - [snapshot]: versioned block layouts written into block streams.
//! - [timing]: the timing page and its notification pipe.
//! - [ring]: interleaved sample rings feeding media sources.
pub mod block;
pub mod ring;
pub mod snapshot;
pub mod timing;

pub use block::{BlockStream, Descriptor, ReadBlock, StreamBuffers, WriteBlock};
pub use timing::{SuspendState, TimingNotifier, TimingPage, TimingSnapshot};

/// Largest number of blocks a single stream may hold.
pub const MAX_BLOCK_COUNT: usize = 1024;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("stream buffers are missing the {0}")]
    Missing(&'static str),
    #[error("block size must be non-zero")]
    ZeroBlockSize,
    #[error("block count {0} is outside 1..={MAX_BLOCK_COUNT}")]
    BlockCount(usize),
    #[error("ring capacities (ready {ready}, free {free}) do not match block count {blocks}")]
    RingCapacity {
        ready: usize,
        free: usize,
        blocks: usize,
    },
}
