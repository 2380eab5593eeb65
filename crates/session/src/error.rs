use graph::NodeId;
use processor::{HostError, InputStreamError};
use stream::{StreamError, ring::RingStreamError};

/// Why a control-plane binding was rejected. The session carries on without it.
#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    #[error("FFT size {0} is not a power of two in 32..=32768")]
    FftSize(u32),
    #[error("stream blocks of {actual} bytes cannot hold {required}")]
    BlockSize { required: usize, actual: usize },
    #[error("node id {0:?} is reserved")]
    NodeId(NodeId),
    #[error("no audio input client is available")]
    NoAudioInput,
    #[error("session is shut down")]
    ShutDown,
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Ring(#[from] RingStreamError),
    #[error(transparent)]
    Input(#[from] InputStreamError),
    #[error(transparent)]
    Host(#[from] HostError),
}
