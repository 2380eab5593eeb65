use stream::ring::{OverflowPolicy, RingStreamDescriptor};

/// The parameters of an input stream. Two bindings with equal metadata can share one stream.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AudioInputMetadata {
    pub device_id: u64,
    pub sample_rate_hz: u32,
    pub channel_count: u32,
    pub capacity_frames: u64,
    pub overflow_policy: OverflowPolicy,
}

#[derive(Debug, thiserror::Error)]
pub enum InputStreamError {
    #[error("no audio input device {0}")]
    NoDevice(u64),
    #[error("audio input stream {0} is unknown")]
    UnknownStream(u64),
    #[error("audio server rejected the request: {0}")]
    Rejected(String),
}

/// Client of the audio server that owns input devices.
pub trait AudioInputClient: Send + Sync {
    /// Open a stream and return its ring. The descriptor's `stream_id` identifies it.
    fn create_audio_input_stream(
        &self,
        metadata: &AudioInputMetadata,
    ) -> Result<RingStreamDescriptor, InputStreamError>;

    fn destroy_audio_input_stream(&self, stream_id: u64) -> Result<(), InputStreamError>;
}
