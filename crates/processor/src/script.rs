//! Script processors exchange audio with a script-side callback through a pair of block streams:
//! the render thread submits request blocks and picks up response blocks. Both carry a
//! [ScriptProcessorBlockHeader] followed by interleaved samples.
use buffer::AudioBus;
use bytemuck::{Pod, Zeroable};

pub const SCRIPT_PROCESSOR_BLOCK_VERSION: u32 = 1;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ScriptProcessorBlockHeader {
    pub version: u32,
    pub channel_count: u32,
    pub node_id: u64,
    pub rendered_frames: u64,
    pub frame_count: u32,
    pub reserved: u32,
}

/// Byte size of a block holding `frame_count` frames of `channel_count` channels.
pub const fn script_processor_block_size(channel_count: u32, frame_count: u32) -> usize {
    size_of::<ScriptProcessorBlockHeader>()
        + channel_count as usize * frame_count as usize * size_of::<f32>()
}

/// One quantum handed to a [ScriptProcessorHost].
pub struct ScriptProcessorBlock<'a> {
    pub rendered_frames: u64,
    pub sample_rate: f32,
    pub input: &'a AudioBus,
    pub output: &'a mut AudioBus,
}

pub trait ScriptProcessorHost: Send + Sync {
    /// Render thread: send `block.input` to the script side and fill `block.output` with the
    /// latest response, if any. Must not block. Returns `true` if a response was consumed.
    fn process(&self, node_id: u64, block: ScriptProcessorBlock<'_>) -> bool;
}
