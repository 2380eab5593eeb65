use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use buffer::AudioBus;
use processor::{
    ScriptProcessorBlock, ScriptProcessorHost,
    script::{SCRIPT_PROCESSOR_BLOCK_VERSION, ScriptProcessorBlockHeader},
};
use util::{cast_usize, collections::Map, saturate_u32};

use crate::streams::{ScriptProcessorBinding, StreamSlot};

#[derive(Default)]
pub struct ScriptProcessorBridge {
    streams: StreamSlot<Arc<ScriptProcessorBinding>>,
    processed_blocks: AtomicU64,
}

impl ScriptProcessorBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of responses consumed so far.
    pub fn processed_blocks(&self) -> u64 {
        self.processed_blocks.load(Ordering::Relaxed)
    }

    pub fn is_bound(&self, node_id: u64) -> bool {
        self.streams
            .load_for_read()
            .is_some_and(|streams| streams.contains_key(&node_id))
    }

    pub(crate) fn replace(&self, streams: Map<u64, Arc<ScriptProcessorBinding>>) {
        self.streams.replace(streams);
    }

    pub(crate) fn clear(&self) {
        self.streams.clear();
    }
}

fn write_request(
    block: &mut [u8],
    node_id: u64,
    rendered_frames: u64,
    input: &AudioBus,
) -> Option<usize> {
    let header_size = size_of::<ScriptProcessorBlockHeader>();
    let channels = input.num_channels();
    let frames = input.num_frames();
    let used = header_size + channels * frames * size_of::<f32>();
    if block.len() < used {
        return None;
    }
    let (header, payload) = block[..used].split_at_mut(header_size);
    let header = bytemuck::try_from_bytes_mut::<ScriptProcessorBlockHeader>(header).ok()?;
    *header = ScriptProcessorBlockHeader {
        version: SCRIPT_PROCESSOR_BLOCK_VERSION,
        channel_count: saturate_u32!(channels),
        node_id,
        rendered_frames,
        frame_count: saturate_u32!(frames),
        reserved: 0,
    };
    let samples = bytemuck::try_cast_slice_mut::<u8, f32>(payload).ok()?;
    input.interleave_into(samples);
    Some(used)
}

fn read_response(block: &[u8], node_id: u64, output: &mut AudioBus) -> bool {
    let header_size = size_of::<ScriptProcessorBlockHeader>();
    if block.len() < header_size {
        return false;
    }
    let header: ScriptProcessorBlockHeader = bytemuck::pod_read_unaligned(&block[..header_size]);
    let channels = cast_usize!(header.channel_count);
    let frames = cast_usize!(header.frame_count);
    let used = header_size + channels * frames * size_of::<f32>();
    if header.version != SCRIPT_PROCESSOR_BLOCK_VERSION
        || header.node_id != node_id
        || channels == 0
        || block.len() < used
    {
        return false;
    }
    let payload = &block[header_size..used];
    let copy_channels = channels.min(output.num_channels());
    let copy_frames = frames.min(output.num_frames());
    for (frame, samples) in payload
        .chunks_exact(channels * size_of::<f32>())
        .take(copy_frames)
        .enumerate()
    {
        for channel in 0..copy_channels {
            let offset = channel * size_of::<f32>();
            output.channel_mut(channel)[frame] =
                bytemuck::pod_read_unaligned(&samples[offset..offset + size_of::<f32>()]);
        }
    }
    true
}

impl ScriptProcessorHost for ScriptProcessorBridge {
    fn process(&self, node_id: u64, block: ScriptProcessorBlock<'_>) -> bool {
        block.output.clear();
        let Some(streams) = self.streams.load_for_read() else {
            return false;
        };
        let Some(binding) = streams.get(&node_id) else {
            return false;
        };

        // No free request block means the script side is behind; it will see a later quantum.
        if let Some(mut request) = binding.request.acquire() {
            if let Some(used) =
                write_request(request.bytes_mut(), node_id, block.rendered_frames, block.input)
            {
                request.submit(used);
            }
        }

        let Some(response) = binding.response.receive_latest() else {
            return false;
        };
        if !read_response(response.bytes(), node_id, block.output) {
            return false;
        }
        self.processed_blocks.fetch_add(1, Ordering::Relaxed);
        true
    }
}

#[cfg(test)]
mod tests {
    use processor::script::script_processor_block_size;
    use stream::BlockStream;

    use super::*;

    fn response(peer: &BlockStream, node_id: u64, value: f32) {
        let Some(mut block) = peer.acquire() else {
            panic!("no free response block");
        };
        let bytes = block.bytes_mut();
        let header = ScriptProcessorBlockHeader {
            version: SCRIPT_PROCESSOR_BLOCK_VERSION,
            channel_count: 2,
            node_id,
            rendered_frames: 0,
            frame_count: 128,
            reserved: 0,
        };
        let header_size = size_of::<ScriptProcessorBlockHeader>();
        bytes[..header_size].copy_from_slice(bytemuck::bytes_of(&header));
        let samples = bytemuck::cast_slice_mut::<u8, f32>(&mut bytes[header_size..]);
        samples[..256].fill(value);
        assert!(block.submit(script_processor_block_size(2, 128)));
    }

    #[test]
    fn request_and_response() {
        let size = script_processor_block_size(2, 128);
        let request = BlockStream::create(size, 4).unwrap();
        let response_stream = BlockStream::create(size, 4).unwrap();
        let bridge = ScriptProcessorBridge::new();
        bridge.replace(Map::from_iter([(
            9,
            Arc::new(ScriptProcessorBinding {
                request: request.clone(),
                response: response_stream.clone(),
            }),
        )]));
        assert!(bridge.is_bound(9));

        let mut input = AudioBus::new(2, 128);
        input.channel_mut(0).fill(0.25);
        input.channel_mut(1).fill(-0.25);
        let mut output = AudioBus::new(2, 128);

        let processed = bridge.process(
            9,
            ScriptProcessorBlock {
                rendered_frames: 256,
                sample_rate: 48000.0,
                input: &input,
                output: &mut output,
            },
        );
        assert!(!processed);
        assert!(output.channel(0).iter().all(|sample| *sample == 0.0));

        let Some(sent) = request.receive() else {
            panic!("no request block");
        };
        assert_eq!(sent.used_size(), size);
        let header: ScriptProcessorBlockHeader =
            bytemuck::pod_read_unaligned(&sent.bytes()[..size_of::<ScriptProcessorBlockHeader>()]);
        assert_eq!(header.node_id, 9);
        assert_eq!(header.rendered_frames, 256);
        assert_eq!((header.channel_count, header.frame_count), (2, 128));
        drop(sent);

        response(&response_stream, 9, 0.5);
        let processed = bridge.process(
            9,
            ScriptProcessorBlock {
                rendered_frames: 384,
                sample_rate: 48000.0,
                input: &input,
                output: &mut output,
            },
        );
        assert!(processed);
        assert!(output.channels().all(|channel| channel.iter().all(|s| *s == 0.5)));
        assert_eq!(bridge.processed_blocks(), 1);
    }

    #[test]
    fn unbound_node_is_silent() {
        let bridge = ScriptProcessorBridge::new();
        let input = AudioBus::new(1, 128);
        let mut output = AudioBus::new(1, 128);
        output.channel_mut(0).fill(1.0);
        let processed = bridge.process(
            3,
            ScriptProcessorBlock {
                rendered_frames: 0,
                sample_rate: 48000.0,
                input: &input,
                output: &mut output,
            },
        );
        assert!(!processed);
        assert!(output.channel(0).iter().all(|sample| *sample == 0.0));
    }
}
