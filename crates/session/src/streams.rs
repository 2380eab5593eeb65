use std::{
    ops::Deref,
    sync::{Arc, Mutex, PoisonError},
};

use processor::AudioInputMetadata;
use stream::{BlockStream, StreamBuffers, ring::MediaSourceProvider, ring::RingStreamDescriptor};
use util::{Guard, PublishSlot, Published, collections::Map};

/// An immutable map from node or provider id to a binding.
pub struct StreamMap<V>(Map<u64, V>);

impl<V: Send + Sync + 'static> Published for StreamMap<V> {}

impl<V> Deref for StreamMap<V> {
    type Target = Map<u64, V>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub struct StreamSlot<V: Send + Sync + 'static> {
    slot: PublishSlot<StreamMap<V>>,
    write: Mutex<()>,
}

impl<V: Clone + Send + Sync + 'static> StreamSlot<V> {
    pub fn new() -> Self {
        Self {
            slot: PublishSlot::default(),
            write: Mutex::new(()),
        }
    }

    pub fn load_for_read(&self) -> Option<Guard<'_, StreamMap<V>>> {
        self.slot.load_for_read()
    }

    /// Copy the current map.
    pub fn snapshot(&self) -> Map<u64, V> {
        self.slot
            .load_for_read()
            .map(|map| map.0.clone())
            .unwrap_or_default()
    }

    /// Publish a copy of the current map with `edit` applied.
    pub fn update<R>(&self, edit: impl FnOnce(&mut Map<u64, V>) -> R) -> R {
        let _write = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        let mut map = self.snapshot();
        let result = edit(&mut map);
        self.slot.publish(Some(Arc::new(StreamMap(map)))).release();
        result
    }

    /// Publish `map`, returning the one it replaced.
    pub fn replace(&self, map: Map<u64, V>) -> Map<u64, V> {
        let _write = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.snapshot();
        self.slot.publish(Some(Arc::new(StreamMap(map)))).release();
        previous
    }

    pub fn clear(&self) -> Map<u64, V> {
        let _write = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.snapshot();
        self.slot.publish(None).release();
        previous
    }
}

impl<V: Clone + Send + Sync + 'static> Default for StreamSlot<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Telemetry stream of one analyser node.
pub struct AnalyserBinding {
    pub fft_size: u32,
    pub stream: BlockStream,
}

/// Telemetry stream of one dynamics-compressor node.
pub struct DynamicsCompressorBinding {
    pub stream: BlockStream,
}

/// Request and response streams of one script-processor node.
pub struct ScriptProcessorBinding {
    pub request: BlockStream,
    pub response: BlockStream,
}

/// An input stream opened on behalf of a media-stream source.
pub struct MediaStreamBinding {
    pub metadata: AudioInputMetadata,
    pub stream_id: u64,
    pub provider: Arc<MediaSourceProvider>,
}

/// Script-processor streams as received from the control plane.
#[derive(Clone)]
pub struct ScriptProcessorStreams {
    pub node_id: u64,
    pub request: StreamBuffers,
    pub response: StreamBuffers,
}

/// The ring feeding one media-element source.
pub struct MediaElementStream {
    pub provider_id: u64,
    pub descriptor: RingStreamDescriptor,
}

/// The input a media-stream source should read.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MediaStreamSource {
    pub provider_id: u64,
    pub metadata: AudioInputMetadata,
}

#[derive(Default)]
pub(crate) struct StreamState {
    pub analysers: StreamSlot<Arc<AnalyserBinding>>,
    pub compressors: StreamSlot<Arc<DynamicsCompressorBinding>>,
    pub media_elements: StreamSlot<Arc<MediaSourceProvider>>,
    pub media_streams: StreamSlot<Arc<MediaStreamBinding>>,
}
