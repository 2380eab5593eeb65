use std::sync::Arc;

use graph::NodeId;
use stream::{
    BlockStream, StreamBuffers,
    ring::{MediaSourceProvider, validate_ring_stream_descriptor},
    snapshot::{analyser_snapshot_size, dynamics_compressor_snapshot_size},
};
use util::collections::Map;

use crate::{
    BindingError, MediaElementStream, MediaStreamSource, ScriptProcessorStreams, Session,
    config::{telemetry_block_count, valid_fft_size},
    streams::{
        AnalyserBinding, DynamicsCompressorBinding, MediaStreamBinding, ScriptProcessorBinding,
    },
};

fn attach(buffers: StreamBuffers, required: usize) -> Result<BlockStream, BindingError> {
    let stream = BlockStream::attach(buffers)?;
    if stream.block_size() < required {
        return Err(BindingError::BlockSize {
            required,
            actual: stream.block_size(),
        });
    }
    Ok(stream)
}

impl Session {
    fn rejected(&self, what: &str, error: BindingError) -> BindingError {
        log::warn!("session {}: rejecting {what}: {error}", self.session_id());
        error
    }

    /// Create a stream sized for analyser snapshots of `fft_size`. A `block_count` of zero picks
    /// the default.
    pub fn create_analyser_stream(
        &self,
        fft_size: u32,
        block_count: usize,
    ) -> Result<StreamBuffers, BindingError> {
        if !valid_fft_size(fft_size) {
            return Err(BindingError::FftSize(fft_size));
        }
        let stream = BlockStream::create(
            analyser_snapshot_size(fft_size),
            telemetry_block_count(block_count),
        )?;
        Ok(stream.buffers())
    }

    pub fn create_dynamics_compressor_stream(
        &self,
        block_count: usize,
    ) -> Result<StreamBuffers, BindingError> {
        let stream = BlockStream::create(
            dynamics_compressor_snapshot_size(),
            telemetry_block_count(block_count),
        )?;
        Ok(stream.buffers())
    }

    /// Publish analyser snapshots of `node` into `buffers`. Detached buffers remove the binding.
    pub fn bind_analyser_stream(
        &self,
        node: NodeId,
        fft_size: u32,
        buffers: StreamBuffers,
    ) -> Result<(), BindingError> {
        if self.is_shut_down() {
            return Err(BindingError::ShutDown);
        }
        if !buffers.is_attached() {
            self.streams.analysers.update(|map| map.remove(&node.0));
            return Ok(());
        }
        if !valid_fft_size(fft_size) {
            return Err(self.rejected("analyser stream", BindingError::FftSize(fft_size)));
        }
        let stream = attach(buffers, analyser_snapshot_size(fft_size))
            .map_err(|error| self.rejected("analyser stream", error))?;
        let binding = Arc::new(AnalyserBinding { fft_size, stream });
        self.streams
            .analysers
            .update(|map| map.insert(node.0, binding));
        if self.debug.info {
            log::info!(
                "session {}: analyser {} bound with FFT size {fft_size}",
                self.session_id(),
                node.0
            );
        }
        Ok(())
    }

    /// Publish gain reduction of `node` into `buffers`. Detached buffers remove the binding.
    pub fn bind_dynamics_compressor_stream(
        &self,
        node: NodeId,
        buffers: StreamBuffers,
    ) -> Result<(), BindingError> {
        if self.is_shut_down() {
            return Err(BindingError::ShutDown);
        }
        if !buffers.is_attached() {
            self.streams.compressors.update(|map| map.remove(&node.0));
            return Ok(());
        }
        let stream = attach(buffers, dynamics_compressor_snapshot_size())
            .map_err(|error| self.rejected("dynamics compressor stream", error))?;
        let binding = Arc::new(DynamicsCompressorBinding { stream });
        self.streams
            .compressors
            .update(|map| map.insert(node.0, binding));
        Ok(())
    }

    /// Replace every script-processor binding. Entries that fail to attach are skipped.
    pub fn set_script_processor_streams(&self, streams: Vec<ScriptProcessorStreams>) {
        if self.is_shut_down() {
            return;
        }
        let mut bindings = Map::default();
        for entry in streams {
            if entry.node_id == 0 {
                self.rejected(
                    "script processor streams",
                    BindingError::NodeId(NodeId(entry.node_id)),
                );
                continue;
            }
            let attached = BlockStream::attach(entry.request)
                .and_then(|request| Ok((request, BlockStream::attach(entry.response)?)));
            match attached {
                Ok((request, response)) => {
                    bindings.insert(
                        entry.node_id,
                        Arc::new(ScriptProcessorBinding { request, response }),
                    );
                }
                Err(error) => {
                    self.rejected("script processor streams", error.into());
                }
            }
        }
        if self.debug.script_processor {
            log::debug!(
                "session {}: {} script processor bindings",
                self.session_id(),
                bindings.len()
            );
        }
        self.script.replace(bindings);
    }

    /// Replace every media-element source and rebuild the graph against them.
    pub fn set_media_element_audio_source_streams(&self, streams: Vec<MediaElementStream>) {
        if self.is_shut_down() {
            return;
        }
        let mut providers = Map::default();
        for MediaElementStream {
            provider_id,
            descriptor,
        } in streams
        {
            match validate_ring_stream_descriptor(descriptor) {
                Ok(view) => {
                    if self.debug.media {
                        log::debug!(
                            "session {}: media element {provider_id} reads ring {} at {} Hz",
                            self.session_id(),
                            view.stream_id,
                            view.format.sample_rate_hz
                        );
                    }
                    providers.insert(
                        provider_id,
                        Arc::new(MediaSourceProvider::new(provider_id, view)),
                    );
                }
                Err(error) => {
                    self.rejected("media element stream", error.into());
                }
            }
        }
        self.streams.media_elements.replace(providers);
        self.republish_graph();
    }

    /// Bind media-stream sources to audio input streams. A source whose input parameters did
    /// not change keeps its stream; others get a new one, and streams no longer used are
    /// destroyed.
    pub fn set_media_stream_audio_source_streams(&self, sources: Vec<MediaStreamSource>) {
        if self.is_shut_down() {
            return;
        }
        let previous = self.streams.media_streams.snapshot();
        let mut bindings = Map::default();
        let mut changed = false;

        for source in sources {
            if let Some(existing) = previous.get(&source.provider_id) {
                if existing.metadata == source.metadata {
                    bindings.insert(source.provider_id, existing.clone());
                    continue;
                }
            }
            match self.open_media_stream(source) {
                Ok(binding) => {
                    bindings.insert(source.provider_id, Arc::new(binding));
                    changed = true;
                }
                Err(error) => {
                    self.rejected("media stream source", error);
                }
            }
        }

        for (provider_id, binding) in &previous {
            let kept = bindings
                .get(provider_id)
                .is_some_and(|current| current.stream_id == binding.stream_id);
            if !kept {
                self.destroy_media_stream(binding.stream_id);
                changed = true;
            }
        }

        self.streams.media_streams.replace(bindings);
        if changed {
            self.republish_graph();
        }
    }

    fn open_media_stream(
        &self,
        source: MediaStreamSource,
    ) -> Result<MediaStreamBinding, BindingError> {
        let Some(client) = &self.collaborators.audio_input else {
            return Err(BindingError::NoAudioInput);
        };
        let descriptor = client.create_audio_input_stream(&source.metadata)?;
        let stream_id = descriptor.stream_id;
        let view = match validate_ring_stream_descriptor(descriptor) {
            Ok(view) => view,
            Err(error) => {
                self.destroy_media_stream(stream_id);
                return Err(error.into());
            }
        };
        if self.debug.media {
            log::debug!(
                "session {}: media stream {} opened input stream {stream_id}",
                self.session_id(),
                source.provider_id
            );
        }
        Ok(MediaStreamBinding {
            metadata: source.metadata,
            stream_id,
            provider: Arc::new(MediaSourceProvider::new(source.provider_id, view)),
        })
    }

    fn destroy_media_stream(&self, stream_id: u64) {
        let Some(client) = &self.collaborators.audio_input else {
            return;
        };
        if let Err(error) = client.destroy_audio_input_stream(stream_id) {
            log::warn!(
                "session {}: could not destroy input stream {stream_id}: {error}",
                self.session_id()
            );
        }
    }

    pub(crate) fn destroy_media_streams(&self) {
        for binding in self.streams.media_streams.clear().values() {
            self.destroy_media_stream(binding.stream_id);
        }
    }
}
