//! The render thread entry point.
use std::{
    mem::ManuallyDrop,
    sync::{Arc, atomic::Ordering},
};

use buffer::AudioBus;
use graph::{
    Capabilities, GraphDescription, GraphNode, Hosts, NodeId, PreparedGraph, ProcessContext,
    RENDER_QUANTUM_SIZE, Render,
};
use processor::ScriptProcessorHost;
use stream::{
    SuspendState, TimingSnapshot,
    snapshot::{
        ANALYSER_SNAPSHOT_VERSION, AnalyserSnapshotHeader, DYNAMICS_COMPRESSOR_SNAPSHOT_VERSION,
        DynamicsCompressorSnapshotHeader, analyser_snapshot_mut, analyser_snapshot_size,
        dynamics_compressor_snapshot_mut, dynamics_compressor_snapshot_size,
    },
    timing::Notify,
};
use util::cast_usize;

use crate::{
    Session, Task,
    resample::Resampler,
    session::lock,
    streams::{AnalyserBinding, DynamicsCompressorBinding},
};

/// Output levels of the most recent quantum.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct OutputLevels {
    pub peak: f32,
    pub rms: f32,
    /// Device frames rendered so far.
    pub device_frames: u64,
}

#[derive(Default)]
struct LevelMeter {
    peak: f32,
    sum_squares: f64,
    samples: u64,
    window_frames: u64,
}

#[derive(Default)]
struct ThreadLoopState {
    current: Option<Arc<PreparedGraph>>,
    last_seen_generation: u64,
    capabilities: Capabilities,
    last_timing_page_was_suspended: bool,
    adopted_graphs: u64,
    rendered_frames: u64,
    device_frames: u64,
    script_processor_baseline: (u64, u64),
    script_processor_logged: bool,
    meter: LevelMeter,
}

pub struct Renderer {
    session: ManuallyDrop<Arc<Session>>,
    state: ThreadLoopState,
    mix: AudioBus,
    output: Vec<f32>,
    resampler: Resampler,
    levels: Option<triple_buffer::Input<OutputLevels>>,
}

impl LevelMeter {
    fn update(&mut self, bus: &AudioBus, window: u64) -> (f32, f32, Option<(f32, f32)>) {
        let mut peak = 0.0f32;
        let mut sum_squares = 0.0f64;
        let mut samples = 0u64;
        for channel in bus.channels() {
            for sample in channel {
                peak = peak.max(sample.abs());
                sum_squares += f64::from(*sample) * f64::from(*sample);
            }
            samples += channel.len() as u64;
        }
        let rms = if samples == 0 {
            0.0
        } else {
            (sum_squares / samples as f64).sqrt() as f32
        };

        self.peak = self.peak.max(peak);
        self.sum_squares += sum_squares;
        self.samples += samples;
        self.window_frames += bus.num_frames() as u64;
        let window_levels = (window > 0 && self.window_frames >= window).then(|| {
            let rms = if self.samples == 0 {
                0.0
            } else {
                (self.sum_squares / self.samples as f64).sqrt() as f32
            };
            let levels = (self.peak, rms);
            *self = Self::default();
            levels
        });
        (peak, rms, window_levels)
    }
}

impl Renderer {
    pub(crate) fn new(session: Arc<Session>, levels: triple_buffer::Input<OutputLevels>) -> Self {
        let channels = cast_usize!(session.device_channels);
        let mut renderer = Self {
            state: ThreadLoopState::default(),
            mix: AudioBus::new(channels, RENDER_QUANTUM_SIZE),
            output: vec![0.0; channels * RENDER_QUANTUM_SIZE],
            resampler: Resampler::new(channels),
            levels: Some(levels),
            session: ManuallyDrop::new(session),
        };

        // Carry on with the graph an earlier renderer left active. Anything newer is still
        // pending behind a later generation.
        let session = Arc::clone(&renderer.session);
        if let Some(active) = session.graphs.active.load() {
            renderer.state.last_seen_generation = active.generation();
            renderer.adopt(&session, Some(active));
        }
        renderer
    }

    /// The last quantum, interleaved: `RENDER_QUANTUM_SIZE` frames of the device channel count.
    pub fn output(&self) -> &[f32] {
        &self.output
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Number of graphs this renderer has adopted.
    pub fn adopted_graphs(&self) -> u64 {
        self.state.adopted_graphs
    }

    /// Render one quantum into [Renderer::output]. Returns `true` if a graph produced audio,
    /// `false` if the output is silence because the session is suspended or has no graph.
    pub fn render_one_quantum(&mut self) -> bool {
        let session = Arc::clone(&self.session);
        if session.is_shut_down() {
            self.release_current(&session);
            self.output.fill(0.0);
            return false;
        }

        let suspend = session.suspend_state();
        self.maybe_swap_graph(&session);
        self.maybe_log_script_processor_never_ran(&session);

        if let Some(host) = session.worklet.host.load_for_read() {
            let sample_rate = self.context_sample_rate(&session);
            host.0
                .service_render_thread_state(self.state.rendered_frames, sample_rate as f32);
        }

        let rendered = if suspend.suspended {
            self.output.fill(0.0);
            false
        } else {
            self.render(&session)
        };

        if !suspend.suspended || !self.state.last_timing_page_was_suspended {
            self.write_timing_page(&session, suspend);
        }
        self.state.last_timing_page_was_suspended = suspend.suspended;
        rendered
    }

    fn context_sample_rate(&self, session: &Session) -> u32 {
        self.state.current.as_ref().map_or_else(
            || session.context_sample_rate.load(Ordering::Acquire),
            |graph| graph.build().description.context_sample_rate_hz,
        )
    }

    fn schedule_drain(session: &Session) {
        if !session.schedule(Task::DrainRetiredGraphs) {
            session.graphs.retired.unschedule();
        }
    }

    fn maybe_swap_graph(&mut self, session: &Session) {
        let observed = session.graphs.generation.load(Ordering::Acquire);
        if observed == self.state.last_seen_generation {
            return;
        }
        let graphs = &session.graphs;

        // Nothing pending after a generation bump means the graph was cleared on purpose.
        let taken = graphs.pending.take();
        let adopted = taken.get().cloned();
        let mut schedule = graphs
            .active
            .publish(adopted.clone())
            .retire(&graphs.retired);
        schedule |= taken.retire(&graphs.retired);
        if let Some(previous) = self.state.current.take() {
            schedule |= graphs.retired.retire(previous);
        }
        if schedule {
            Self::schedule_drain(session);
        }

        // A graph published after the generation was read may already have been taken.
        self.state.last_seen_generation = adopted
            .as_ref()
            .map_or(observed, |graph| observed.max(graph.generation()));
        self.adopt(session, adopted);
    }

    fn adopt(&mut self, session: &Session, graph: Option<Arc<PreparedGraph>>) {
        self.state.capabilities = graph
            .as_ref()
            .map(|graph| graph.capabilities())
            .unwrap_or_default();
        self.state.current = graph;
        self.resampler.reset();
        self.state.script_processor_baseline =
            (self.state.device_frames, session.script.processed_blocks());
        self.state.script_processor_logged = false;

        let Some(graph) = self.state.current.as_deref() else {
            return;
        };
        self.state.adopted_graphs += 1;
        // SAFETY: this renderer is the session's only one.
        if let Some(render) = unsafe { graph.render_mut() } {
            let script_processor = self
                .state
                .capabilities
                .has_script_processor
                .then(|| session.script.clone() as Arc<dyn ScriptProcessorHost>);
            let worklet = session
                .worklet
                .host
                .load_for_read()
                .map(|host| host.0.clone());
            render.bind_hosts(Hosts {
                script_processor,
                worklet,
            });
        }
    }

    fn maybe_log_script_processor_never_ran(&mut self, session: &Session) {
        if !self.state.capabilities.has_script_processor || self.state.script_processor_logged {
            return;
        }
        let (adopted_at, processed_at) = self.state.script_processor_baseline;
        let half_second = u64::from(session.device_sample_rate / 2);
        if self.state.device_frames.saturating_sub(adopted_at) < half_second {
            return;
        }
        self.state.script_processor_logged = true;
        if session.script.processed_blocks() == processed_at && session.debug.script_processor {
            log::warn!(
                "session {}: graph has script processors but none ran in half a second",
                session.session_id()
            );
        }
    }

    fn render(&mut self, session: &Session) -> bool {
        let channels = cast_usize!(session.device_channels);
        if self.mix.resize(channels, RENDER_QUANTUM_SIZE) {
            self.output.resize(channels * RENDER_QUANTUM_SIZE, 0.0);
        }

        let graph = self.state.current.as_deref();
        // SAFETY: this renderer is the session's only one.
        let Some((graph, render)) =
            graph.and_then(|graph| Some((graph, unsafe { graph.render_mut() }?)))
        else {
            self.output.fill(0.0);
            return false;
        };

        let device_rate = session.device_sample_rate;
        let context_rate = graph.build().description.context_sample_rate_hz;
        let mut rendered_frames = self.state.rendered_frames;
        if context_rate == device_rate {
            let context = ProcessContext {
                sample_rate: context_rate as f32,
                quantum_size: RENDER_QUANTUM_SIZE,
                rendered_frames,
            };
            render.process(&context, &mut self.mix);
            rendered_frames += RENDER_QUANTUM_SIZE as u64;
        } else {
            self.resampler.process(
                context_rate as f32,
                device_rate as f32,
                &mut self.mix,
                |bus| {
                    let context = ProcessContext {
                        sample_rate: context_rate as f32,
                        quantum_size: RENDER_QUANTUM_SIZE,
                        rendered_frames,
                    };
                    render.process(&context, bus);
                    rendered_frames += RENDER_QUANTUM_SIZE as u64;
                },
            );
        }
        self.state.rendered_frames = rendered_frames;
        self.state.device_frames += RENDER_QUANTUM_SIZE as u64;
        session
            .rendered_frames
            .store(rendered_frames, Ordering::Relaxed);

        self.mix.interleave_into(&mut self.output);
        publish_telemetry(session, &graph.build().description, render, rendered_frames);

        let (peak, rms, window) = self
            .state
            .meter
            .update(&self.mix, u64::from(device_rate));
        if let Some(levels) = &mut self.levels {
            levels.write(OutputLevels {
                peak,
                rms,
                device_frames: self.state.device_frames,
            });
        }
        if let Some((peak, rms)) = window {
            if session.debug.output {
                log::debug!(
                    "session {}: output peak {peak:.3} rms {rms:.3}",
                    session.session_id()
                );
            }
        }
        true
    }

    fn write_timing_page(&self, session: &Session, suspend: SuspendState) {
        if let Some(page) = &session.timing_page {
            page.write(&TimingSnapshot {
                context_sample_rate: self.context_sample_rate(session),
                channel_count: session.device_channels,
                rendered_frames: self.state.rendered_frames,
                underrun_frames: session.underrun_frames(),
                graph_generation: self.state.last_seen_generation,
                suspend_state: suspend,
            });
        }
        if session.notifier.notify() == Notify::Disabled {
            log::warn!(
                "session {}: timing notification pipe failed, notifications disabled",
                session.session_id()
            );
        }
    }

    fn release_current(&mut self, session: &Session) {
        if let Some(graph) = self.state.current.take() {
            if session.graphs.retired.retire(graph) {
                Self::schedule_drain(session);
            }
        }
        self.state.capabilities = Capabilities::default();
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // SAFETY: the field is not touched again.
        let session = unsafe { ManuallyDrop::take(&mut self.session) };
        self.release_current(&session);
        if let Some(levels) = self.levels.take() {
            lock(&session.levels_input).replace(levels);
        }
        session.renderer_taken.store(false, Ordering::Release);

        // The last reference shuts the session down, which only the control thread may do.
        let control = session.control.clone();
        control.release(session);
    }
}

fn publish_telemetry(
    session: &Session,
    description: &GraphDescription,
    render: &dyn Render,
    rendered_frames: u64,
) {
    if let Some(analysers) = session.streams.analysers.load_for_read() {
        for index in 0..render.analyser_count() {
            let node = render.analyser_node_id(index);
            if let Some(binding) = analysers.get(&node.0) {
                publish_analyser(binding, render, index, node, rendered_frames);
            }
        }
    }

    if let Some(compressors) = session.streams.compressors.load_for_read() {
        for (node_id, binding) in compressors.iter() {
            let node = NodeId(*node_id);
            if !matches!(
                description.nodes.get(&node),
                Some(GraphNode::DynamicsCompressor { .. })
            ) {
                continue;
            }
            if let Some(reduction_db) = render.try_copy_dynamics_compressor_reduction(node) {
                publish_compressor(binding, node, reduction_db, rendered_frames);
            }
        }
    }
}

fn publish_analyser(
    binding: &AnalyserBinding,
    render: &dyn Render,
    index: usize,
    node: NodeId,
    rendered_frames: u64,
) -> bool {
    let Some(mut block) = binding.stream.acquire() else {
        return false;
    };
    let filled = match analyser_snapshot_mut(block.bytes_mut(), binding.fft_size) {
        Some(snapshot) => {
            *snapshot.header = AnalyserSnapshotHeader {
                version: ANALYSER_SNAPSHOT_VERSION,
                fft_size: binding.fft_size,
                analyser_node_id: node.0,
                rendered_frames_total: rendered_frames,
                reserved: 0,
            };
            render.copy_analyser_time_domain_data(index, snapshot.time_domain)
                && render.copy_analyser_frequency_data_db(index, snapshot.frequency_db)
        }
        None => false,
    };
    filled && block.submit(analyser_snapshot_size(binding.fft_size))
}

fn publish_compressor(
    binding: &DynamicsCompressorBinding,
    node: NodeId,
    reduction_db: f32,
    rendered_frames: u64,
) -> bool {
    let Some(mut block) = binding.stream.acquire() else {
        return false;
    };
    let Some(header) = dynamics_compressor_snapshot_mut(block.bytes_mut()) else {
        return false;
    };
    *header = DynamicsCompressorSnapshotHeader {
        version: DYNAMICS_COMPRESSOR_SNAPSHOT_VERSION,
        reduction_db,
        compressor_node_id: node.0,
        rendered_frames_total: rendered_frames,
    };
    block.submit(dynamics_compressor_snapshot_size())
}
