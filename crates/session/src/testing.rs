use std::{
    os::fd::OwnedFd,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering},
    },
    thread::{self, ThreadId},
};

use buffer::AudioBus;
use graph::{
    BuildResult, Connection, Control, Error, Executor, ExecutorFactory, GraphDescription,
    GraphNode, Hosts, NodeId, ProcessContext, Render, UpdateKind, node::ChannelConfig,
};
use processor::{
    AudioInputClient, AudioInputMetadata, HostError, InputStreamError, ScriptProcessorBlock,
    WorkletEvents, WorkletHost, WorkletHostFactory, WorkletHostInit, WorkletModule,
    WorkletNodeDefinition, WorkletPortBinding,
};
use stream::{
    TimingPage,
    ring::{RingFormat, RingProducer, RingStreamDescriptor, ring_stream},
};
use util::collections::Map;

use crate::{Collaborators, ControlLoop, DebugFlags, Session, SessionOptions};

/// Reduction every test compressor reports.
pub const TEST_REDUCTION_DB: f32 = -3.0;

/// What the test executors have been asked to do.
#[derive(Default)]
pub struct Recorder {
    pub builds: AtomicUsize,
    pub parameter_updates: AtomicUsize,
    pub topology_updates: AtomicUsize,
    pub refuse_incremental: AtomicBool,
    pub bound_hosts: AtomicUsize,
    /// Thread of every executor half dropped so far.
    pub drops: Mutex<Vec<ThreadId>>,
}

impl Recorder {
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn dropped_on(&self, thread: ThreadId) -> usize {
        self.drops
            .lock()
            .unwrap()
            .iter()
            .filter(|id| **id == thread)
            .count()
    }

    pub fn drop_count(&self) -> usize {
        self.drops.lock().unwrap().len()
    }
}

struct Tracker(Arc<Recorder>);

impl Drop for Tracker {
    fn drop(&mut self) {
        self.0.drops.lock().unwrap().push(thread::current().id());
    }
}

fn dc_level(description: &GraphDescription) -> f32 {
    description
        .nodes
        .values()
        .map(|node| match node {
            GraphNode::ConstantSource { offset } => *offset,
            _ => 0.0,
        })
        .sum()
}

struct TestRender {
    level: Arc<AtomicU32>,
    analysers: Vec<(NodeId, u32)>,
    compressors: Vec<NodeId>,
    script_nodes: Vec<u64>,
    script_input: AudioBus,
    script_output: AudioBus,
    hosts: Hosts,
    recorder: Arc<Recorder>,
    _tracker: Tracker,
}

struct TestControl {
    level: Arc<AtomicU32>,
    recorder: Arc<Recorder>,
    _tracker: Tracker,
}

impl Render for TestRender {
    fn process(&mut self, context: &ProcessContext, output: &mut AudioBus) {
        let level = f32::from_bits(self.level.load(Ordering::Relaxed));
        for channel in output.channels_mut() {
            channel.fill(level);
        }
        if let Some(host) = &self.hosts.script_processor {
            for node_id in &self.script_nodes {
                host.process(
                    *node_id,
                    ScriptProcessorBlock {
                        rendered_frames: context.rendered_frames,
                        sample_rate: context.sample_rate,
                        input: &self.script_input,
                        output: &mut self.script_output,
                    },
                );
            }
        }
    }

    fn bind_hosts(&mut self, hosts: Hosts) {
        self.recorder.bound_hosts.fetch_add(1, Ordering::SeqCst);
        self.hosts = hosts;
    }

    fn analyser_count(&self) -> usize {
        self.analysers.len()
    }

    fn analyser_node_id(&self, index: usize) -> NodeId {
        self.analysers[index].0
    }

    fn copy_analyser_time_domain_data(&self, index: usize, output: &mut [f32]) -> bool {
        if index >= self.analysers.len() {
            return false;
        }
        output.fill(f32::from_bits(self.level.load(Ordering::Relaxed)));
        true
    }

    fn copy_analyser_frequency_data_db(&self, index: usize, output: &mut [f32]) -> bool {
        if index >= self.analysers.len() {
            return false;
        }
        output.fill(-100.0);
        true
    }

    fn try_copy_dynamics_compressor_reduction(&self, node: NodeId) -> Option<f32> {
        self.compressors.contains(&node).then_some(TEST_REDUCTION_DB)
    }
}

impl Control for TestControl {
    fn classify_update(&self, _description: &GraphDescription) -> UpdateKind {
        UpdateKind::None
    }

    fn enqueue_parameter_update(&self, description: &GraphDescription) -> bool {
        if self.recorder.refuse_incremental.load(Ordering::SeqCst) {
            return false;
        }
        self.recorder.parameter_updates.fetch_add(1, Ordering::SeqCst);
        self.level
            .store(dc_level(description).to_bits(), Ordering::Relaxed);
        true
    }

    fn enqueue_topology_update(&self, description: &GraphDescription) -> bool {
        if self.recorder.refuse_incremental.load(Ordering::SeqCst) {
            return false;
        }
        self.recorder.topology_updates.fetch_add(1, Ordering::SeqCst);
        self.level
            .store(dc_level(description).to_bits(), Ordering::Relaxed);
        true
    }

    fn collect_retired_updates(&self) {}
}

#[derive(Default)]
pub struct TestFactory {
    pub recorder: Arc<Recorder>,
}

impl ExecutorFactory for TestFactory {
    fn build(
        &self,
        build: &BuildResult,
        _sample_rate: f32,
        quantum_size: usize,
    ) -> Result<Executor, Error> {
        let description = &build.description;
        if description.nodes.values().any(|node| {
            matches!(node, GraphNode::Oscillator { frequency, .. } if *frequency < 0.0)
        }) {
            return Err(Error::Build("negative frequency".into()));
        }
        self.recorder.builds.fetch_add(1, Ordering::SeqCst);

        let mut analysers = Vec::new();
        let mut compressors = Vec::new();
        let mut script_nodes = Vec::new();
        for (id, node) in &description.nodes {
            match node {
                GraphNode::Analyser { fft_size, .. } => analysers.push((*id, *fft_size)),
                GraphNode::DynamicsCompressor { .. } => compressors.push(*id),
                GraphNode::ScriptProcessor { .. } => script_nodes.push(id.0),
                _ => (),
            }
        }

        let level = Arc::new(AtomicU32::new(dc_level(description).to_bits()));
        let render = TestRender {
            level: level.clone(),
            analysers,
            compressors,
            script_nodes,
            script_input: AudioBus::new(2, quantum_size),
            script_output: AudioBus::new(2, quantum_size),
            hosts: Hosts::default(),
            recorder: self.recorder.clone(),
            _tracker: Tracker(self.recorder.clone()),
        };
        let control = TestControl {
            level,
            recorder: self.recorder.clone(),
            _tracker: Tracker(self.recorder.clone()),
        };
        Ok(Executor {
            render: Box::new(render),
            control: Box::new(control),
        })
    }
}

pub struct TestWorkletHost {
    initial_modules: usize,
    initial_ports: usize,
    enqueued_modules: AtomicUsize,
    serviced: AtomicU64,
    definitions: Mutex<Vec<WorkletNodeDefinition>>,
}

impl TestWorkletHost {
    pub fn initial_modules(&self) -> usize {
        self.initial_modules
    }

    pub fn initial_ports(&self) -> usize {
        self.initial_ports
    }

    pub fn enqueued_modules(&self) -> usize {
        self.enqueued_modules.load(Ordering::SeqCst)
    }

    pub fn serviced(&self) -> u64 {
        self.serviced.load(Ordering::SeqCst)
    }

    pub fn definitions(&self) -> usize {
        self.definitions.lock().unwrap().len()
    }
}

impl WorkletHost for TestWorkletHost {
    fn service_render_thread_state(&self, _rendered_frames: u64, _sample_rate: f32) {
        self.serviced.fetch_add(1, Ordering::SeqCst);
    }

    fn enqueue_module(&self, _module: WorkletModule) {
        self.enqueued_modules.fetch_add(1, Ordering::SeqCst);
    }

    fn enqueue_port_bindings(&self, _bindings: Vec<WorkletPortBinding>) {}

    fn synchronize_node_definitions(&self, definitions: &[WorkletNodeDefinition]) {
        *self.definitions.lock().unwrap() = definitions.to_vec();
    }
}

#[derive(Default)]
pub struct TestWorkletFactory {
    created: AtomicUsize,
    host: Mutex<Option<Arc<TestWorkletHost>>>,
    events: Mutex<Option<Arc<dyn WorkletEvents>>>,
}

impl TestWorkletFactory {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn host(&self) -> Option<Arc<TestWorkletHost>> {
        self.host.lock().unwrap().clone()
    }

    pub fn events(&self) -> Option<Arc<dyn WorkletEvents>> {
        self.events.lock().unwrap().clone()
    }
}

impl WorkletHostFactory for TestWorkletFactory {
    fn create(&self, init: WorkletHostInit) -> Result<Arc<dyn WorkletHost>, HostError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let host = Arc::new(TestWorkletHost {
            initial_modules: init.modules.len(),
            initial_ports: init.port_bindings.len(),
            enqueued_modules: AtomicUsize::new(0),
            serviced: AtomicU64::new(0),
            definitions: Mutex::new(init.node_definitions),
        });
        *self.host.lock().unwrap() = Some(host.clone());
        *self.events.lock().unwrap() = Some(init.events);
        Ok(host)
    }
}

/// An audio server that opens one ring per request. Device `u64::MAX` does not exist.
#[derive(Default)]
pub struct TestAudioInput {
    next_stream: AtomicU64,
    producers: Mutex<Map<u64, RingProducer>>,
    destroyed: Mutex<Vec<u64>>,
}

impl TestAudioInput {
    pub fn opened(&self) -> u64 {
        self.next_stream.load(Ordering::SeqCst)
    }

    pub fn live_streams(&self) -> usize {
        self.producers.lock().unwrap().len()
    }

    pub fn destroyed(&self) -> Vec<u64> {
        self.destroyed.lock().unwrap().clone()
    }
}

impl AudioInputClient for TestAudioInput {
    fn create_audio_input_stream(
        &self,
        metadata: &AudioInputMetadata,
    ) -> Result<RingStreamDescriptor, InputStreamError> {
        if metadata.device_id == u64::MAX {
            return Err(InputStreamError::NoDevice(metadata.device_id));
        }
        let stream_id = self.next_stream.fetch_add(1, Ordering::SeqCst) + 1;
        let format = RingFormat {
            sample_rate_hz: metadata.sample_rate_hz,
            channel_count: metadata.channel_count,
            channel_capacity: metadata.channel_count,
            capacity_frames: metadata.capacity_frames,
        };
        let (producer, descriptor) = ring_stream(stream_id, format, metadata.overflow_policy)
            .map_err(|error| InputStreamError::Rejected(error.to_string()))?;
        self.producers.lock().unwrap().insert(stream_id, producer);
        Ok(descriptor)
    }

    fn destroy_audio_input_stream(&self, stream_id: u64) -> Result<(), InputStreamError> {
        self.destroyed.lock().unwrap().push(stream_id);
        self.producers
            .lock()
            .unwrap()
            .remove(&stream_id)
            .map(drop)
            .ok_or(InputStreamError::UnknownStream(stream_id))
    }
}

pub struct Fixture {
    pub session: Arc<Session>,
    pub control: ControlLoop,
    pub recorder: Arc<Recorder>,
    pub timing_page: Option<Arc<TimingPage>>,
    /// Read end of the timing notification pipe.
    pub timing_reader: Option<OwnedFd>,
}

pub struct FixtureBuilder {
    sample_rate: u32,
    channels: u32,
    worklet: Option<Arc<TestWorkletFactory>>,
    audio_input: Option<Arc<TestAudioInput>>,
    timing: bool,
    debug: DebugFlags,
}

impl Fixture {
    pub fn builder() -> FixtureBuilder {
        FixtureBuilder {
            sample_rate: 48000,
            channels: 2,
            worklet: None,
            audio_input: None,
            timing: false,
            debug: DebugFlags::default(),
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }
}

impl FixtureBuilder {
    pub fn device(mut self, sample_rate: u32, channels: u32) -> Self {
        self.sample_rate = sample_rate;
        self.channels = channels;
        self
    }

    pub fn worklet(mut self, factory: Arc<TestWorkletFactory>) -> Self {
        self.worklet = Some(factory);
        self
    }

    pub fn audio_input(mut self, client: Arc<TestAudioInput>) -> Self {
        self.audio_input = Some(client);
        self
    }

    pub fn timing(mut self) -> Self {
        self.timing = true;
        self
    }

    pub fn debug(mut self, debug: DebugFlags) -> Self {
        self.debug = debug;
        self
    }

    pub fn build(self) -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();
        let control = ControlLoop::new();
        let factory = Arc::new(TestFactory::default());
        let recorder = factory.recorder.clone();

        let (timing_page, timing_reader, timing_notify_fd) = if self.timing {
            let (read, write) = stream::timing::notification_pipe().unwrap();
            (Some(Arc::new(TimingPage::new())), Some(read), Some(write))
        } else {
            (None, None, None)
        };

        let mut collaborators = Collaborators::new(factory);
        collaborators.worklet_host_factory = self
            .worklet
            .map(|factory| factory as Arc<dyn WorkletHostFactory>);
        collaborators.audio_input = self
            .audio_input
            .map(|client| client as Arc<dyn AudioInputClient>);

        let options = SessionOptions {
            session_id: 1,
            client_id: 7,
            device_sample_rate_hz: self.sample_rate,
            device_channel_count: self.channels,
            timing_page: timing_page.clone(),
            timing_notify_fd,
            debug: self.debug,
        };
        let session = Session::new(options, collaborators, control.handle());
        Fixture {
            session,
            control,
            recorder,
            timing_page,
            timing_reader,
        }
    }
}

/// A destination (node 1) fed by a constant source (node 2) at `offset`.
pub fn constant(offset: f32) -> GraphDescription {
    let mut description = GraphDescription {
        destination_node_id: NodeId(1),
        ..Default::default()
    };
    description.nodes.insert(
        NodeId(1),
        GraphNode::Destination {
            channels: ChannelConfig::new(2),
        },
    );
    description
        .nodes
        .insert(NodeId(2), GraphNode::ConstantSource { offset });
    description.connections.push(Connection {
        source: NodeId(2),
        source_output: 0,
        destination: NodeId(1),
        destination_input: 0,
    });
    description
}

pub fn build(description: GraphDescription) -> BuildResult {
    BuildResult::new(description)
}
