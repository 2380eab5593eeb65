use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use graph::{
    BuildResult, GraphDescription, GraphNode, GraphResources, PreparedGraph, RENDER_QUANTUM_SIZE,
    UpdateKind, classify,
};
use processor::ScriptProcessorHost;
use util::{PublishSlot, RetirementList};

use crate::{Session, Task, session::lock};

#[derive(Default)]
pub(crate) struct GraphState {
    /// Bumped once per published graph, after it is in the pending slot.
    pub generation: AtomicU64,
    pub pending: PublishSlot<PreparedGraph>,
    pub active: PublishSlot<PreparedGraph>,
    pub retired: RetirementList<PreparedGraph>,
    /// The latest graph set from a thread other than the control thread.
    pub deferred: Mutex<Option<BuildResult>>,
    /// The description the running graph reflects, including incremental updates.
    pub applied: Mutex<Option<GraphDescription>>,
}

impl Session {
    /// Render `build` from now on. Applied immediately on the control thread; from any other
    /// thread the newest build is kept and applied by the control loop.
    pub fn set_render_graph(&self, build: BuildResult) {
        if self.control.is_control_thread() {
            self.apply_render_graph(build);
            return;
        }
        lock(&self.graphs.deferred).replace(build);
        if !self.schedule(Task::ApplyDeferredGraph) {
            log::warn!(
                "session {}: control loop is full, deferred graph waits for the next update",
                self.session_id()
            );
        }
    }

    pub(crate) fn apply_deferred_graph_if_any(&self) {
        let build = lock(&self.graphs.deferred).take();
        if let Some(build) = build {
            self.apply_render_graph(build);
        }
    }

    pub(crate) fn most_recent_graph(&self) -> Option<Arc<PreparedGraph>> {
        self.graphs.pending.load().or_else(|| self.graphs.active.load())
    }

    pub(crate) fn apply_render_graph(&self, mut build: BuildResult) {
        if self.device_sample_rate == 0 || self.device_channels == 0 {
            log::debug!(
                "session {}: no device parameters, ignoring graph",
                self.session_id()
            );
            return;
        }
        if self.is_shut_down() {
            return;
        }

        let description = &mut build.description;
        if description.context_sample_rate_hz == 0 {
            description.context_sample_rate_hz = self.device_sample_rate;
        }
        description.normalize();
        if let Some(channels) = description
            .destination_mut()
            .and_then(GraphNode::channels_mut)
        {
            channels.channel_count = self.device_channels;
        }
        if let Err(error) = description.validate() {
            log::warn!("session {}: rejecting graph: {error}", self.session_id());
            return;
        }

        let kind = self.classify(&build.description);
        if self.debug.info {
            log::info!("session {}: graph update is {kind:?}", self.session_id());
        }
        match kind {
            UpdateKind::None => return,
            UpdateKind::Parameter | UpdateKind::Topology => {
                if self.apply_incremental(kind, &build.description) {
                    lock(&self.graphs.applied).replace(build.description);
                    return;
                }
                log::debug!(
                    "session {}: executor refused {kind:?} update, rebuilding",
                    self.session_id()
                );
            }
            UpdateKind::RebuildRequired => (),
        }
        self.rebuild(build);
    }

    fn classify(&self, description: &GraphDescription) -> UpdateKind {
        let Some(graph) = self.most_recent_graph() else {
            return UpdateKind::RebuildRequired;
        };
        let Some(control) = graph.control() else {
            return UpdateKind::RebuildRequired;
        };
        let applied = lock(&self.graphs.applied);
        let Some(applied) = applied.as_ref() else {
            return UpdateKind::RebuildRequired;
        };
        if applied.context_sample_rate_hz != description.context_sample_rate_hz {
            return UpdateKind::RebuildRequired;
        }
        classify(applied, description).max(control.classify_update(description))
    }

    fn apply_incremental(&self, kind: UpdateKind, description: &GraphDescription) -> bool {
        let Some(graph) = self.most_recent_graph() else {
            return false;
        };
        let Some(control) = graph.control() else {
            return false;
        };
        let applied = match kind {
            UpdateKind::Parameter => control.enqueue_parameter_update(description),
            _ => control.enqueue_topology_update(description),
        };
        if applied {
            control.collect_retired_updates();
        }
        applied
    }

    pub(crate) fn graph_resources(&self) -> GraphResources {
        let media_stream_sources = self
            .streams
            .media_streams
            .snapshot()
            .into_iter()
            .map(|(provider_id, binding)| (provider_id, binding.provider.clone()))
            .collect();
        GraphResources {
            media_element_sources: self.streams.media_elements.snapshot(),
            media_stream_sources,
            script_processor_host: Some(self.script.clone() as Arc<dyn ScriptProcessorHost>),
        }
    }

    fn rebuild(&self, mut build: BuildResult) {
        build.resources = self.graph_resources();
        let sample_rate = build.description.context_sample_rate_hz;
        let executor = match self.collaborators.executor_factory.build(
            &build,
            sample_rate as f32,
            RENDER_QUANTUM_SIZE,
        ) {
            Ok(executor) => executor,
            Err(error) => {
                log::warn!("session {}: {error}", self.session_id());
                return;
            }
        };
        self.context_sample_rate
            .store(sample_rate, Ordering::Release);
        self.ensure_worklet_host();

        let description = build.description.clone();
        let generation = self.graphs.generation.load(Ordering::Acquire) + 1;
        let graph = Arc::new(PreparedGraph::new(build, executor, generation));
        self.graphs.pending.publish(Some(graph)).release();
        self.graphs.generation.fetch_add(1, Ordering::AcqRel);
        lock(&self.graphs.applied).replace(description);
        if self.debug.info {
            log::info!(
                "session {}: published graph generation {generation}",
                self.session_id()
            );
        }
    }

    pub(crate) fn republish_graph(&self) {
        if self.is_shut_down() {
            return;
        }
        let description = lock(&self.graphs.applied).clone();
        if let Some(description) = description {
            self.rebuild(BuildResult::new(description));
        }
    }

    pub(crate) fn drain_retired_graphs(&self) {
        let drained = self.graphs.retired.drain();
        if drained.released > 0 && self.debug.info {
            log::debug!(
                "session {}: released {} retired graphs",
                self.session_id(),
                drained.released
            );
        }
        if let Some(graph) = self.graphs.active.load() {
            if let Some(control) = graph.control() {
                control.collect_retired_updates();
            }
        }
        if drained.reschedule && !self.schedule(Task::DrainRetiredGraphs) {
            self.graphs.retired.unschedule();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, atomic::Ordering},
        thread,
    };

    use graph::{Connection, GraphNode, NodeId, node::ChannelCountMode};

    use crate::testing::{Fixture, build, constant};

    #[test]
    fn parameter_changes_patch_the_executor() {
        let fixture = Fixture::new();
        let session = &fixture.session;
        let mut renderer = session.renderer().unwrap();
        session.set_suspended(false, 1);

        session.set_render_graph(build(constant(0.25)));
        renderer.render_one_quantum();
        session.set_render_graph(build(constant(0.5)));
        assert_eq!(fixture.recorder.builds(), 1);
        assert_eq!(fixture.recorder.parameter_updates.load(Ordering::SeqCst), 1);
        assert_eq!(session.graph_generation(), 1);

        renderer.render_one_quantum();
        assert!(renderer.output().iter().all(|sample| *sample == 0.5));

        // Compared against the patched description, not the one first built.
        session.set_render_graph(build(constant(0.5)));
        assert_eq!(fixture.recorder.parameter_updates.load(Ordering::SeqCst), 1);
        assert_eq!(fixture.recorder.builds(), 1);
    }

    #[test]
    fn connection_changes_are_topology_updates() {
        let fixture = Fixture::new();
        let session = &fixture.session;
        session.set_render_graph(build(constant(0.25)));

        let mut description = constant(0.25);
        description.connections[0].destination_input = 1;
        session.set_render_graph(build(description.clone()));
        assert_eq!(fixture.recorder.topology_updates.load(Ordering::SeqCst), 1);

        if let Some(GraphNode::Destination { channels }) =
            description.nodes.get_mut(&NodeId(1))
        {
            channels.mode = ChannelCountMode::Explicit;
        }
        session.set_render_graph(build(description));
        assert_eq!(fixture.recorder.topology_updates.load(Ordering::SeqCst), 2);
        assert_eq!(fixture.recorder.builds(), 1);
        assert_eq!(session.graph_generation(), 1);
    }

    #[test]
    fn refused_updates_rebuild() {
        let fixture = Fixture::new();
        let session = &fixture.session;
        session.set_render_graph(build(constant(0.25)));
        fixture.recorder.refuse_incremental.store(true, Ordering::SeqCst);

        session.set_render_graph(build(constant(0.5)));
        assert_eq!(fixture.recorder.builds(), 2);
        assert_eq!(session.graph_generation(), 2);
    }

    #[test]
    fn structural_changes_rebuild() {
        let fixture = Fixture::new();
        let session = &fixture.session;
        session.set_render_graph(build(constant(0.25)));

        let mut description = constant(0.25);
        description
            .nodes
            .insert(NodeId(3), GraphNode::ConstantSource { offset: 0.25 });
        session.set_render_graph(build(description));
        assert_eq!(fixture.recorder.builds(), 2);

        let mut description = constant(0.25);
        description.context_sample_rate_hz = 44100;
        session.set_render_graph(build(description));
        assert_eq!(fixture.recorder.builds(), 3);
        assert_eq!(session.context_sample_rate(), 44100);
        assert_eq!(session.graph_generation(), 3);
    }

    #[test]
    fn identical_graphs_are_ignored() {
        let fixture = Fixture::new();
        let session = &fixture.session;
        session.set_render_graph(build(constant(0.25)));

        // Zero means the device rate, and connection order does not matter.
        let mut description = constant(0.25);
        description.context_sample_rate_hz = 48000;
        description.connections.push(description.connections[0]);
        session.set_render_graph(build(description));
        assert_eq!(fixture.recorder.builds(), 1);
        assert_eq!(fixture.recorder.parameter_updates.load(Ordering::SeqCst), 0);
        assert_eq!(fixture.recorder.topology_updates.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn invalid_graphs_are_rejected() {
        let fixture = Fixture::new();
        let session = &fixture.session;

        let mut description = constant(0.25);
        description.connections.push(Connection {
            source: NodeId(9),
            source_output: 0,
            destination: NodeId(1),
            destination_input: 0,
        });
        session.set_render_graph(build(description));

        let mut description = constant(0.25);
        description.destination_node_id = NodeId(4);
        session.set_render_graph(build(description));

        let mut description = constant(0.25);
        description.nodes.insert(
            NodeId(3),
            GraphNode::Oscillator {
                waveform: Default::default(),
                frequency: -1.0,
                detune: 0.0,
            },
        );
        session.set_render_graph(build(description));

        assert_eq!(fixture.recorder.builds(), 0);
        assert_eq!(session.graph_generation(), 0);
    }

    #[test]
    fn destination_follows_the_device() {
        let fixture = Fixture::builder().device(48000, 6).build();
        let session = &fixture.session;
        let mut renderer = session.renderer().unwrap();
        session.set_suspended(false, 1);
        session.set_render_graph(build(constant(0.25)));

        let graph = session.most_recent_graph().unwrap();
        assert_eq!(
            graph
                .build()
                .description
                .destination()
                .and_then(GraphNode::channels)
                .map(|channels| channels.channel_count),
            Some(6)
        );
        renderer.render_one_quantum();
        assert_eq!(renderer.output().len(), 6 * graph::RENDER_QUANTUM_SIZE);
    }

    #[test]
    fn missing_device_parameters_ignore_graphs() {
        let fixture = Fixture::builder().device(0, 2).build();
        fixture.session.set_render_graph(build(constant(0.25)));
        assert_eq!(fixture.recorder.builds(), 0);
        assert_eq!(fixture.session.graph_generation(), 0);
    }

    #[test]
    fn graphs_from_other_threads_are_deferred() {
        let fixture = Fixture::new();
        let session = fixture.session.clone();

        let worker = {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                session.set_render_graph(build(constant(0.25)));
                session.set_render_graph(build(constant(0.5)));
            })
        };
        worker.join().unwrap();
        assert_eq!(session.graph_generation(), 0);

        fixture.control.run_pending();
        assert_eq!(fixture.recorder.builds(), 1);
        assert_eq!(session.graph_generation(), 1);
        let graph = session.most_recent_graph().unwrap();
        assert_eq!(
            graph.build().description.nodes.get(&NodeId(2)),
            Some(&GraphNode::ConstantSource { offset: 0.5 })
        );
    }

    #[test]
    fn retired_graphs_are_drained_on_the_control_loop() {
        let fixture = Fixture::new();
        let session = &fixture.session;
        let mut renderer = session.renderer().unwrap();
        session.set_suspended(false, 1);

        session.set_render_graph(build(constant(0.25)));
        renderer.render_one_quantum();
        let mut description = constant(0.25);
        description
            .nodes
            .insert(NodeId(3), GraphNode::ConstantSource { offset: 0.25 });
        session.set_render_graph(build(description));
        renderer.render_one_quantum();
        assert_eq!(renderer.adopted_graphs(), 2);
        assert_eq!(fixture.recorder.drop_count(), 0);
        assert!(!session.graphs.retired.is_empty());

        fixture.control.run_pending();
        assert!(session.graphs.retired.is_empty());
        assert_eq!(fixture.recorder.drop_count(), 2);
        assert!(renderer.output().iter().all(|sample| *sample == 0.5));
    }
}
