use std::sync::{
    Arc, Mutex, PoisonError, Weak,
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
};

use stream::{SuspendState, TimingNotifier, TimingPage};

use crate::{
    Collaborators, ControlHandle, DebugFlags, MAX_CHANNELS, SessionOptions, Task,
    apply::GraphState,
    render::{OutputLevels, Renderer},
    script::ScriptProcessorBridge,
    streams::StreamState,
    worklet::WorkletState,
};

/// One audio context's rendering state. See the crate documentation.
pub struct Session {
    pub(crate) this: Weak<Session>,
    session_id: u64,
    client_id: u64,
    pub(crate) device_sample_rate: u32,
    pub(crate) device_channels: u32,
    pub(crate) context_sample_rate: AtomicU32,
    pub(crate) debug: DebugFlags,
    pub(crate) timing_page: Option<Arc<TimingPage>>,
    pub(crate) notifier: TimingNotifier,
    pub(crate) suspend_state: AtomicU64,
    pub(crate) underrun_frames: AtomicU64,
    pub(crate) rendered_frames: AtomicU64,
    pub(crate) graphs: GraphState,
    pub(crate) streams: StreamState,
    pub(crate) script: Arc<ScriptProcessorBridge>,
    pub(crate) worklet: WorkletState,
    pub(crate) levels: Mutex<triple_buffer::Output<OutputLevels>>,
    pub(crate) levels_input: Mutex<Option<triple_buffer::Input<OutputLevels>>>,
    pub(crate) renderer_taken: AtomicBool,
    pub(crate) control: ControlHandle,
    pub(crate) collaborators: Collaborators,
    shut_down: AtomicBool,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    /// Create a session on the control thread. A zero device rate or channel count leaves the
    /// session inert: it renders silence and ignores graphs.
    pub fn new(
        options: SessionOptions,
        collaborators: Collaborators,
        control: ControlHandle,
    ) -> Arc<Self> {
        let SessionOptions {
            session_id,
            client_id,
            device_sample_rate_hz,
            device_channel_count,
            timing_page,
            timing_notify_fd,
            debug,
        } = options;

        let device_channels = if device_channel_count > MAX_CHANNELS {
            log::warn!(
                "session {session_id}: clamping {device_channel_count} device channels to {MAX_CHANNELS}"
            );
            MAX_CHANNELS
        } else {
            device_channel_count
        };
        if device_sample_rate_hz == 0 || device_channels == 0 {
            log::warn!(
                "session {session_id}: device parameters missing ({device_sample_rate_hz} Hz, \
                 {device_channels} channels), graphs will be ignored"
            );
        } else if debug.info {
            log::info!(
                "session {session_id} for client {client_id}: {device_sample_rate_hz} Hz, \
                 {device_channels} channels"
            );
        }

        let (levels_input, levels) = triple_buffer::triple_buffer(&OutputLevels::default());
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            session_id,
            client_id,
            device_sample_rate: device_sample_rate_hz,
            device_channels,
            context_sample_rate: AtomicU32::new(device_sample_rate_hz),
            debug,
            timing_page,
            notifier: TimingNotifier::new(timing_notify_fd),
            suspend_state: AtomicU64::new(
                SuspendState {
                    suspended: true,
                    generation: 0,
                }
                .encode(),
            ),
            underrun_frames: AtomicU64::new(0),
            rendered_frames: AtomicU64::new(0),
            graphs: GraphState::default(),
            streams: StreamState::default(),
            script: Arc::new(ScriptProcessorBridge::new()),
            worklet: WorkletState::default(),
            levels: Mutex::new(levels),
            levels_input: Mutex::new(Some(levels_input)),
            renderer_taken: AtomicBool::new(false),
            control,
            collaborators,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    pub fn device_sample_rate(&self) -> u32 {
        self.device_sample_rate
    }

    pub fn device_channel_count(&self) -> u32 {
        self.device_channels
    }

    pub fn context_sample_rate(&self) -> u32 {
        self.context_sample_rate.load(Ordering::Acquire)
    }

    pub fn debug_flags(&self) -> DebugFlags {
        self.debug
    }

    /// Number of graphs published so far. Never decreases.
    pub fn graph_generation(&self) -> u64 {
        self.graphs.generation.load(Ordering::Acquire)
    }

    pub fn script_processor_bridge(&self) -> &Arc<ScriptProcessorBridge> {
        &self.script
    }

    /// Frames rendered at the context rate so far.
    pub fn rendered_frames(&self) -> u64 {
        self.rendered_frames.load(Ordering::Relaxed)
    }

    pub fn timing_notifications_enabled(&self) -> bool {
        self.notifier.is_open()
    }

    /// Suspend or resume rendering from the next quantum on. Requests carry a generation and a
    /// request older than the current state is ignored, so repeating a request is harmless.
    pub fn set_suspended(&self, suspended: bool, generation: u64) {
        let requested = SuspendState {
            suspended,
            generation,
        };
        let result = self
            .suspend_state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                (SuspendState::decode(raw).generation <= generation).then(|| requested.encode())
            });
        if result.is_err() && self.debug.info {
            log::info!(
                "session {}: ignoring stale suspend request {requested:?}",
                self.session_id
            );
        }
    }

    pub fn suspend_state(&self) -> SuspendState {
        SuspendState::decode(self.suspend_state.load(Ordering::Acquire))
    }

    /// Record device underruns. Shown on the timing page.
    pub fn note_underrun(&self, frames: u64) {
        self.underrun_frames.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn underrun_frames(&self) -> u64 {
        self.underrun_frames.load(Ordering::Relaxed)
    }

    /// The render thread entry point. There is at most one renderer at a time; `None` while
    /// another one is alive.
    pub fn renderer(self: &Arc<Self>) -> Option<Renderer> {
        if self.renderer_taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        let Some(levels) = lock(&self.levels_input).take() else {
            self.renderer_taken.store(false, Ordering::Release);
            return None;
        };
        Some(Renderer::new(self.clone(), levels))
    }

    /// The newest output levels published by the renderer.
    pub fn output_levels(&self) -> OutputLevels {
        *lock(&self.levels).read()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Release everything the session holds. Control thread only; idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.debug.info {
            log::info!("session {}: shutting down", self.session_id);
        }

        self.clear_worklet_host();
        self.script.clear();
        self.streams.analysers.clear();
        self.streams.compressors.clear();
        self.close_worklet_ports();
        self.clear_worklet_modules();

        self.graphs.pending.publish(None).release();
        self.graphs.active.publish(None).release();
        lock(&self.graphs.deferred).take();
        lock(&self.graphs.applied).take();
        self.drain_retired_graphs();

        self.streams.media_elements.clear();
        self.destroy_media_streams();
        self.notifier.close();
    }

    pub(crate) fn schedule(&self, task: Task) -> bool {
        self.control.schedule(&self.this, task)
    }

    pub(crate) fn run_task(&self, task: Task) {
        match task {
            Task::DrainRetiredGraphs => self.drain_retired_graphs(),
            Task::FlushProcessorErrors => self.flush_processor_errors(),
            Task::FlushProcessorRegistrations => self.flush_processor_registrations(),
            Task::FlushModuleEvaluations => self.flush_module_evaluations(),
            Task::ApplyDeferredGraph => self.apply_deferred_graph_if_any(),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
        // A renderer dropped after shutdown may have retired its last graph.
        self.drain_retired_graphs();
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{Fixture, build, constant};

    #[test]
    fn new_session_state() {
        let fixture = Fixture::builder().device(44100, 64).build();
        let session = &fixture.session;
        assert_eq!(session.session_id(), 1);
        assert_eq!(session.client_id(), 7);
        assert_eq!(session.device_sample_rate(), 44100);
        assert_eq!(session.device_channel_count(), crate::MAX_CHANNELS);
        assert_eq!(session.context_sample_rate(), 44100);
        assert_eq!(session.graph_generation(), 0);
        assert!(session.suspend_state().suspended);
        assert_eq!(session.suspend_state().generation, 0);
        assert!(!session.timing_notifications_enabled());
        assert!(!session.is_shut_down());
    }

    #[test]
    fn underruns_reach_the_timing_page() {
        let fixture = Fixture::builder().timing().build();
        let session = &fixture.session;
        let mut renderer = session.renderer().unwrap();
        session.note_underrun(64);
        session.note_underrun(32);
        renderer.render_one_quantum();
        let snapshot = fixture.timing_page.as_ref().unwrap().read().unwrap();
        assert_eq!(snapshot.underrun_frames, 96);
        assert_eq!(session.underrun_frames(), 96);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let fixture = Fixture::builder().timing().build();
        let session = &fixture.session;
        session.set_render_graph(build(constant(0.25)));
        assert!(session.timing_notifications_enabled());

        session.shutdown();
        assert!(session.is_shut_down());
        assert!(!session.timing_notifications_enabled());
        assert_eq!(fixture.recorder.drop_count(), 2);
        assert!(session.most_recent_graph().is_none());

        session.shutdown();
        session.set_render_graph(build(constant(0.5)));
        assert_eq!(fixture.recorder.builds(), 1);
        // The generation is not reset.
        assert_eq!(session.graph_generation(), 1);
    }

    #[test]
    fn dropping_the_session_releases_graphs() {
        let fixture = Fixture::new();
        let recorder = fixture.recorder.clone();
        fixture.session.set_render_graph(build(constant(0.25)));
        drop(fixture);
        assert_eq!(recorder.drop_count(), 2);
    }
}
