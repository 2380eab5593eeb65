//! The contract of the graph executor.
//!
//! An executor is split in two halves so that each thread only ever sees the half it drives. The
//! [Render] half is owned by the render thread and called once per quantum. The [Control] half
//! is shared with the control thread, which feeds it incremental updates that the render half
//! picks up on its own schedule.
use std::sync::Arc;

use buffer::AudioBus;
use processor::{ScriptProcessorHost, WorkletHost};

use crate::{BuildResult, Error, GraphDescription, NodeId, UpdateKind};

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ProcessContext {
    pub sample_rate: f32,
    pub quantum_size: usize,
    /// Frames rendered by the session before this quantum.
    pub rendered_frames: u64,
}

/// External services an executor calls into while rendering.
#[derive(Clone, Default)]
pub struct Hosts {
    pub script_processor: Option<Arc<dyn ScriptProcessorHost>>,
    pub worklet: Option<Arc<dyn WorkletHost>>,
}

/// Render thread half. None of these may block or allocate.
pub trait Render: Send {
    /// Render one quantum into `output`, which is already shaped to the destination's channels
    /// and `context.quantum_size` frames.
    fn process(&mut self, context: &ProcessContext, output: &mut AudioBus);

    /// Called once after the graph is adopted and before the first call to `process`.
    fn bind_hosts(&mut self, hosts: Hosts);

    fn analyser_count(&self) -> usize;

    fn analyser_node_id(&self, index: usize) -> NodeId;

    fn copy_analyser_time_domain_data(&self, index: usize, output: &mut [f32]) -> bool;

    fn copy_analyser_frequency_data_db(&self, index: usize, output: &mut [f32]) -> bool;

    /// The current gain reduction of a compressor, in decibels.
    fn try_copy_dynamics_compressor_reduction(&self, node: NodeId) -> Option<f32>;
}

/// Control thread half.
pub trait Control: Send + Sync {
    fn classify_update(&self, description: &GraphDescription) -> UpdateKind;

    /// Queue new parameter values for the render half. Returns `false` if the update could not
    /// be queued, in which case the caller rebuilds.
    fn enqueue_parameter_update(&self, description: &GraphDescription) -> bool;

    fn enqueue_topology_update(&self, description: &GraphDescription) -> bool;

    /// Free whatever the render half has finished with since the last call.
    fn collect_retired_updates(&self);
}

pub struct Executor {
    pub render: Box<dyn Render>,
    pub control: Box<dyn Control>,
}

pub trait ExecutorFactory: Send + Sync {
    fn build(
        &self,
        build: &BuildResult,
        sample_rate: f32,
        quantum_size: usize,
    ) -> Result<Executor, Error>;
}
