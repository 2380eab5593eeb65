use std::{os::fd::OwnedFd, sync::Arc};

use crate::HostError;

/// Source of a worklet module.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkletModule {
    pub module_id: u64,
    pub url: String,
    pub source_text: String,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum AutomationRate {
    #[default]
    AudioRate,
    ControlRate,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AudioParamDescriptor {
    pub name: String,
    pub default_value: f32,
    pub min_value: f32,
    pub max_value: f32,
    pub automation_rate: AutomationRate,
}

/// Construction parameters of one worklet node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkletNodeDefinition {
    pub node_id: u64,
    pub processor_name: String,
    pub number_of_inputs: u32,
    pub number_of_outputs: u32,
    pub output_channel_count: Vec<u32>,
    pub parameter_values: Vec<(String, f32)>,
    pub serialized_options: Vec<u8>,
}

/// The processor end of a worklet node's message port.
#[derive(Debug)]
pub struct WorkletPortBinding {
    pub node_id: u64,
    pub processor_port: OwnedFd,
}

/// A processor class registered by a module.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessorRegistration {
    pub name: String,
    pub descriptors: Vec<AudioParamDescriptor>,
    pub generation: u64,
}

/// The outcome of evaluating a module.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleEvaluation {
    pub module_id: u64,
    pub required_generation: u64,
    pub success: bool,
    pub error_name: String,
    pub error_message: String,
    pub failed_processor_registrations: Vec<String>,
}

/// Events a worklet host reports. Called from the host's own threads, including the render
/// thread; implementations must not block.
pub trait WorkletEvents: Send + Sync {
    fn processor_error(&self, node_id: u64);
    fn processor_registered(&self, registration: ProcessorRegistration);
    fn module_evaluated(&self, evaluation: ModuleEvaluation);
}

/// Runs user-authored processors.
pub trait WorkletHost: Send + Sync {
    /// Render thread: let the host run any work due at `rendered_frames`. Must not block.
    fn service_render_thread_state(&self, rendered_frames: u64, sample_rate: f32);

    fn enqueue_module(&self, module: WorkletModule);

    fn enqueue_port_bindings(&self, bindings: Vec<WorkletPortBinding>);

    fn synchronize_node_definitions(&self, definitions: &[WorkletNodeDefinition]);
}

/// Everything a new host starts with.
pub struct WorkletHostInit {
    pub sample_rate: f32,
    pub rendered_frames: u64,
    pub modules: Vec<WorkletModule>,
    pub node_definitions: Vec<WorkletNodeDefinition>,
    pub port_bindings: Vec<WorkletPortBinding>,
    pub events: Arc<dyn WorkletEvents>,
}

pub trait WorkletHostFactory: Send + Sync {
    fn create(&self, init: WorkletHostInit) -> Result<Arc<dyn WorkletHost>, HostError>;
}
