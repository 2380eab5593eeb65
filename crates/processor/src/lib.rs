//! Contracts between a rendering session and the external hosts that run user code or open
//! devices on its behalf.
//!
//! - [worklet]: the worklet host, its factory and the events it reports back.
//! - [script]: the script-processor host and its block layout.
//! - [input]: the audio-input client used by media-stream sources.
pub mod input;
pub mod script;
pub mod worklet;

pub use input::{AudioInputClient, AudioInputMetadata, InputStreamError};
pub use script::{ScriptProcessorBlock, ScriptProcessorHost};
pub use worklet::{
    ModuleEvaluation, ProcessorRegistration, WorkletEvents, WorkletHost, WorkletHostFactory,
    WorkletHostInit, WorkletModule, WorkletNodeDefinition, WorkletPortBinding,
};

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("host is unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
