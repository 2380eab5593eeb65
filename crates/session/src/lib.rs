//! An audio rendering session.
//!
//! A [Session] is created on the control thread and owns everything a single audio context
//! needs: the published graphs, the telemetry and media stream bindings, the worklet host and the
//! timing page. The audio driver renders through the session's unique [Renderer]; control-plane
//! requests call the session's methods on the control thread, and work the render thread hands
//! back is run by the [ControlLoop].
pub mod config;
pub mod control;
pub mod error;
pub mod notify;
pub mod resample;
pub mod script;
pub mod streams;

mod apply;
mod bind;
mod render;
mod session;
mod worklet;

#[cfg(test)]
mod testing;

pub use config::{Collaborators, DebugFlags, SessionOptions};
pub use control::{ControlHandle, ControlLoop, Task};
pub use error::BindingError;
pub use render::{OutputLevels, Renderer};
pub use session::Session;
pub use streams::{MediaElementStream, MediaStreamSource, ScriptProcessorStreams};

pub use graph::RENDER_QUANTUM_SIZE;

/// Most channels a session renders.
pub const MAX_CHANNELS: u32 = 32;
