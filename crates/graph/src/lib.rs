//! Graph descriptions and the contract of the executor that renders them.
//!
//! A [GraphDescription] is plain data produced on the control thread. An [ExecutorFactory] turns
//! a [BuildResult] into an [Executor], which is wrapped in a [PreparedGraph] and published to the
//! render thread. Later descriptions are compared against the published one with [classify] to
//! decide whether the executor can be patched in place or must be rebuilt.
pub mod classify;
pub mod description;
pub mod edge;
pub mod error;
pub mod executor;
pub mod node;
pub mod prepared;
pub mod resources;

pub use classify::{UpdateKind, classify};
pub use description::GraphDescription;
pub use edge::{Connection, ParamConnection};
pub use error::Error;
pub use executor::{Control, Executor, ExecutorFactory, Hosts, ProcessContext, Render};
pub use node::{GraphNode, NodeId};
pub use prepared::{Capabilities, PreparedGraph};
pub use resources::{BuildResult, GraphResources};

/// Frames rendered per quantum.
pub const RENDER_QUANTUM_SIZE: usize = 128;
