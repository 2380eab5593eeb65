use std::cell::UnsafeCell;

use util::{IsSendSync, Published, Retire};

use crate::{BuildResult, Control, Executor, GraphNode, Render};

/// What the render thread has to service for a graph, computed once on adoption.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub has_script_processor: bool,
    pub has_media_element_source: bool,
    pub has_worklet: bool,
}

/// A built graph ready to be published to the render thread.
///
/// Immutable once constructed, apart from the render half of the executor, which only the
/// render thread touches. Prepared graphs are reclaimed through a retirement list so that the
/// render thread never runs their destructors.
pub struct PreparedGraph {
    build: BuildResult,
    generation: u64,
    control: Option<Box<dyn Control>>,
    render: Option<IsSendSync<UnsafeCell<Box<dyn Render>>>>,
}

impl Published for PreparedGraph {}
impl Retire for PreparedGraph {}

impl PreparedGraph {
    pub fn new(build: BuildResult, executor: Executor, generation: u64) -> Self {
        Self {
            build,
            generation,
            control: Some(executor.control),
            render: Some(IsSendSync::new(UnsafeCell::new(executor.render))),
        }
    }

    /// A graph that renders silence.
    pub fn empty(build: BuildResult, generation: u64) -> Self {
        Self {
            build,
            generation,
            control: None,
            render: None,
        }
    }

    pub fn build(&self) -> &BuildResult {
        &self.build
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn control(&self) -> Option<&dyn Control> {
        self.control.as_deref()
    }

    pub fn has_executor(&self) -> bool {
        self.render.is_some()
    }

    /// # Safety
    /// Only the session's single renderer may call this, and it must not hold two of the
    /// returned borrows at once.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn render_mut(&self) -> Option<&mut dyn Render> {
        let cell = self.render.as_ref()?;
        // SAFETY: the caller is the only thread that ever dereferences the render half.
        Some(unsafe { &mut **cell.get() })
    }

    pub fn capabilities(&self) -> Capabilities {
        let mut capabilities = Capabilities::default();
        for node in self.build.description.nodes.values() {
            match node {
                GraphNode::ScriptProcessor { .. } => capabilities.has_script_processor = true,
                GraphNode::MediaElementAudioSource { .. } => {
                    capabilities.has_media_element_source = true
                }
                GraphNode::AudioWorklet { .. } => capabilities.has_worklet = true,
                _ => (),
            }
        }
        capabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NodeId, description::tests::gain_chain, node::ChannelConfig};

    #[test]
    fn capabilities() {
        let mut description = gain_chain();
        let plain = PreparedGraph::empty(BuildResult::new(description.clone()), 1);
        assert_eq!(plain.capabilities(), Capabilities::default());
        assert!(!plain.has_executor());

        description.nodes.insert(
            NodeId(10),
            GraphNode::ScriptProcessor {
                buffer_size: 256,
                input_channel_count: 2,
                output_channel_count: 2,
            },
        );
        description.nodes.insert(
            NodeId(11),
            GraphNode::AudioWorklet {
                channels: ChannelConfig::new(2),
                processor_name: "noise".into(),
                number_of_inputs: 0,
                number_of_outputs: 1,
                output_channel_count: vec![2],
            },
        );
        let graph = PreparedGraph::empty(BuildResult::new(description), 2);
        assert_eq!(
            graph.capabilities(),
            Capabilities {
                has_script_processor: true,
                has_media_element_source: false,
                has_worklet: true,
            }
        );
        assert_eq!(graph.generation(), 2);
    }
}
