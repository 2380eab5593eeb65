use std::{fmt, sync::Arc};

use processor::ScriptProcessorHost;
use stream::ring::MediaSourceProvider;
use util::collections::Map;

/// External inputs a graph is built against, keyed by provider id.
#[derive(Clone, Default)]
pub struct GraphResources {
    pub media_element_sources: Map<u64, Arc<MediaSourceProvider>>,
    pub media_stream_sources: Map<u64, Arc<MediaSourceProvider>>,
    pub script_processor_host: Option<Arc<dyn ScriptProcessorHost>>,
}

/// A description together with the resources it was resolved against.
#[derive(Clone, Debug, Default)]
pub struct BuildResult {
    pub description: crate::GraphDescription,
    pub resources: GraphResources,
}

impl GraphResources {
    pub fn media_element_source(&self, provider_id: u64) -> Option<&Arc<MediaSourceProvider>> {
        self.media_element_sources.get(&provider_id)
    }

    pub fn media_stream_source(&self, provider_id: u64) -> Option<&Arc<MediaSourceProvider>> {
        self.media_stream_sources.get(&provider_id)
    }
}

impl BuildResult {
    pub fn new(description: crate::GraphDescription) -> Self {
        Self {
            description,
            resources: GraphResources::default(),
        }
    }
}

impl fmt::Debug for GraphResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut element = self.media_element_sources.keys().collect::<Vec<_>>();
        element.sort_unstable();
        let mut media_stream = self.media_stream_sources.keys().collect::<Vec<_>>();
        media_stream.sort_unstable();
        f.debug_struct("GraphResources")
            .field("media_element_sources", &element)
            .field("media_stream_sources", &media_stream)
            .field("script_processor_host", &self.script_processor_host.is_some())
            .finish()
    }
}
