use crate::NodeId;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("destination node {0:?} is not part of the graph")]
    MissingDestination(NodeId),
    #[error("{what} references unknown node {node:?}")]
    UnknownNode { what: &'static str, node: NodeId },
    #[error("executor could not be built: {0}")]
    Build(String),
}
