use crate::NodeId;

/// An audio connection from an output of `source` to an input of `destination`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Connection {
    pub source: NodeId,
    pub source_output: u32,
    pub destination: NodeId,
    pub destination_input: u32,
}

/// A connection from an output of `source` into an audio parameter of `destination`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParamConnection {
    pub source: NodeId,
    pub source_output: u32,
    pub destination: NodeId,
    pub destination_param: u32,
}
