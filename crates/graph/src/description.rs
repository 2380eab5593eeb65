use std::collections::BTreeMap;

use crate::{Connection, Error, GraphNode, NodeId, ParamConnection};

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum AutomationEvent {
    SetValue { time: f64, value: f32 },
    LinearRamp { end_time: f64, value: f32 },
    ExponentialRamp { end_time: f64, value: f32 },
    SetTarget { start_time: f64, target: f32, time_constant: f64 },
    CancelScheduledValues { cancel_time: f64 },
}

/// The scheduled automation of one audio parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamAutomation {
    pub node: NodeId,
    pub param: u32,
    pub events: Vec<AutomationEvent>,
}

/// A complete audio graph, as produced by the control side.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphDescription {
    /// The rate the graph renders at. Zero means the device rate.
    pub context_sample_rate_hz: u32,
    pub destination_node_id: NodeId,
    pub nodes: BTreeMap<NodeId, GraphNode>,
    pub connections: Vec<Connection>,
    pub param_connections: Vec<ParamConnection>,
    pub param_automations: Vec<ParamAutomation>,
}

impl GraphDescription {
    pub fn destination(&self) -> Option<&GraphNode> {
        self.nodes.get(&self.destination_node_id)
    }

    pub fn destination_mut(&mut self) -> Option<&mut GraphNode> {
        self.nodes.get_mut(&self.destination_node_id)
    }

    /// Put edges and automations in a canonical order, so that descriptions that differ only in
    /// ordering compare equal.
    pub fn normalize(&mut self) {
        self.connections.sort_unstable();
        self.connections.dedup();
        self.param_connections.sort_unstable();
        self.param_connections.dedup();
        self.param_automations
            .sort_by_key(|automation| (automation.node, automation.param));
    }

    /// Check that the destination exists and every edge and automation refers to known nodes.
    pub fn validate(&self) -> Result<(), Error> {
        match self.destination() {
            Some(GraphNode::Destination { .. }) => (),
            _ => return Err(Error::MissingDestination(self.destination_node_id)),
        }
        let check = |what, node| {
            if self.nodes.contains_key(&node) {
                Ok(())
            } else {
                Err(Error::UnknownNode { what, node })
            }
        };
        for connection in &self.connections {
            check("connection source", connection.source)?;
            check("connection destination", connection.destination)?;
        }
        for connection in &self.param_connections {
            check("param connection source", connection.source)?;
            check("param connection destination", connection.destination)?;
        }
        for automation in &self.param_automations {
            check("automation", automation.node)?;
        }
        Ok(())
    }

    pub fn contains(&self, mut predicate: impl FnMut(&GraphNode) -> bool) -> bool {
        self.nodes.values().any(|node| predicate(node))
    }
}
