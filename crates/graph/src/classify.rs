use crate::GraphDescription;

/// What it takes to bring an executor built for one description in line with another. Ordered
/// from cheapest to most expensive.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UpdateKind {
    /// Nothing observable changed.
    #[default]
    None,
    /// Only parameter values or automations changed.
    Parameter,
    /// Edges or channel mixing rules changed; the node set can be patched in place.
    Topology,
    /// A new executor has to be built and swapped in.
    RebuildRequired,
}

/// Classify the update from `old` to `new`.
pub fn classify(old: &GraphDescription, new: &GraphDescription) -> UpdateKind {
    if old.destination_node_id != new.destination_node_id || old.nodes.len() != new.nodes.len() {
        return UpdateKind::RebuildRequired;
    }

    let mut kind = UpdateKind::None;
    for (id, node) in &old.nodes {
        let Some(other) = new.nodes.get(id) else {
            return UpdateKind::RebuildRequired;
        };
        kind = kind.max(node.classify_update(other));
        if kind == UpdateKind::RebuildRequired {
            return kind;
        }
    }

    if old.connections != new.connections || old.param_connections != new.param_connections {
        kind = kind.max(UpdateKind::Topology);
    }
    if old.param_automations != new.param_automations {
        kind = kind.max(UpdateKind::Parameter);
    }
    kind
}
