//! Context fidelity resolution, ported from `attractor.fidelity`.

use super::graph::{Edge, Graph, Node};

const VALID_FIDELITY: &[&str] =
    &["full", "truncate", "compact", "summary:low", "summary:medium", "summary:high"];

pub fn is_valid_fidelity(mode: &str) -> bool {
    VALID_FIDELITY.contains(&mode)
}

/// Precedence: edge > node > graph default > `"compact"`.
pub fn resolve_fidelity(node: &Node, incoming_edge: Option<&Edge>, graph: &Graph) -> String {
    if let Some(edge) = incoming_edge {
        if !edge.fidelity.is_empty() && is_valid_fidelity(&edge.fidelity) {
            return edge.fidelity.clone();
        }
    }
    if !node.fidelity.is_empty() && is_valid_fidelity(&node.fidelity) {
        return node.fidelity.clone();
    }
    if !graph.default_fidelity.is_empty() && is_valid_fidelity(&graph.default_fidelity) {
        return graph.default_fidelity.clone();
    }
    "compact".to_string()
}

/// Precedence: node thread_id > edge thread_id > subgraph-derived class >
/// previous node id.
pub fn resolve_thread_id(node: &Node, incoming_edge: Option<&Edge>, graph: &Graph, prev_node_id: &str) -> String {
    if !node.thread_id.is_empty() {
        return node.thread_id.clone();
    }
    if let Some(edge) = incoming_edge {
        if !edge.thread_id.is_empty() {
            return edge.thread_id.clone();
        }
    }
    if !node.subgraph.is_empty() {
        if let Some(sg) = graph.subgraphs.get(&node.subgraph) {
            let derived = sg.derived_class();
            if !derived.is_empty() {
                return derived;
            }
        }
    }
    if !prev_node_id.is_empty() {
        prev_node_id.to_string()
    } else {
        node.id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_favors_edge_over_node_over_graph() {
        let graph = Graph { default_fidelity: "full".to_string(), ..Graph::new("g") };
        let mut node = Node::new("n");
        node.fidelity = "summary:low".to_string();
        let edge = Edge { fidelity: "truncate".to_string(), ..Default::default() };
        assert_eq!(resolve_fidelity(&node, Some(&edge), &graph), "truncate");
        assert_eq!(resolve_fidelity(&node, None, &graph), "summary:low");
        node.fidelity.clear();
        assert_eq!(resolve_fidelity(&node, None, &graph), "full");
    }

    #[test]
    fn invalid_fidelity_falls_through_to_default() {
        let graph = Graph::new("g");
        let mut node = Node::new("n");
        node.fidelity = "bogus".to_string();
        assert_eq!(resolve_fidelity(&node, None, &graph), "compact");
    }

    #[test]
    fn thread_id_falls_back_to_previous_node() {
        let graph = Graph::new("g");
        let node = Node::new("n");
        assert_eq!(resolve_thread_id(&node, None, &graph, "prev"), "prev");
        assert_eq!(resolve_thread_id(&node, None, &graph, ""), "n");
    }
}
