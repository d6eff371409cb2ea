//! Graph data structures for pipeline definitions, ported from
//! `attractor.graph`.

use serde_json::Value;
use std::collections::HashMap;

/// Shape -> default handler type, consulted when a node has no explicit
/// `type` attribute.
pub fn shape_handler(shape: &str) -> &'static str {
    match shape {
        "Mdiamond" => "start",
        "Msquare" => "exit",
        "box" => "codergen",
        "hexagon" => "wait.human",
        "diamond" => "conditional",
        "component" => "parallel",
        "tripleoctagon" => "parallel.fan_in",
        "parallelogram" => "tool",
        "house" => "stack.manager_loop",
        _ => "codergen",
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub label: String,
    pub shape: String,
    /// Explicit handler-type override; empty means "resolve from shape".
    pub node_type: String,
    pub prompt: String,
    pub max_retries: u32,
    pub goal_gate: bool,
    pub retry_target: String,
    pub fallback_retry_target: String,
    pub fidelity: String,
    pub thread_id: String,
    pub classes: Vec<String>,
    pub timeout: String,
    pub llm_model: String,
    pub llm_provider: String,
    pub reasoning_effort: String,
    pub auto_status: bool,
    pub allow_partial: bool,
    pub subgraph: String,
    pub extra: HashMap<String, Value>,
}

impl Default for Node {
    fn default() -> Self {
        Node {
            id: String::new(),
            label: String::new(),
            shape: "box".to_string(),
            node_type: String::new(),
            prompt: String::new(),
            max_retries: 0,
            goal_gate: false,
            retry_target: String::new(),
            fallback_retry_target: String::new(),
            fidelity: String::new(),
            thread_id: String::new(),
            classes: Vec::new(),
            timeout: String::new(),
            llm_model: String::new(),
            llm_provider: String::new(),
            reasoning_effort: "high".to_string(),
            auto_status: false,
            allow_partial: false,
            subgraph: String::new(),
            extra: HashMap::new(),
        }
    }
}

impl Node {
    pub fn new(id: impl Into<String>) -> Self {
        Node { id: id.into(), ..Default::default() }
    }

    pub fn handler_type(&self) -> &str {
        if !self.node_type.is_empty() {
            &self.node_type
        } else {
            shape_handler(&self.shape)
        }
    }

    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            &self.id
        } else {
            &self.label
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub label: String,
    pub condition: String,
    pub weight: i64,
    pub fidelity: String,
    pub thread_id: String,
    pub loop_restart: bool,
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct Subgraph {
    pub name: String,
    pub label: String,
    pub node_defaults: HashMap<String, String>,
    pub edge_defaults: HashMap<String, String>,
    pub node_ids: Vec<String>,
}

impl Subgraph {
    /// Lowercase, spaces -> `-`, strip anything outside `[a-z0-9-]`.
    pub fn derived_class(&self) -> String {
        if self.label.is_empty() {
            return String::new();
        }
        self.label
            .to_lowercase()
            .replace(' ', "-")
            .chars()
            .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub name: String,
    pub goal: String,
    pub label: String,
    pub model_stylesheet: String,
    pub default_max_retry: u32,
    pub retry_target: String,
    pub fallback_retry_target: String,
    pub default_fidelity: String,
    pub nodes: HashMap<String, Node>,
    pub edges: Vec<Edge>,
    pub subgraphs: HashMap<String, Subgraph>,
    pub node_defaults: HashMap<String, String>,
    pub edge_defaults: HashMap<String, String>,
    pub extra: HashMap<String, Value>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Graph { name: name.into(), default_max_retry: 50, ..Default::default() }
    }

    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn start_node(&self) -> Option<&Node> {
        self.nodes.values().find(|n| n.handler_type() == "start")
    }

    pub fn exit_node(&self) -> Option<&Node> {
        self.nodes.values().find(|n| n.handler_type() == "exit")
    }

    pub fn outgoing_edges(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.source == node_id).collect()
    }

    pub fn incoming_edges(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.target == node_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_type_prefers_explicit_type_over_shape() {
        let mut n = Node::new("a");
        n.shape = "box".to_string();
        assert_eq!(n.handler_type(), "codergen");
        n.node_type = "tool".to_string();
        assert_eq!(n.handler_type(), "tool");
    }

    #[test]
    fn derived_class_strips_non_slug_chars() {
        let sg = Subgraph { label: "Review Stage!".to_string(), ..Default::default() };
        assert_eq!(sg.derived_class(), "review-stage");
    }

    #[test]
    fn start_and_exit_node_lookup_by_shape() {
        let mut g = Graph::new("g");
        let mut start = Node::new("s");
        start.shape = "Mdiamond".to_string();
        let mut exit = Node::new("e");
        exit.shape = "Msquare".to_string();
        g.nodes.insert(start.id.clone(), start);
        g.nodes.insert(exit.id.clone(), exit);
        assert_eq!(g.start_node().unwrap().id, "s");
        assert_eq!(g.exit_node().unwrap().id, "e");
    }
}
