//! Graph validation and linting, ported from `attractor.validator`.

use super::graph::Graph;
use std::collections::HashSet;
use std::fmt;

const VALID_FIDELITY: &[&str] = &["full", "truncate", "compact", "summary:low", "summary:medium", "summary:high"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: &'static str,
    pub severity: Severity,
    pub message: String,
    pub node_id: String,
    pub edge: Option<(String, String)>,
    pub fix: String,
}

impl Diagnostic {
    fn new(rule: &'static str, severity: Severity, message: impl Into<String>) -> Self {
        Diagnostic { rule, severity, message: message.into(), node_id: String::new(), edge: None, fix: String::new() }
    }

    fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = fix.into();
        self
    }

    fn with_edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.edge = Some((source.into(), target.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub diagnostics: Vec<Diagnostic>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msgs: Vec<String> = self.diagnostics.iter().map(|d| format!("[{}] {}", d.rule, d.message)).collect();
        write!(f, "{}", msgs.join("; "))
    }
}

impl std::error::Error for ValidationError {}

fn check_start_node(g: &Graph) -> Vec<Diagnostic> {
    let starts: Vec<&str> = g.nodes.values().filter(|n| n.handler_type() == "start").map(|n| n.id.as_str()).collect();
    if starts.is_empty() {
        return vec![Diagnostic::new(
            "start_node",
            Severity::Error,
            "Pipeline must have exactly one start node (shape=Mdiamond). Found none.",
        )
        .with_fix("Add a node with shape=Mdiamond")];
    }
    if starts.len() > 1 {
        return vec![Diagnostic::new(
            "start_node",
            Severity::Error,
            format!("Pipeline must have exactly one start node. Found {}: {}.", starts.len(), starts.join(", ")),
        )
        .with_fix("Remove extra start nodes")];
    }
    Vec::new()
}

fn check_terminal_node(g: &Graph) -> Vec<Diagnostic> {
    let exits = g.nodes.values().filter(|n| n.handler_type() == "exit").count();
    if exits == 0 {
        return vec![Diagnostic::new(
            "terminal_node",
            Severity::Error,
            "Pipeline must have at least one terminal node (shape=Msquare). Found none.",
        )
        .with_fix("Add a node with shape=Msquare")];
    }
    Vec::new()
}

fn check_reachability(g: &Graph) -> Vec<Diagnostic> {
    let start = match g.start_node() {
        Some(s) => s,
        None => return Vec::new(),
    };
    let mut visited: HashSet<String> = HashSet::new();
    let mut stack = vec![start.id.clone()];
    while let Some(nid) = stack.pop() {
        if visited.contains(&nid) {
            continue;
        }
        visited.insert(nid.clone());
        for e in g.outgoing_edges(&nid) {
            if g.nodes.contains_key(&e.target) {
                stack.push(e.target.clone());
            }
        }
    }
    let mut unreachable: Vec<&str> = g.nodes.keys().filter(|id| !visited.contains(*id)).map(|s| s.as_str()).collect();
    unreachable.sort_unstable();
    if !unreachable.is_empty() {
        return vec![Diagnostic::new("reachability", Severity::Error, format!("Unreachable nodes: {}", unreachable.join(", ")))
            .with_fix("Add edges from reachable nodes or remove unreachable ones")];
    }
    Vec::new()
}

fn check_edge_target_exists(g: &Graph) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    for e in &g.edges {
        if !g.nodes.contains_key(&e.source) {
            diags.push(
                Diagnostic::new("edge_target_exists", Severity::Error, format!("Edge source '{}' does not exist", e.source))
                    .with_edge(e.source.clone(), e.target.clone()),
            );
        }
        if !g.nodes.contains_key(&e.target) {
            diags.push(
                Diagnostic::new("edge_target_exists", Severity::Error, format!("Edge target '{}' does not exist", e.target))
                    .with_edge(e.source.clone(), e.target.clone()),
            );
        }
    }
    diags
}

fn check_start_no_incoming(g: &Graph) -> Vec<Diagnostic> {
    let start = match g.start_node() {
        Some(s) => s,
        None => return Vec::new(),
    };
    let incoming = g.incoming_edges(&start.id);
    if !incoming.is_empty() {
        return vec![Diagnostic::new(
            "start_no_incoming",
            Severity::Error,
            format!("Start node '{}' must have no incoming edges, found {}", start.id, incoming.len()),
        )
        .with_node(start.id.clone())];
    }
    Vec::new()
}

fn check_exit_no_outgoing(g: &Graph) -> Vec<Diagnostic> {
    let exit_node = match g.exit_node() {
        Some(e) => e,
        None => return Vec::new(),
    };
    let outgoing = g.outgoing_edges(&exit_node.id);
    if !outgoing.is_empty() {
        return vec![Diagnostic::new(
            "exit_no_outgoing",
            Severity::Error,
            format!("Exit node '{}' must have no outgoing edges, found {}", exit_node.id, outgoing.len()),
        )
        .with_node(exit_node.id.clone())];
    }
    Vec::new()
}

fn check_fidelity_valid(g: &Graph) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    for n in g.nodes.values() {
        if !n.fidelity.is_empty() && !VALID_FIDELITY.contains(&n.fidelity.as_str()) {
            let mut valid = VALID_FIDELITY.to_vec();
            valid.sort_unstable();
            diags.push(
                Diagnostic::new("fidelity_valid", Severity::Warning, format!("Node '{}' has invalid fidelity '{}'", n.id, n.fidelity))
                    .with_node(n.id.clone())
                    .with_fix(format!("Use one of: {}", valid.join(", "))),
            );
        }
    }
    diags
}

fn check_retry_target_exists(g: &Graph) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    for n in g.nodes.values() {
        if !n.retry_target.is_empty() && !g.nodes.contains_key(&n.retry_target) {
            diags.push(
                Diagnostic::new(
                    "retry_target_exists",
                    Severity::Warning,
                    format!("Node '{}' retry_target '{}' does not exist", n.id, n.retry_target),
                )
                .with_node(n.id.clone()),
            );
        }
        if !n.fallback_retry_target.is_empty() && !g.nodes.contains_key(&n.fallback_retry_target) {
            diags.push(
                Diagnostic::new(
                    "retry_target_exists",
                    Severity::Warning,
                    format!("Node '{}' fallback_retry_target '{}' does not exist", n.id, n.fallback_retry_target),
                )
                .with_node(n.id.clone()),
            );
        }
    }
    diags
}

fn check_goal_gate_has_retry(g: &Graph) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    for n in g.nodes.values() {
        if n.goal_gate && n.retry_target.is_empty() && n.fallback_retry_target.is_empty() {
            diags.push(
                Diagnostic::new(
                    "goal_gate_has_retry",
                    Severity::Warning,
                    format!("Node '{}' has goal_gate=true but no retry_target or fallback_retry_target", n.id),
                )
                .with_node(n.id.clone())
                .with_fix("Add retry_target attribute"),
            );
        }
    }
    diags
}

fn check_prompt_on_llm_nodes(g: &Graph) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    for n in g.nodes.values() {
        if n.handler_type() == "codergen" && n.prompt.is_empty() && n.label.is_empty() {
            diags.push(
                Diagnostic::new(
                    "prompt_on_llm_nodes",
                    Severity::Warning,
                    format!("Node '{}' resolves to codergen handler but has no prompt or label", n.id),
                )
                .with_node(n.id.clone())
                .with_fix("Add a prompt or label attribute"),
            );
        }
    }
    diags
}

type RuleFn = fn(&Graph) -> Vec<Diagnostic>;

const BUILT_IN_RULES: &[RuleFn] = &[
    check_start_node,
    check_terminal_node,
    check_reachability,
    check_edge_target_exists,
    check_start_no_incoming,
    check_exit_no_outgoing,
    check_fidelity_valid,
    check_retry_target_exists,
    check_goal_gate_has_retry,
    check_prompt_on_llm_nodes,
];

/// Additional caller-supplied lint rule.
pub trait LintRule {
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic>;
}

pub fn validate(graph: &Graph, extra_rules: &[Box<dyn LintRule>]) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    for rule_fn in BUILT_IN_RULES {
        diags.extend(rule_fn(graph));
    }
    for rule in extra_rules {
        diags.extend(rule.apply(graph));
    }
    diags
}

pub fn validate_or_raise(graph: &Graph, extra_rules: &[Box<dyn LintRule>]) -> Result<Vec<Diagnostic>, ValidationError> {
    let diags = validate(graph, extra_rules);
    let errors: Vec<Diagnostic> = diags.iter().filter(|d| d.severity == Severity::Error).cloned().collect();
    if !errors.is_empty() {
        return Err(ValidationError { diagnostics: errors });
    }
    Ok(diags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::graph::Node;

    fn minimal_valid_graph() -> Graph {
        let mut g = Graph::new("g");
        let mut start = Node::new("start");
        start.shape = "Mdiamond".to_string();
        let mut exit = Node::new("exit");
        exit.shape = "Msquare".to_string();
        g.nodes.insert(start.id.clone(), start);
        g.nodes.insert(exit.id.clone(), exit);
        g.edges.push(crate::pipeline::graph::Edge { source: "start".to_string(), target: "exit".to_string(), ..Default::default() });
        g
    }

    #[test]
    fn minimal_graph_has_no_errors() {
        let g = minimal_valid_graph();
        let diags = validate(&g, &[]);
        assert!(diags.iter().all(|d| d.severity != Severity::Error));
    }

    #[test]
    fn missing_start_node_is_an_error() {
        let mut g = minimal_valid_graph();
        g.nodes.remove("start");
        g.edges.clear();
        let diags = validate(&g, &[]);
        assert!(diags.iter().any(|d| d.rule == "start_node" && d.severity == Severity::Error));
    }

    #[test]
    fn unreachable_node_is_flagged() {
        let mut g = minimal_valid_graph();
        g.nodes.insert("orphan".to_string(), Node::new("orphan"));
        let diags = validate(&g, &[]);
        assert!(diags.iter().any(|d| d.rule == "reachability"));
    }

    #[test]
    fn goal_gate_without_retry_target_warns() {
        let mut g = minimal_valid_graph();
        let mut gated = Node::new("gated");
        gated.goal_gate = true;
        g.nodes.insert(gated.id.clone(), gated);
        g.edges.push(crate::pipeline::graph::Edge { source: "start".to_string(), target: "gated".to_string(), ..Default::default() });
        g.edges.push(crate::pipeline::graph::Edge { source: "gated".to_string(), target: "exit".to_string(), ..Default::default() });
        let diags = validate(&g, &[]);
        assert!(diags.iter().any(|d| d.rule == "goal_gate_has_retry"));
    }

    #[test]
    fn validate_or_raise_errors_on_error_severity() {
        let mut g = minimal_valid_graph();
        g.nodes.remove("exit");
        assert!(validate_or_raise(&g, &[]).is_err());
    }
}
