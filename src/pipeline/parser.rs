//! DOT-like digraph parser for pipeline definitions, ported from
//! `attractor.parser`.

use super::graph::{Edge, Graph, Node, Subgraph};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

const BOOL_ATTRS: &[&str] = &["goal_gate", "auto_status", "allow_partial", "loop_restart"];
const INT_ATTRS: &[&str] = &["max_retries", "weight", "default_max_retry"];

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unexpected end of input, expected '{0}'")]
    UnexpectedEof(String),
    #[error("expected '{expected}', got '{found}'")]
    UnexpectedToken { expected: String, found: String },
}

fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let bytes: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == '/' && bytes.get(i + 1) == Some(&'*') {
            i += 2;
            while i < bytes.len() && !(bytes[i] == '*' && bytes.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i += 2;
            continue;
        }
        if bytes[i] == '/' && bytes.get(i + 1) == Some(&'/') {
            while i < bytes.len() && bytes[i] != '\n' {
                i += 1;
            }
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

fn parse_value(raw: &str) -> Value {
    if raw.starts_with('"') && raw.ends_with('"') && raw.len() >= 2 {
        let inner = &raw[1..raw.len() - 1];
        let unescaped = inner
            .replace("\\\"", "\"")
            .replace("\\n", "\n")
            .replace("\\t", "\t")
            .replace("\\\\", "\\");
        return Value::String(unescaped);
    }
    if raw == "true" {
        return Value::Bool(true);
    }
    if raw == "false" {
        return Value::Bool(false);
    }
    if raw.contains('.') {
        if let Ok(f) = raw.parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Value::Number(n);
            }
        }
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Number(i.into());
    }
    Value::String(raw.to_string())
}

fn value_as_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn value_as_bool(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        other => value_as_string(other).to_lowercase() == "true",
    }
}

fn value_as_int(v: &Value) -> i64 {
    match v {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        other => value_as_string(other).parse().unwrap_or(0),
    }
}

fn coerce_attr(key: &str, val: Value) -> Value {
    if BOOL_ATTRS.contains(&key) {
        return Value::Bool(value_as_bool(&val));
    }
    if INT_ATTRS.contains(&key) {
        return Value::Number(value_as_int(&val).into());
    }
    val
}

fn tokenize(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == ' ' || c == '\t' || c == '\n' || c == '\r' {
            i += 1;
            continue;
        }
        if c == ';' {
            i += 1;
            continue;
        }
        if "{}[],=".contains(c) {
            tokens.push(c.to_string());
            i += 1;
            continue;
        }
        if c == '-' && chars.get(i + 1) == Some(&'>') {
            tokens.push("->".to_string());
            i += 2;
            continue;
        }
        if c == '"' {
            let mut j = i + 1;
            while j < chars.len() {
                if chars[j] == '\\' && j + 1 < chars.len() {
                    j += 2;
                } else if chars[j] == '"' {
                    j += 1;
                    break;
                } else {
                    j += 1;
                }
            }
            tokens.push(chars[i..j].iter().collect());
            i = j;
            continue;
        }
        let mut j = i;
        while j < chars.len()
            && !" \t\n\r{}[],=;\"".contains(chars[j])
            && !(chars[j] == '-' && chars.get(j + 1) == Some(&'>'))
        {
            j += 1;
        }
        if j > i {
            tokens.push(chars[i..j].iter().collect());
        }
        i = j.max(i + 1);
    }
    tokens
}

fn apply_attrs_to_node(node: &mut Node, attrs: HashMap<String, Value>) {
    for (key, raw) in attrs {
        let val = coerce_attr(&key, raw);
        match key.as_str() {
            "label" => node.label = value_as_string(&val),
            "shape" => node.shape = value_as_string(&val),
            "type" => node.node_type = value_as_string(&val),
            "prompt" => node.prompt = value_as_string(&val),
            "max_retries" => node.max_retries = value_as_int(&val) as u32,
            "goal_gate" => node.goal_gate = value_as_bool(&val),
            "retry_target" => node.retry_target = value_as_string(&val),
            "fallback_retry_target" => node.fallback_retry_target = value_as_string(&val),
            "fidelity" => node.fidelity = value_as_string(&val),
            "thread_id" => node.thread_id = value_as_string(&val),
            "class" => {
                node.classes = value_as_string(&val)
                    .split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect();
            }
            "timeout" => node.timeout = value_as_string(&val),
            "llm_model" => node.llm_model = value_as_string(&val),
            "llm_provider" => node.llm_provider = value_as_string(&val),
            "reasoning_effort" => node.reasoning_effort = value_as_string(&val),
            "auto_status" => node.auto_status = value_as_bool(&val),
            "allow_partial" => node.allow_partial = value_as_bool(&val),
            _ => {
                node.extra.insert(key, val);
            }
        }
    }
}

fn apply_attrs_to_edge(edge: &mut Edge, attrs: &HashMap<String, Value>) {
    for (key, raw) in attrs {
        let val = coerce_attr(key, raw.clone());
        match key.as_str() {
            "label" => edge.label = value_as_string(&val),
            "condition" => edge.condition = value_as_string(&val),
            "weight" => edge.weight = value_as_int(&val),
            "fidelity" => edge.fidelity = value_as_string(&val),
            "thread_id" => edge.thread_id = value_as_string(&val),
            "loop_restart" => edge.loop_restart = value_as_bool(&val),
            _ => {
                edge.extra.insert(key.clone(), val);
            }
        }
    }
}

fn apply_graph_attrs(graph: &mut Graph, attrs: HashMap<String, Value>) {
    for (key, val) in attrs {
        match key.as_str() {
            "goal" => graph.goal = value_as_string(&val),
            "label" => graph.label = value_as_string(&val),
            "model_stylesheet" => graph.model_stylesheet = value_as_string(&val),
            "default_max_retry" => graph.default_max_retry = value_as_int(&val) as u32,
            "retry_target" => graph.retry_target = value_as_string(&val),
            "fallback_retry_target" => graph.fallback_retry_target = value_as_string(&val),
            "default_fidelity" => graph.default_fidelity = value_as_string(&val),
            _ => {
                graph.extra.insert(key, val);
            }
        }
    }
}

struct Parser {
    tokens: Vec<String>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(|s| s.as_str())
    }

    fn advance(&mut self) -> Result<String, ParseError> {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| ParseError::UnexpectedEof("token".to_string()))?;
        self.pos += 1;
        Ok(tok)
    }

    fn expect(&mut self, value: &str) -> Result<(), ParseError> {
        let tok = self.advance()?;
        if tok != value {
            return Err(ParseError::UnexpectedToken { expected: value.to_string(), found: tok });
        }
        Ok(())
    }

    fn parse_graph(&mut self) -> Result<Graph, ParseError> {
        self.expect("digraph")?;
        let name = self.advance()?;
        self.expect("{")?;
        let mut graph = Graph::new(name);
        let mut node_defaults = HashMap::new();
        let mut edge_defaults = HashMap::new();
        self.parse_statements(&mut graph, &mut node_defaults, &mut edge_defaults, "")?;
        self.expect("}")?;
        Ok(graph)
    }

    fn parse_statements(
        &mut self,
        graph: &mut Graph,
        scope_node_defaults: &mut HashMap<String, Value>,
        scope_edge_defaults: &mut HashMap<String, Value>,
        subgraph_name: &str,
    ) -> Result<(), ParseError> {
        while let Some(tok) = self.peek() {
            if tok == "}" {
                break;
            }
            match tok {
                "graph" => {
                    self.advance()?;
                    if self.peek() == Some("[") {
                        let attrs = self.parse_attr_block()?;
                        apply_graph_attrs(graph, attrs);
                    }
                }
                "node" => {
                    self.advance()?;
                    if self.peek() == Some("[") {
                        let attrs = self.parse_attr_block()?;
                        for (k, v) in &attrs {
                            scope_node_defaults.insert(k.clone(), v.clone());
                            graph.node_defaults.insert(k.clone(), value_as_string(v));
                        }
                    }
                }
                "edge" => {
                    self.advance()?;
                    if self.peek() == Some("[") {
                        let attrs = self.parse_attr_block()?;
                        for (k, v) in &attrs {
                            scope_edge_defaults.insert(k.clone(), v.clone());
                            graph.edge_defaults.insert(k.clone(), value_as_string(v));
                        }
                    }
                }
                "subgraph" => {
                    self.advance()?;
                    let sg_name = if self.peek() != Some("{") { self.advance()? } else { String::new() };
                    self.expect("{")?;
                    let mut child_node_defaults = scope_node_defaults.clone();
                    let mut child_edge_defaults = scope_edge_defaults.clone();
                    self.parse_statements(graph, &mut child_node_defaults, &mut child_edge_defaults, &sg_name)?;
                    self.expect("}")?;

                    let mut sg = graph.subgraphs.remove(&sg_name).unwrap_or_else(|| Subgraph {
                        name: sg_name.clone(),
                        ..Default::default()
                    });
                    sg.node_defaults = child_node_defaults.iter().map(|(k, v)| (k.clone(), value_as_string(v))).collect();
                    sg.edge_defaults = child_edge_defaults.iter().map(|(k, v)| (k.clone(), value_as_string(v))).collect();
                    graph.subgraphs.insert(sg_name, sg);
                }
                _ => {
                    if self.is_graph_attr_decl() {
                        let key = self.advance()?;
                        self.expect("=")?;
                        let val = parse_value(&self.advance()?);
                        if key == "label" && !subgraph_name.is_empty() {
                            let sg = graph.subgraphs.entry(subgraph_name.to_string()).or_insert_with(|| {
                                Subgraph { name: subgraph_name.to_string(), ..Default::default() }
                            });
                            sg.label = value_as_string(&val);
                        } else {
                            let mut attrs = HashMap::new();
                            attrs.insert(key, val);
                            apply_graph_attrs(graph, attrs);
                        }
                    } else if self.is_edge_stmt() {
                        self.parse_edge_stmt(graph, scope_edge_defaults, scope_node_defaults, subgraph_name)?;
                    } else {
                        self.parse_node_stmt(graph, scope_node_defaults, subgraph_name)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn is_graph_attr_decl(&self) -> bool {
        if self.pos + 2 >= self.tokens.len() {
            return false;
        }
        self.tokens[self.pos + 1] == "=" && self.tokens[self.pos + 2] != "["
    }

    fn is_edge_stmt(&self) -> bool {
        let mut i = self.pos + 1;
        while i < self.tokens.len() && self.tokens[i] != "{" && self.tokens[i] != "}" {
            if self.tokens[i] == "->" {
                return true;
            }
            if self.tokens[i] == "[" {
                return false;
            }
            i += 1;
        }
        false
    }

    fn parse_node_stmt(
        &mut self,
        graph: &mut Graph,
        defaults: &HashMap<String, Value>,
        subgraph_name: &str,
    ) -> Result<(), ParseError> {
        let node_id = self.advance()?;
        let mut attrs = defaults.clone();
        if self.peek() == Some("[") {
            attrs.extend(self.parse_attr_block()?);
        }

        let mut node = graph.nodes.remove(&node_id).unwrap_or_else(|| Node::new(node_id.clone()));
        apply_attrs_to_node(&mut node, attrs);
        if !subgraph_name.is_empty() {
            node.subgraph = subgraph_name.to_string();
            let sg = graph
                .subgraphs
                .entry(subgraph_name.to_string())
                .or_insert_with(|| Subgraph { name: subgraph_name.to_string(), ..Default::default() });
            if !sg.node_ids.contains(&node_id) {
                sg.node_ids.push(node_id.clone());
            }
            if !sg.label.is_empty() {
                let derived = sg.derived_class();
                if !derived.is_empty() && !node.classes.contains(&derived) {
                    node.classes.push(derived);
                }
            }
        }
        graph.nodes.insert(node_id, node);
        Ok(())
    }

    fn parse_edge_stmt(
        &mut self,
        graph: &mut Graph,
        edge_defaults: &HashMap<String, Value>,
        node_defaults: &HashMap<String, Value>,
        subgraph_name: &str,
    ) -> Result<(), ParseError> {
        let mut chain = vec![self.advance()?];
        while self.peek() == Some("->") {
            self.advance()?;
            chain.push(self.advance()?);
        }

        let mut attrs = edge_defaults.clone();
        if self.peek() == Some("[") {
            attrs.extend(self.parse_attr_block()?);
        }

        for node_id in &chain {
            if !graph.nodes.contains_key(node_id) {
                let mut node = Node::new(node_id.clone());
                apply_attrs_to_node(&mut node, node_defaults.clone());
                if !subgraph_name.is_empty() {
                    node.subgraph = subgraph_name.to_string();
                }
                graph.nodes.insert(node_id.clone(), node);
            }
        }

        for pair in chain.windows(2) {
            let mut edge = Edge { source: pair[0].clone(), target: pair[1].clone(), ..Default::default() };
            apply_attrs_to_edge(&mut edge, &attrs);
            graph.edges.push(edge);
        }
        Ok(())
    }

    fn parse_attr_block(&mut self) -> Result<HashMap<String, Value>, ParseError> {
        self.expect("[")?;
        let mut attrs = HashMap::new();
        while let Some(tok) = self.peek() {
            if tok == "]" {
                break;
            }
            if tok == "," {
                self.advance()?;
                continue;
            }
            let key = self.advance()?;
            self.expect("=")?;
            let val = parse_value(&self.advance()?);
            attrs.insert(key, val);
        }
        self.expect("]")?;
        Ok(attrs)
    }
}

pub fn parse_dot(text: &str) -> Result<Graph, ParseError> {
    let cleaned = strip_comments(text);
    let tokens = tokenize(&cleaned);
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_graph()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_graph_with_start_and_exit() {
        let src = r#"
            digraph pipeline {
                goal = "ship it"
                start [shape=Mdiamond]
                finish [shape=Msquare]
                start -> finish [label="done"]
            }
        "#;
        let graph = parse_dot(src).unwrap();
        assert_eq!(graph.name, "pipeline");
        assert_eq!(graph.goal, "ship it");
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].label, "done");
    }

    #[test]
    fn chained_edges_produce_pairwise_edges() {
        let src = "digraph g { a -> b -> c }";
        let graph = parse_dot(src).unwrap();
        assert_eq!(graph.edges.len(), 2);
        assert_eq!(graph.edges[0].source, "a");
        assert_eq!(graph.edges[1].target, "c");
    }

    #[test]
    fn node_defaults_apply_and_bool_int_attrs_coerce() {
        let src = r#"
            digraph g {
                node [max_retries=3, goal_gate=true]
                a
                b [max_retries=7]
            }
        "#;
        let graph = parse_dot(src).unwrap();
        assert_eq!(graph.nodes["a"].max_retries, 3);
        assert!(graph.nodes["a"].goal_gate);
        assert_eq!(graph.nodes["b"].max_retries, 7);
    }

    #[test]
    fn subgraph_label_derives_node_class() {
        let src = r#"
            digraph g {
                subgraph cluster_review {
                    label = "Review Stage"
                    a [shape=box]
                }
            }
        "#;
        let graph = parse_dot(src).unwrap();
        assert!(graph.nodes["a"].classes.contains(&"review-stage".to_string()));
    }

    #[test]
    fn comments_are_stripped() {
        let src = "digraph g { // trailing comment\n a -> b /* block */ }";
        let graph = parse_dot(src).unwrap();
        assert_eq!(graph.edges.len(), 1);
    }

    #[test]
    fn extra_attrs_land_in_the_opaque_map() {
        let src = r#"digraph g { a [custom_field="hi"] }"#;
        let graph = parse_dot(src).unwrap();
        assert_eq!(graph.nodes["a"].extra.get("custom_field").unwrap(), "hi");
    }
}
