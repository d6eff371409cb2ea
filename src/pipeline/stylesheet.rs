//! CSS-like model stylesheet parser and resolver, ported from
//! `attractor.stylesheet`.

use super::graph::{Graph, Node};
use regex::Regex;
use std::collections::HashMap;

const PROPERTIES: &[&str] = &["llm_model", "llm_provider", "reasoning_effort"];

#[derive(Debug, Clone)]
pub struct StyleRule {
    pub selector: String,
    /// `*` = 0, `.class` = 1, `#id` = 2.
    pub specificity: u8,
    pub properties: HashMap<String, String>,
    pub order: usize,
}

pub fn parse_stylesheet(text: &str) -> Vec<StyleRule> {
    let pattern = Regex::new(r"(?s)([*#.]\S*)\s*\{([^}]*)\}").unwrap();
    let mut rules = Vec::new();
    for (i, cap) in pattern.captures_iter(text).enumerate() {
        let selector = cap[1].trim().to_string();
        let decl_text = cap[2].trim();

        let specificity = if selector == "*" {
            0
        } else if selector.starts_with('.') {
            1
        } else if selector.starts_with('#') {
            2
        } else {
            continue;
        };

        let mut props = HashMap::new();
        for decl in decl_text.split(';') {
            let decl = decl.trim();
            if decl.is_empty() {
                continue;
            }
            let Some(idx) = decl.find(':') else { continue };
            let key = decl[..idx].trim();
            let val = decl[idx + 1..].trim();
            if PROPERTIES.contains(&key) {
                props.insert(key.to_string(), val.to_string());
            }
        }

        if !props.is_empty() {
            rules.push(StyleRule { selector, specificity, properties: props, order: i });
        }
    }
    rules
}

fn matches(rule: &StyleRule, node: &Node) -> bool {
    if rule.selector == "*" {
        return true;
    }
    if let Some(id) = rule.selector.strip_prefix('#') {
        return id == node.id;
    }
    if let Some(class) = rule.selector.strip_prefix('.') {
        return node.classes.iter().any(|c| c == class);
    }
    false
}

/// Applies `graph.model_stylesheet` rules to every node. Only fills
/// properties a node doesn't already have an explicit value for; equal
/// specificity resolves to the later-declared rule.
pub fn apply_stylesheet(graph: &mut Graph) {
    if graph.model_stylesheet.is_empty() {
        return;
    }
    let rules = parse_stylesheet(&graph.model_stylesheet);

    let node_ids: Vec<String> = graph.nodes.keys().cloned().collect();
    for id in node_ids {
        let mut resolved: HashMap<String, (u8, usize, String)> = HashMap::new();
        {
            let node = &graph.nodes[&id];
            for rule in &rules {
                if matches(rule, node) {
                    for (prop, val) in &rule.properties {
                        let candidate = (rule.specificity, rule.order);
                        let better = match resolved.get(prop) {
                            None => true,
                            Some((s, o, _)) => candidate >= (*s, *o),
                        };
                        if better {
                            resolved.insert(prop.clone(), (rule.specificity, rule.order, val.clone()));
                        }
                    }
                }
            }
        }

        let node = graph.nodes.get_mut(&id).unwrap();
        for (prop, (_, _, val)) in resolved {
            match prop.as_str() {
                "llm_model" if node.llm_model.is_empty() => node.llm_model = val,
                "llm_provider" if node.llm_provider.is_empty() => node.llm_provider = val,
                "reasoning_effort" if node.reasoning_effort == "high" => node.reasoning_effort = val,
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::graph::Node;

    #[test]
    fn id_selector_beats_class_selector() {
        let mut g = Graph::new("g");
        g.model_stylesheet = ".review { llm_model: gpt-a; } #n1 { llm_model: gpt-b; }".to_string();
        let mut n = Node::new("n1");
        n.classes.push("review".to_string());
        g.nodes.insert(n.id.clone(), n);
        apply_stylesheet(&mut g);
        assert_eq!(g.nodes["n1"].llm_model, "gpt-b");
    }

    #[test]
    fn explicit_node_value_is_not_overridden() {
        let mut g = Graph::new("g");
        g.model_stylesheet = "* { llm_model: gpt-a; }".to_string();
        let mut n = Node::new("n1");
        n.llm_model = "explicit".to_string();
        g.nodes.insert(n.id.clone(), n);
        apply_stylesheet(&mut g);
        assert_eq!(g.nodes["n1"].llm_model, "explicit");
    }

    #[test]
    fn reasoning_effort_only_overwritten_while_default() {
        let mut g = Graph::new("g");
        g.model_stylesheet = "* { reasoning_effort: low; }".to_string();
        let n = Node::new("n1");
        g.nodes.insert(n.id.clone(), n);
        apply_stylesheet(&mut g);
        assert_eq!(g.nodes["n1"].reasoning_effort, "low");
    }

    #[test]
    fn later_rule_wins_at_equal_specificity() {
        let mut g = Graph::new("g");
        g.model_stylesheet = "* { llm_model: first; } * { llm_model: second; }".to_string();
        let n = Node::new("n1");
        g.nodes.insert(n.id.clone(), n);
        apply_stylesheet(&mut g);
        assert_eq!(g.nodes["n1"].llm_model, "second");
    }
}
