//! Condition expression evaluator for edge routing, ported from
//! `attractor.conditions`.

use super::context::Context;
use super::outcome::Outcome;

fn resolve_key(key: &str, outcome: &Outcome, context: &Context) -> String {
    if key == "outcome" {
        return outcome.status().as_str().to_string();
    }
    if key == "preferred_label" {
        return outcome.preferred_label.clone();
    }
    if let Some(bare) = key.strip_prefix("context.") {
        if let Some(v) = context.get(key) {
            return context_value_to_string(&v);
        }
        if let Some(v) = context.get(bare) {
            return context_value_to_string(&v);
        }
        return String::new();
    }
    match context.get(key) {
        Some(v) => context_value_to_string(&v),
        None => String::new(),
    }
}

fn context_value_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn evaluate_clause(clause: &str, outcome: &Outcome, context: &Context) -> bool {
    let clause = clause.trim();
    if clause.is_empty() {
        return true;
    }
    if let Some(idx) = clause.find("!=") {
        let key = clause[..idx].trim();
        let value = clause[idx + 2..].trim();
        return resolve_key(key, outcome, context) != value;
    }
    if let Some(idx) = clause.find('=') {
        let key = clause[..idx].trim();
        let value = clause[idx + 1..].trim();
        return resolve_key(key, outcome, context) == value;
    }
    !resolve_key(clause, outcome, context).is_empty()
}

/// An empty or whitespace-only condition is always true.
pub fn evaluate_condition(condition: &str, outcome: &Outcome, context: &Context) -> bool {
    if condition.trim().is_empty() {
        return true;
    }
    condition.split("&&").all(|c| evaluate_clause(c, outcome, context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::outcome::StageStatus;

    #[test]
    fn empty_condition_is_true() {
        let ctx = Context::new();
        assert!(evaluate_condition("", &Outcome::success(), &ctx));
        assert!(evaluate_condition("   ", &Outcome::success(), &ctx));
    }

    #[test]
    fn outcome_equality_clause() {
        let ctx = Context::new();
        let outcome = Outcome::fail("boom");
        assert!(evaluate_condition("outcome=fail", &outcome, &ctx));
        assert!(!evaluate_condition("outcome=success", &outcome, &ctx));
        assert!(evaluate_condition("outcome!=success", &outcome, &ctx));
    }

    #[test]
    fn context_prefixed_and_bare_keys_both_resolve() {
        let ctx = Context::new();
        ctx.set("ready", serde_json::Value::from("yes"));
        let outcome = Outcome::success();
        assert!(evaluate_condition("context.ready=yes", &outcome, &ctx));
        assert!(evaluate_condition("ready=yes", &outcome, &ctx));
    }

    #[test]
    fn bare_key_is_truthy_check() {
        let ctx = Context::new();
        ctx.set("flag", serde_json::Value::from("set"));
        let outcome = Outcome::success();
        assert!(evaluate_condition("flag", &outcome, &ctx));
        assert!(!evaluate_condition("missing", &outcome, &ctx));
    }

    #[test]
    fn conjunction_requires_every_clause() {
        let ctx = Context::new();
        let mut outcome = Outcome::success();
        outcome.status = crate::pipeline::outcome::OutcomeStatus(StageStatus::Success);
        outcome.preferred_label = "go".to_string();
        assert!(evaluate_condition("outcome=success && preferred_label=go", &outcome, &ctx));
        assert!(!evaluate_condition("outcome=success && preferred_label=stop", &outcome, &ctx));
    }
}
