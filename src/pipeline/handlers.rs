//! The nine handler types registered by default, ported from
//! `attractor.handlers.*`. The teacher crate has no node-handler concept
//! at all, so each of these is grounded on the matching original_source
//! module named in its doc comment, expressed in the teacher's
//! `async_trait` + `thiserror` idiom.

use super::context::Context;
use super::engine::{BranchRunner, Engine, Handler, HandlerContext, HandlerError};
use super::graph::{Graph, Node};
use super::outcome::{Outcome, StageStatus};
use crate::agent::interviewer::{parse_accelerator, Choice, InterviewerAnswer, MultipleChoiceQuestion};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;

pub(super) fn register_default_handlers(engine: &mut Engine) {
    engine.register_handler("start", Arc::new(NoOpHandler));
    engine.register_handler("exit", Arc::new(NoOpHandler));
    engine.register_handler("conditional", Arc::new(NoOpHandler));
    engine.register_handler("codergen", Arc::new(CodergenHandler));
    engine.register_handler("wait.human", Arc::new(WaitHumanHandler));
    engine.register_handler("parallel", Arc::new(ParallelHandler));
    engine.register_handler("parallel.fan_in", Arc::new(FanInHandler));
    engine.register_handler("tool", Arc::new(ToolHandler));
    engine.register_handler("stack.manager_loop", Arc::new(StackManagerLoopHandler));
}

/// Parses a duration string of the forms `"Ns"`, `"Nm"`, or a bare float,
/// falling back to `default_secs` on empty or unparseable input. Shared
/// by the `tool` (30.0s default) and `stack.manager_loop` (45.0s
/// default) handlers.
fn parse_duration_secs(raw: &str, default_secs: f64) -> f64 {
    let raw = raw.trim();
    if raw.is_empty() {
        return default_secs;
    }
    if let Some(n) = raw.strip_suffix('s') {
        return n.trim().parse().unwrap_or(default_secs);
    }
    if let Some(n) = raw.strip_suffix('m') {
        return n.trim().parse::<f64>().map(|v| v * 60.0).unwrap_or(default_secs);
    }
    raw.parse().unwrap_or(default_secs)
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

struct NoOpHandler;

#[async_trait]
impl Handler for NoOpHandler {
    async fn execute(&self, _node: &Node, _graph: &Graph, _context: &Context, _hctx: &HandlerContext<'_>) -> Result<Outcome, HandlerError> {
        Ok(Outcome::success())
    }
}

/// Ported from `handlers/codergen.py`.
struct CodergenHandler;

fn expand_prompt(template: &str, node: &Node, graph: &Graph, context: &Context) -> String {
    let mut out = template.to_string();
    out = out.replace("$goal", &graph.goal);
    out = out.replace("$node_id", &node.id);
    for (key, value) in context.values() {
        let placeholder = format!("${}", key);
        if out.contains(&placeholder) {
            let rendered = match &value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out = out.replace(&placeholder, &rendered);
        }
    }
    out
}

#[async_trait]
impl Handler for CodergenHandler {
    async fn execute(&self, node: &Node, graph: &Graph, context: &Context, hctx: &HandlerContext<'_>) -> Result<Outcome, HandlerError> {
        let template = if !node.prompt.is_empty() { &node.prompt } else { &node.label };
        let prompt = expand_prompt(template, node, graph, context);

        if let Some(root) = hctx.logs_root {
            let dir = super::engine::node_logs_dir(root, &node.id)?;
            tokio::fs::write(dir.join("prompt.md"), &prompt).await?;
        }

        let response = match hctx.provider {
            None => format!("(simulated) {}", truncate_chars(&prompt, 200)),
            Some(provider) => {
                let request = crate::model::Request {
                    model: if !node.llm_model.is_empty() { node.llm_model.clone() } else { "default".to_string() },
                    messages: vec![crate::model::Message::user(prompt.clone())],
                    ..Default::default()
                };
                match provider.complete(request).await {
                    Ok(response) => response.text(),
                    Err(e) => {
                        return Ok(Outcome::fail(format!("backend error: {}", e)));
                    }
                }
            }
        };

        if let Some(root) = hctx.logs_root {
            let dir = super::engine::node_logs_dir(root, &node.id)?;
            tokio::fs::write(dir.join("response.md"), &response).await?;
            let status = json!({"status": "success", "node_id": node.id});
            tokio::fs::write(dir.join("status.json"), serde_json::to_string_pretty(&status).unwrap()).await?;
        }

        let mut updates = HashMap::new();
        updates.insert("last_stage".to_string(), Value::String(node.id.clone()));
        updates.insert("last_response".to_string(), Value::String(truncate_chars(&response, 200)));
        Ok(Outcome { status: super::outcome::OutcomeStatus(StageStatus::Success), context_updates: updates, ..Default::default() })
    }
}

/// Ported from `handlers/wait_human.py`.
struct WaitHumanHandler;

#[async_trait]
impl Handler for WaitHumanHandler {
    async fn execute(&self, node: &Node, graph: &Graph, _context: &Context, hctx: &HandlerContext<'_>) -> Result<Outcome, HandlerError> {
        let edges = graph.outgoing_edges(&node.id);
        let choices: Vec<Choice> = edges
            .iter()
            .map(|e| {
                let (key, remainder) = parse_accelerator(&e.label);
                Choice { key, label: if remainder.is_empty() { e.target.clone() } else { remainder } }
            })
            .collect();

        let question = MultipleChoiceQuestion { prompt: if node.prompt.is_empty() { node.display_label().to_string() } else { node.prompt.clone() }, choices: choices.clone() };

        let timeout = if node.timeout.is_empty() { None } else { Some(Duration::from_secs_f64(parse_duration_secs(&node.timeout, 30.0))) };
        let answer = hctx.interviewer.ask_multiple_choice(question, timeout).await;

        match answer {
            InterviewerAnswer::Skipped => Ok(Outcome::fail("human question skipped")),
            InterviewerAnswer::TimedOut => {
                if let Some(default_target) = edges.iter().find(|e| e.condition.is_empty() && e.label.to_lowercase().contains("default")) {
                    Ok(Outcome { suggested_next_ids: vec![default_target.target.clone()], ..Outcome::success() })
                } else {
                    Ok(Outcome::retry("wait.human timed out with no default"))
                }
            }
            InterviewerAnswer::Answered(value) => {
                let matched = choices
                    .iter()
                    .zip(edges.iter())
                    .find(|(choice, _)| choice.key.eq_ignore_ascii_case(&value) || choice.label.eq_ignore_ascii_case(&value));
                match matched {
                    Some((_, edge)) => Ok(Outcome { suggested_next_ids: vec![edge.target.clone()], ..Outcome::success() }),
                    None => match edges.first() {
                        Some(first) => Ok(Outcome { suggested_next_ids: vec![first.target.clone()], ..Outcome::success() }),
                        None => Ok(Outcome::fail("wait.human has no outgoing edges")),
                    },
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinPolicy {
    WaitAll,
    FirstSuccess,
    KOfN(usize),
}

fn parse_join_policy(raw: &str) -> JoinPolicy {
    if let Some(rest) = raw.strip_suffix("_of_n") {
        if let Ok(k) = rest.parse::<usize>() {
            return JoinPolicy::KOfN(k);
        }
    }
    match raw {
        "first_success" => JoinPolicy::FirstSuccess,
        _ => JoinPolicy::WaitAll,
    }
}

/// Ported from `handlers/parallel.py`.
struct ParallelHandler;

#[async_trait]
impl Handler for ParallelHandler {
    async fn execute(&self, node: &Node, graph: &Graph, context: &Context, hctx: &HandlerContext<'_>) -> Result<Outcome, HandlerError> {
        let edges = graph.outgoing_edges(&node.id);
        if edges.is_empty() {
            return Ok(Outcome::fail("parallel node has no outgoing edges"));
        }

        let max_parallel: usize = node.extra.get("max_parallel").and_then(|v| v.as_u64()).unwrap_or(edges.len() as u64) as usize;
        let join_policy = parse_join_policy(node.extra.get("join_policy").and_then(|v| v.as_str()).unwrap_or("wait_all"));
        let fail_fast = node.extra.get("error_policy").and_then(|v| v.as_str()) == Some("fail_fast");

        let semaphore = Arc::new(Semaphore::new(max_parallel.max(1)));
        let cancelled = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let mut tasks = Vec::new();
        for edge in &edges {
            let target = edge.target.clone();
            let branch_ctx = context.clone_deep();
            let sem = semaphore.clone();
            let cancelled = cancelled.clone();
            let runner = hctx.branch_runner;
            tasks.push(async move {
                let _permit = sem.acquire().await.ok();
                if cancelled.load(std::sync::atomic::Ordering::SeqCst) {
                    return (target, Outcome { status: super::outcome::OutcomeStatus(StageStatus::Skipped), ..Default::default() });
                }
                let (_last_node, outcome) = runner.run_branch(branch_ctx, &target).await;
                if fail_fast && outcome.is_failure() {
                    cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
                }
                (target, outcome)
            });
        }

        let results: Vec<(String, Outcome)> = futures::future::join_all(tasks).await;

        let satisfied = match join_policy {
            JoinPolicy::WaitAll => true,
            JoinPolicy::FirstSuccess => results.iter().any(|(_, o)| o.is_success()),
            JoinPolicy::KOfN(k) => results.iter().filter(|(_, o)| o.is_success()).count() >= k,
        };

        let serialized: Vec<Value> = results
            .iter()
            .map(|(target, outcome)| {
                json!({
                    "node_id": target,
                    "status": outcome.status().as_str(),
                    "score": outcome.context_updates.get("score").cloned().unwrap_or(Value::from(0)),
                    "context_updates": outcome.context_updates,
                })
            })
            .collect();

        let mut updates = HashMap::new();
        updates.insert("parallel.results".to_string(), Value::Array(serialized));

        if !satisfied && fail_fast {
            return Ok(Outcome { status: super::outcome::OutcomeStatus(StageStatus::Fail), context_updates: updates, failure_reason: "parallel join policy not satisfied".to_string(), ..Default::default() });
        }

        Ok(Outcome { status: super::outcome::OutcomeStatus(StageStatus::Success), context_updates: updates, ..Default::default() })
    }
}

/// Ported from `handlers/parallel.py::fan_in`.
struct FanInHandler;

#[async_trait]
impl Handler for FanInHandler {
    async fn execute(&self, _node: &Node, _graph: &Graph, context: &Context, _hctx: &HandlerContext<'_>) -> Result<Outcome, HandlerError> {
        let results = match context.get("parallel.results") {
            Some(Value::Array(items)) => items,
            _ => return Ok(Outcome::fail("parallel.fan_in found no parallel.results in context")),
        };

        let mut ranked: Vec<(&Value, u8, i64, String)> = results
            .iter()
            .map(|entry| {
                let status = entry.get("status").and_then(|v| v.as_str()).unwrap_or("fail");
                let rank = match status {
                    "success" => 0,
                    "partial_success" => 1,
                    "retry" => 2,
                    "fail" => 3,
                    _ => 4,
                };
                let score = entry.get("context_updates").and_then(|u| u.get("score")).and_then(|v| v.as_i64()).unwrap_or(0);
                let node_id = entry.get("node_id").and_then(|v| v.as_str()).unwrap_or("").to_string();
                (entry, rank, score, node_id)
            })
            .collect();

        ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| b.2.cmp(&a.2)).then_with(|| a.3.cmp(&b.3)));

        match ranked.first() {
            None => Ok(Outcome::fail("parallel.results was empty")),
            Some((_, _, _, winner_id)) => {
                let mut updates = HashMap::new();
                updates.insert("parallel.winner".to_string(), Value::String(winner_id.clone()));
                Ok(Outcome { status: super::outcome::OutcomeStatus(StageStatus::Success), context_updates: updates, ..Default::default() })
            }
        }
    }
}

/// Ported from `handlers/tool.py`.
struct ToolHandler;

#[async_trait]
impl Handler for ToolHandler {
    async fn execute(&self, node: &Node, _graph: &Graph, _context: &Context, hctx: &HandlerContext<'_>) -> Result<Outcome, HandlerError> {
        let command = node.extra.get("tool_command").and_then(|v| v.as_str()).unwrap_or("").to_string();
        if command.is_empty() {
            return Ok(Outcome::fail("tool node has no tool_command"));
        }
        let timeout = Duration::from_secs_f64(parse_duration_secs(&node.timeout, hctx.tool_timeout_default));

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(&command);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let child = cmd.spawn()?;
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Ok(Outcome { status: super::outcome::OutcomeStatus(StageStatus::Fail), failure_reason: format!("tool command timed out after {:?}", timeout), ..Default::default() });
            }
        };

        let combined = format!("{}{}", String::from_utf8_lossy(&output.stdout), String::from_utf8_lossy(&output.stderr));
        if let Some(root) = hctx.logs_root {
            let dir = super::engine::node_logs_dir(root, &node.id)?;
            let mut file = tokio::fs::File::create(dir.join("tool_output.txt")).await?;
            file.write_all(combined.as_bytes()).await?;
        }

        if output.status.success() {
            Ok(Outcome::success())
        } else {
            Ok(Outcome::fail(format!("tool command exited with status {:?}", output.status.code())))
        }
    }
}

/// Ported from `handlers/manager.py`.
struct StackManagerLoopHandler;

#[async_trait]
impl Handler for StackManagerLoopHandler {
    async fn execute(&self, node: &Node, _graph: &Graph, context: &Context, hctx: &HandlerContext<'_>) -> Result<Outcome, HandlerError> {
        let poll_interval = parse_duration_secs(node.extra.get("manager.poll_interval").and_then(|v| v.as_str()).unwrap_or("0.1s"), 0.1);
        let max_cycles = node.extra.get("manager.max_cycles").and_then(|v| v.as_u64()).unwrap_or(1000);
        let stop_condition = node.extra.get("manager.stop_condition").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let actions_raw = node.extra.get("manager.actions").and_then(|v| v.as_str()).unwrap_or("observe,wait");
        let actions: Vec<&str> = actions_raw.split(',').map(|a| a.trim()).collect();

        let autostart = node.extra.get("stack.child_autostart").and_then(|v| v.as_str()).unwrap_or("true") == "true";
        let child_dotfile = node.extra.get("stack.child_dotfile").and_then(|v| v.as_str()).unwrap_or("");

        if autostart && !child_dotfile.is_empty() {
            if let Some(executor) = hctx.child_executor {
                executor.start_child(child_dotfile, context).await?;
            }
        }
        let _ = hctx.manager_timeout_default;

        for _cycle in 0..max_cycles {
            let status = context.get_string("stack.child.status");
            if status == "completed" {
                return Ok(Outcome::success());
            }
            if status == "failed" {
                return Ok(Outcome::fail("child pipeline reported failed"));
            }
            if !stop_condition.is_empty() {
                let dummy = Outcome::success();
                if super::conditions::evaluate_condition(&stop_condition, &dummy, context) {
                    return Ok(Outcome::success());
                }
            }
            if actions.contains(&"wait") {
                tokio::time::sleep(Duration::from_secs_f64(poll_interval)).await;
            }
        }

        Ok(Outcome::fail(format!("Max cycles exceeded ({})", max_cycles)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::interviewer::NullInterviewer;
    use crate::pipeline::engine::{EngineConfig, EngineEvent};
    use crate::pipeline::graph::{Edge, Graph};

    struct StubBranchRunner;

    #[async_trait]
    impl BranchRunner for StubBranchRunner {
        async fn run_branch(&self, _context: Context, start_node_id: &str) -> (String, Outcome) {
            (start_node_id.to_string(), Outcome::success())
        }
    }

    fn handler_ctx<'a>(interviewer: &'a dyn crate::agent::interviewer::Interviewer, events: &'a crate::agent::events::EventEmitter<EngineEvent>, runner: &'a dyn BranchRunner) -> HandlerContext<'a> {
        HandlerContext {
            logs_root: None,
            interviewer,
            provider: None,
            branch_runner: runner,
            events,
            child_executor: None,
            tool_timeout_default: 30.0,
            manager_timeout_default: 45.0,
        }
    }

    #[test]
    fn duration_parser_handles_seconds_minutes_and_bare_floats() {
        assert_eq!(parse_duration_secs("5s", 30.0), 5.0);
        assert_eq!(parse_duration_secs("2m", 30.0), 120.0);
        assert_eq!(parse_duration_secs("7.5", 30.0), 7.5);
        assert_eq!(parse_duration_secs("", 30.0), 30.0);
        assert_eq!(parse_duration_secs("garbage", 45.0), 45.0);
    }

    #[tokio::test]
    async fn codergen_without_backend_truncates_simulated_response() {
        let graph = Graph::new("g");
        let mut node = Node::new("n");
        node.prompt = "x".repeat(500);
        let ctx = Context::new();
        let interviewer = NullInterviewer;
        let events: crate::agent::events::EventEmitter<EngineEvent> = crate::agent::events::EventEmitter::new();
        let runner = StubBranchRunner;
        let hctx = handler_ctx(&interviewer, &events, &runner);
        let outcome = CodergenHandler.execute(&node, &graph, &ctx, &hctx).await.unwrap();
        assert!(outcome.is_success());
        let response = outcome.context_updates.get("last_response").unwrap().as_str().unwrap();
        assert!(response.len() <= 200 + "(simulated) ".len());
    }

    #[tokio::test]
    async fn wait_human_routes_to_matching_edge_by_accelerator() {
        let mut graph = Graph::new("g");
        graph.nodes.insert("n".to_string(), Node::new("n"));
        graph.nodes.insert("yes".to_string(), Node::new("yes"));
        graph.nodes.insert("no".to_string(), Node::new("no"));
        graph.edges.push(Edge { source: "n".into(), target: "yes".into(), label: "[Y] Yes".into(), ..Default::default() });
        graph.edges.push(Edge { source: "n".into(), target: "no".into(), label: "[N] No".into(), ..Default::default() });

        struct YesInterviewer;
        #[async_trait]
        impl crate::agent::interviewer::Interviewer for YesInterviewer {
            async fn ask_multiple_choice(&self, _q: MultipleChoiceQuestion, _t: Option<Duration>) -> InterviewerAnswer {
                InterviewerAnswer::Answered("Y".to_string())
            }
        }

        let node = graph.nodes.get("n").unwrap().clone();
        let ctx = Context::new();
        let interviewer = YesInterviewer;
        let events: crate::agent::events::EventEmitter<EngineEvent> = crate::agent::events::EventEmitter::new();
        let runner = StubBranchRunner;
        let hctx = handler_ctx(&interviewer, &events, &runner);
        let outcome = WaitHumanHandler.execute(&node, &graph, &ctx, &hctx).await.unwrap();
        assert_eq!(outcome.suggested_next_ids, vec!["yes".to_string()]);
    }

    #[tokio::test]
    async fn fan_in_picks_highest_ranked_then_score_then_lowest_id() {
        let ctx = Context::new();
        ctx.set(
            "parallel.results",
            json!([
                {"node_id": "b", "status": "fail", "context_updates": {}},
                {"node_id": "a", "status": "success", "context_updates": {"score": 1}},
                {"node_id": "c", "status": "success", "context_updates": {"score": 5}},
            ]),
        );
        let graph = Graph::new("g");
        let node = Node::new("fan_in");
        let interviewer = NullInterviewer;
        let events: crate::agent::events::EventEmitter<EngineEvent> = crate::agent::events::EventEmitter::new();
        let runner = StubBranchRunner;
        let hctx = handler_ctx(&interviewer, &events, &runner);
        let outcome = FanInHandler.execute(&node, &graph, &ctx, &hctx).await.unwrap();
        assert_eq!(outcome.context_updates.get("parallel.winner").unwrap().as_str().unwrap(), "c");
    }

    #[tokio::test]
    async fn manager_loop_succeeds_when_child_status_completes() {
        let graph = Graph::new("g");
        let mut node = Node::new("m");
        node.extra.insert("manager.max_cycles".to_string(), Value::from(3));
        node.extra.insert("manager.poll_interval".to_string(), Value::from("0s"));
        let ctx = Context::new();
        ctx.set("stack.child.status", Value::from("completed"));
        let interviewer = NullInterviewer;
        let events: crate::agent::events::EventEmitter<EngineEvent> = crate::agent::events::EventEmitter::new();
        let runner = StubBranchRunner;
        let hctx = handler_ctx(&interviewer, &events, &runner);
        let _ = EngineConfig::default();
        let outcome = StackManagerLoopHandler.execute(&node, &graph, &ctx, &hctx).await.unwrap();
        assert!(outcome.is_success());
    }
}
