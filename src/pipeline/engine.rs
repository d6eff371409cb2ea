//! The pipeline step loop: edge selection, goal gates, retry, and
//! checkpointing, ported from `attractor.engine`. The teacher crate has
//! no graph-execution engine at all, so the step shape here is grounded
//! directly on original_source's `engine.py::Engine.run`, expressed with
//! the teacher's `thiserror` + `async_trait` idiom and its
//! emit-through-`EventEmitter` pattern from `agent::events`.

use super::checkpoint::{Checkpoint, CheckpointError};
use super::conditions::evaluate_condition;
use super::context::Context;
use super::graph::{Edge, Graph, Node};
use super::outcome::{Outcome, OutcomeStatus, StageStatus};
use super::validator::{Diagnostic, ValidationError};
use crate::agent::events::EventEmitter;
use crate::agent::interviewer::Interviewer;
use crate::provider::Provider;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("validation error: {0:?}")]
    Validation(Vec<Diagnostic>),
}

impl From<super::parser::ParseError> for GraphError {
    fn from(e: super::parser::ParseError) -> Self {
        GraphError::Parse(e.to_string())
    }
}

impl From<ValidationError> for GraphError {
    fn from(e: ValidationError) -> Self {
        GraphError::Validation(e.diagnostics)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("handler error: {0}")]
    Handler(String),
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Event kinds emitted by the engine (§6).
#[derive(Debug, Clone)]
pub enum EngineEvent {
    PipelineStart,
    PipelineComplete { node_id: String },
    PipelineError { message: String },
    PipelineFinalize,
    NodeStart { node_id: String },
    NodeRetry { node_id: String, attempt: u32 },
    NodeComplete { node_id: String, status: StageStatus },
    GoalGateRetry { gate_node: String, target: String },
    LoopRestart { target: String },
}

/// Everything a handler needs that isn't the node/graph/context triple:
/// where to write per-node artifacts, how to ask a human, how to call an
/// optional LLM backend, and (for `parallel`) how to run a branch of the
/// graph out-of-band.
pub struct HandlerContext<'a> {
    pub logs_root: Option<&'a std::path::Path>,
    pub interviewer: &'a dyn Interviewer,
    pub provider: Option<&'a dyn Provider>,
    pub branch_runner: &'a dyn BranchRunner,
    pub events: &'a EventEmitter<EngineEvent>,
    pub child_executor: Option<&'a dyn ChildExecutor>,
    pub tool_timeout_default: f64,
    pub manager_timeout_default: f64,
}

/// Runs a subset of the graph out-of-band from the main step loop, for
/// handlers (`parallel`) that need to drive several branches concurrently.
/// Stops just before a node whose handler type is `parallel.fan_in`, at
/// an exit node, or at a dead end (no outgoing edges).
#[async_trait]
pub trait BranchRunner: Send + Sync {
    async fn run_branch(&self, context: Context, start_node_id: &str) -> (String, Outcome);
}

/// Starts a child pipeline from a dotfile path, for `stack.manager_loop`.
#[async_trait]
pub trait ChildExecutor: Send + Sync {
    async fn start_child(&self, dotfile: &str, context: &Context) -> Result<(), HandlerError>;
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn execute(
        &self,
        node: &Node,
        graph: &Graph,
        context: &Context,
        hctx: &HandlerContext<'_>,
    ) -> Result<Outcome, HandlerError>;
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_steps: u32,
    pub dry_run: bool,
    pub checkpoints_enabled: bool,
    pub logs_root: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig { max_steps: 10_000, dry_run: false, checkpoints_enabled: true, logs_root: None }
    }
}

/// Strips an edge label's accelerator prefix (`[K] `, `K) `, `K - `),
/// lowercases and trims what remains. Mirrors
/// `agent::interviewer::parse_accelerator`'s prefix grammar but the
/// pipeline module stays free of a dependency on the agent crate, so the
/// rule is reimplemented rather than shared.
fn normalize_label(label: &str) -> String {
    let trimmed = label.trim();
    if let Some(rest) = trimmed.strip_prefix('[') {
        if let Some(close) = rest.find(']') {
            return rest[close + 1..].trim().to_lowercase();
        }
    }
    if let Some(idx) = trimmed.find(") ") {
        return trimmed[idx + 2..].trim().to_lowercase();
    }
    if let Some(idx) = trimmed.find(" - ") {
        return trimmed[idx + 3..].trim().to_lowercase();
    }
    trimmed.to_lowercase()
}

fn tiebreak<'a>(candidates: &[&'a Edge]) -> Option<&'a Edge> {
    candidates.iter().copied().min_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.target.cmp(&b.target)))
}

/// The edge-selection algorithm (§4.2.1): condition match, then
/// preferred-label match, then suggested-ids, then unconditional
/// fallback, with a weight tiebreak at every stage that yields more than
/// one candidate.
pub fn select_edge<'a>(edges: &'a [Edge], outcome: &Outcome, context: &Context) -> Option<&'a Edge> {
    let conditioned: Vec<&Edge> =
        edges.iter().filter(|e| !e.condition.trim().is_empty() && evaluate_condition(&e.condition, outcome, context)).collect();
    if !conditioned.is_empty() {
        return tiebreak(&conditioned);
    }

    if !outcome.preferred_label.trim().is_empty() {
        let wanted = normalize_label(&outcome.preferred_label);
        let labeled: Vec<&Edge> = edges.iter().filter(|e| normalize_label(&e.label) == wanted).collect();
        if !labeled.is_empty() {
            return tiebreak(&labeled);
        }
    }

    for id in &outcome.suggested_next_ids {
        if let Some(edge) = edges.iter().find(|e| &e.target == id) {
            return Some(edge);
        }
    }

    let unconditional: Vec<&Edge> = edges.iter().filter(|e| e.condition.trim().is_empty()).collect();
    let fallback: Vec<&Edge> = if !unconditional.is_empty() { unconditional } else { edges.iter().collect() };
    tiebreak(&fallback)
}

/// The first unsatisfied goal gate in execution order, if any (§4.2.2).
/// Records the latest outcome for a node, replacing any prior entry in
/// place rather than appending a second one (original_source keys
/// `node_outcomes` by node id, so a goal-gate-triggered re-run of a node
/// overwrites its old result instead of leaving a stale entry behind).
fn record_node_outcome(node_outcomes: &mut Vec<(String, Outcome)>, node_id: String, outcome: Outcome) {
    match node_outcomes.iter_mut().find(|(id, _)| *id == node_id) {
        Some(entry) => entry.1 = outcome,
        None => node_outcomes.push((node_id, outcome)),
    }
}

fn first_failing_gate(graph: &Graph, node_outcomes: &[(String, Outcome)]) -> Option<String> {
    for (id, outcome) in node_outcomes {
        if let Some(node) = graph.get_node(id) {
            if node.goal_gate && !outcome.is_success() {
                return Some(id.clone());
            }
        }
    }
    None
}

fn resolve_goal_gate_retry_target(graph: &Graph, gate_node_id: &str) -> Option<String> {
    let node = graph.get_node(gate_node_id)?;
    [node.retry_target.as_str(), node.fallback_retry_target.as_str(), graph.retry_target.as_str(), graph.fallback_retry_target.as_str()]
        .into_iter()
        .find(|t| !t.is_empty() && graph.nodes.contains_key(*t))
        .map(|t| t.to_string())
}

/// Effective retry attempts (§4.2.3): node value wins outright if
/// nonzero, graph default applies only when the node leaves it unset —
/// original_source's actual `(node.max_retries or graph.default_max_retry)
/// + 1`, not the `max(...)` spec.md's prose states (see DESIGN.md).
fn effective_attempts(node: &Node, graph: &Graph) -> u32 {
    (if node.max_retries != 0 { node.max_retries } else { graph.default_max_retry }) + 1
}

pub struct Engine {
    pub graph: Graph,
    config: EngineConfig,
    handlers: HashMap<String, std::sync::Arc<dyn Handler>>,
    interviewer: std::sync::Arc<dyn Interviewer>,
    provider: Option<std::sync::Arc<dyn Provider>>,
    child_executor: Option<std::sync::Arc<dyn ChildExecutor>>,
    pub events: EventEmitter<EngineEvent>,
}

impl Engine {
    pub fn new(graph: Graph, config: EngineConfig, interviewer: std::sync::Arc<dyn Interviewer>) -> Self {
        let mut engine = Engine {
            graph,
            config,
            handlers: HashMap::new(),
            interviewer,
            provider: None,
            child_executor: None,
            events: EventEmitter::new(),
        };
        super::handlers::register_default_handlers(&mut engine);
        engine
    }

    pub fn register_handler(&mut self, type_name: impl Into<String>, handler: std::sync::Arc<dyn Handler>) {
        self.handlers.insert(type_name.into(), handler);
    }

    pub fn with_provider(mut self, provider: std::sync::Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_child_executor(mut self, executor: std::sync::Arc<dyn ChildExecutor>) -> Self {
        self.child_executor = Some(executor);
        self
    }

    fn resolve_handler(&self, node: &Node) -> Result<std::sync::Arc<dyn Handler>, EngineError> {
        self.handlers
            .get(node.handler_type())
            .cloned()
            .ok_or_else(|| EngineError::Handler(format!("no handler registered for type '{}'", node.handler_type())))
    }

    fn handler_context<'a>(&'a self, branch_runner: &'a dyn BranchRunner) -> HandlerContext<'a> {
        HandlerContext {
            logs_root: self.config.logs_root.as_deref(),
            interviewer: self.interviewer.as_ref(),
            provider: self.provider.as_deref(),
            branch_runner,
            events: &self.events,
            child_executor: self.child_executor.as_deref(),
            tool_timeout_default: 30.0,
            manager_timeout_default: 45.0,
        }
    }

    async fn execute_with_retry(&self, node: &Node, context: &Context, node_retries: &mut HashMap<String, u32>) -> Result<Outcome, EngineError> {
        if self.config.dry_run {
            return Ok(Outcome::success());
        }

        let handler = self.resolve_handler(node)?;
        let effective = effective_attempts(node, &self.graph);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let hctx = self.handler_context(self);
            let result = handler.execute(node, &self.graph, context, &hctx).await;
            match result {
                Err(e) => {
                    if attempt < effective {
                        self.events.emit(EngineEvent::NodeRetry { node_id: node.id.clone(), attempt }).await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        continue;
                    }
                    return Ok(Outcome::fail(e.to_string()));
                }
                Ok(outcome) => match outcome.status() {
                    StageStatus::Success | StageStatus::PartialSuccess => {
                        node_retries.remove(&node.id);
                        return Ok(outcome);
                    }
                    StageStatus::Retry => {
                        if attempt < effective {
                            *node_retries.entry(node.id.clone()).or_insert(0) += 1;
                            self.events.emit(EngineEvent::NodeRetry { node_id: node.id.clone(), attempt }).await;
                            continue;
                        }
                        if node.allow_partial {
                            return Ok(Outcome { status: OutcomeStatus(StageStatus::PartialSuccess), ..outcome });
                        }
                        return Ok(Outcome::fail("max retries exceeded"));
                    }
                    StageStatus::Fail | StageStatus::Skipped => return Ok(outcome),
                },
            }
        }
    }

    /// Runs from `start_node_id` to a natural stop. Intended for the
    /// `parallel` handler's per-branch execution, so it never checks goal
    /// gates (the branch doesn't own the exit node) and never writes
    /// checkpoints (the parent step loop owns that).
    async fn run_internal(&self, context: &Context, start_node_id: &str, stop_at_fan_in: bool) -> (String, Outcome) {
        let mut current_id = start_node_id.to_string();
        let mut node_retries: HashMap<String, u32> = HashMap::new();
        let mut last_outcome = Outcome::success();

        for _ in 0..self.config.max_steps {
            let node = match self.graph.get_node(&current_id) {
                Some(n) => n.clone(),
                None => return (current_id, Outcome::fail(format!("node '{}' not found", current_id))),
            };
            if stop_at_fan_in && node.handler_type() == "parallel.fan_in" {
                return (current_id, last_outcome);
            }

            self.events.emit(EngineEvent::NodeStart { node_id: node.id.clone() }).await;
            let outcome = match self.execute_with_retry(&node, context, &mut node_retries).await {
                Ok(o) => o,
                Err(e) => Outcome::fail(e.to_string()),
            };
            self.events.emit(EngineEvent::NodeComplete { node_id: node.id.clone(), status: outcome.status() }).await;

            context.apply_updates(outcome.context_updates.clone());
            context.set("outcome", Value::String(outcome.status().as_str().to_string()));
            context.set("preferred_label", Value::String(outcome.preferred_label.clone()));
            last_outcome = outcome.clone();

            if node.handler_type() == "exit" {
                return (current_id, outcome);
            }

            let edges = self.graph.outgoing_edges(&node.id).into_iter().cloned().collect::<Vec<_>>();
            match select_edge(&edges, &outcome, context) {
                None => return (current_id, outcome),
                Some(edge) => current_id = edge.target.clone(),
            }
        }
        (current_id, last_outcome)
    }

    fn write_checkpoint(&self, context: &Context, current_node: &str, completed: &[String], node_retries: &HashMap<String, u32>) -> Result<(), EngineError> {
        if !self.config.checkpoints_enabled {
            return Ok(());
        }
        let Some(root) = &self.config.logs_root else { return Ok(()) };
        std::fs::create_dir_all(root).map_err(CheckpointError::Io)?;
        let checkpoint = Checkpoint::from_context(context, current_node, completed, node_retries);
        checkpoint.save(root.join("checkpoint.json"))?;
        Ok(())
    }

    /// `run(graph, resume?) -> final Outcome` (§4.2).
    pub async fn run(&self, resume: Option<&Checkpoint>) -> Result<Outcome, EngineError> {
        self.events.emit(EngineEvent::PipelineStart).await;

        let context = Context::new();
        let mut completed: Vec<String> = Vec::new();
        let mut node_retries: HashMap<String, u32> = HashMap::new();
        let mut node_outcomes: Vec<(String, Outcome)> = Vec::new();
        let mut last_outcome = Outcome::success();

        let mut current_id = if let Some(checkpoint) = resume {
            for (k, v) in checkpoint.context_values.clone() {
                context.set(k, v);
            }
            for entry in &checkpoint.logs {
                context.append_log(entry.clone());
            }
            completed = checkpoint.completed_nodes.clone();
            node_retries = checkpoint.node_retries.clone();

            let edges = self.graph.outgoing_edges(&checkpoint.current_node).into_iter().cloned().collect::<Vec<_>>();
            if edges.is_empty() {
                return Err(EngineError::Handler(format!("checkpoint node '{}' has no outgoing edges", checkpoint.current_node)));
            }
            let neutral = Outcome::success();
            let edge = select_edge(&edges, &neutral, &context)
                .ok_or_else(|| EngineError::Handler(format!("no edge selectable resuming from '{}'", checkpoint.current_node)))?;
            edge.target.clone()
        } else {
            let start = self
                .graph
                .start_node()
                .ok_or_else(|| EngineError::Graph(GraphError::Validation(vec![])))?;
            start.id.clone()
        };

        for _ in 0..self.config.max_steps {
            let node = self
                .graph
                .get_node(&current_id)
                .cloned()
                .ok_or_else(|| EngineError::Handler(format!("node '{}' not found", current_id)))?;

            if node.handler_type() == "exit" {
                match first_failing_gate(&self.graph, &node_outcomes) {
                    None => {
                        self.events.emit(EngineEvent::PipelineComplete { node_id: node.id.clone() }).await;
                        self.events.emit(EngineEvent::PipelineFinalize).await;
                        return Ok(last_outcome);
                    }
                    Some(gate_id) => match resolve_goal_gate_retry_target(&self.graph, &gate_id) {
                        Some(target) => {
                            self.events.emit(EngineEvent::GoalGateRetry { gate_node: gate_id.clone(), target: target.clone() }).await;
                            crate::logger::log(format!("goal_gate.retry: gate={} target={}", gate_id, target));
                            current_id = target;
                            continue;
                        }
                        None => {
                            let message = format!("goal gate '{}' failed with no resolvable retry target", gate_id);
                            self.events.emit(EngineEvent::PipelineError { message: message.clone() }).await;
                            return Ok(Outcome::fail(message));
                        }
                    },
                }
            }

            self.events.emit(EngineEvent::NodeStart { node_id: node.id.clone() }).await;
            let outcome = self.execute_with_retry(&node, &context, &mut node_retries).await?;
            self.events.emit(EngineEvent::NodeComplete { node_id: node.id.clone(), status: outcome.status() }).await;

            completed.push(node.id.clone());
            record_node_outcome(&mut node_outcomes, node.id.clone(), outcome.clone());
            context.apply_updates(outcome.context_updates.clone());
            context.set("outcome", Value::String(outcome.status().as_str().to_string()));
            context.set("preferred_label", Value::String(outcome.preferred_label.clone()));

            self.write_checkpoint(&context, &node.id, &completed, &node_retries)?;

            let edges = self.graph.outgoing_edges(&node.id).into_iter().cloned().collect::<Vec<_>>();
            let selected = select_edge(&edges, &outcome, &context);
            last_outcome = outcome.clone();

            match selected {
                None => {
                    if outcome.is_failure() {
                        let message = format!("no outgoing edge from '{}' after FAIL", node.id);
                        self.events.emit(EngineEvent::PipelineError { message }).await;
                    }
                    return Ok(outcome);
                }
                Some(edge) => {
                    if edge.loop_restart {
                        self.events.emit(EngineEvent::LoopRestart { target: edge.target.clone() }).await;
                        completed.clear();
                        node_outcomes.clear();
                        node_retries.clear();
                        current_id = if self.graph.nodes.contains_key(&edge.target) {
                            edge.target.clone()
                        } else {
                            self.graph.start_node().map(|n| n.id.clone()).unwrap_or_else(|| edge.target.clone())
                        };
                    } else {
                        current_id = edge.target.clone();
                    }
                }
            }
        }

        Ok(last_outcome)
    }
}

#[async_trait]
impl BranchRunner for Engine {
    async fn run_branch(&self, context: Context, start_node_id: &str) -> (String, Outcome) {
        self.run_internal(&context, start_node_id, true).await
    }
}

/// Guards a node's per-run logs directory (`<logs_root>/<node_id>/`),
/// created on first use.
pub(super) fn node_logs_dir(logs_root: &std::path::Path, node_id: &str) -> std::io::Result<PathBuf> {
    let dir = logs_root.join(node_id);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::interviewer::NullInterviewer;
    use crate::pipeline::graph::{Edge, Node};

    fn linear_graph() -> Graph {
        let mut g = Graph::new("g");
        let mut start = Node::new("start");
        start.shape = "Mdiamond".to_string();
        let mut task = Node::new("task");
        task.shape = "box".to_string();
        let mut exit = Node::new("exit");
        exit.shape = "Msquare".to_string();
        g.nodes.insert(start.id.clone(), start);
        g.nodes.insert(task.id.clone(), task);
        g.nodes.insert(exit.id.clone(), exit);
        g.edges.push(Edge { source: "start".into(), target: "task".into(), ..Default::default() });
        g.edges.push(Edge { source: "task".into(), target: "exit".into(), ..Default::default() });
        g
    }

    #[tokio::test]
    async fn dry_run_completes_a_linear_pipeline() {
        let graph = linear_graph();
        let engine = Engine::new(graph, EngineConfig { dry_run: true, checkpoints_enabled: false, ..Default::default() }, std::sync::Arc::new(NullInterviewer));
        let outcome = engine.run(None).await.unwrap();
        assert!(outcome.is_success());
    }

    #[test]
    fn edge_selection_prefers_conditions_over_fallback() {
        let ctx = Context::new();
        ctx.set("ready", Value::from("yes"));
        let edges = vec![
            Edge { source: "n".into(), target: "a".into(), condition: "ready=no".into(), ..Default::default() },
            Edge { source: "n".into(), target: "b".into(), condition: "ready=yes".into(), ..Default::default() },
            Edge { source: "n".into(), target: "c".into(), ..Default::default() },
        ];
        let outcome = Outcome::success();
        let selected = select_edge(&edges, &outcome, &ctx).unwrap();
        assert_eq!(selected.target, "b");
    }

    #[test]
    fn edge_selection_falls_back_to_preferred_label() {
        let ctx = Context::new();
        let mut outcome = Outcome::success();
        outcome.preferred_label = "Retry".to_string();
        let edges = vec![
            Edge { source: "n".into(), target: "a".into(), label: "[R] Retry".into(), ..Default::default() },
            Edge { source: "n".into(), target: "b".into(), label: "Continue".into(), ..Default::default() },
        ];
        let selected = select_edge(&edges, &outcome, &ctx).unwrap();
        assert_eq!(selected.target, "a");
    }

    #[test]
    fn edge_selection_weight_tiebreak_picks_smallest_target_lexicographically() {
        let ctx = Context::new();
        let outcome = Outcome::success();
        let edges = vec![
            Edge { source: "n".into(), target: "zzz".into(), weight: 5, ..Default::default() },
            Edge { source: "n".into(), target: "aaa".into(), weight: 5, ..Default::default() },
            Edge { source: "n".into(), target: "low".into(), weight: 1, ..Default::default() },
        ];
        let selected = select_edge(&edges, &outcome, &ctx).unwrap();
        assert_eq!(selected.target, "aaa");
    }

    #[test]
    fn effective_attempts_prefers_node_value_over_graph_default() {
        let graph = Graph { default_max_retry: 5, ..Graph::new("g") };
        let mut node = Node::new("n");
        node.max_retries = 2;
        assert_eq!(effective_attempts(&node, &graph), 3);
        node.max_retries = 0;
        assert_eq!(effective_attempts(&node, &graph), 6);
    }

    #[test]
    fn goal_gate_failure_is_first_in_execution_order() {
        let mut graph = Graph::new("g");
        let mut gated = Node::new("gated");
        gated.goal_gate = true;
        graph.nodes.insert(gated.id.clone(), gated);
        let outcomes = vec![("gated".to_string(), Outcome::fail("boom"))];
        assert_eq!(first_failing_gate(&graph, &outcomes), Some("gated".to_string()));
    }

    #[test]
    fn record_node_outcome_replaces_stale_entry_instead_of_appending() {
        let mut graph = Graph::new("g");
        let mut gated = Node::new("gated");
        gated.goal_gate = true;
        graph.nodes.insert(gated.id.clone(), gated);

        let mut outcomes: Vec<(String, Outcome)> = Vec::new();
        record_node_outcome(&mut outcomes, "gated".to_string(), Outcome::fail("boom"));
        assert_eq!(first_failing_gate(&graph, &outcomes), Some("gated".to_string()));

        record_node_outcome(&mut outcomes, "gated".to_string(), Outcome::success());
        assert_eq!(outcomes.len(), 1);
        assert_eq!(first_failing_gate(&graph, &outcomes), None);
    }
}
