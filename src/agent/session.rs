//! The multi-turn agent session loop (§4.1): drives a conversation with
//! a provider, executing tool calls against a registry until the model
//! emits a terminal response or a round/turn bound is hit. Grounded on
//! the teacher's `chat_loop_with_tools` (`llm/helpers.rs`) for the
//! overall round shape (request -> response -> tool execution -> repeat)
//! and `ChatLoopConfig`'s callback plumbing, generalized to
//! original_source's five-layer system prompt, steering queue, and loop
//! detector.

use crate::agent::events::{tool_call_signature, EventEmitter, FollowUpQueue, SessionEvent, SteeringQueue};
use crate::agent::loop_detector::LoopDetector;
use crate::agent::tools::ToolRegistry;
use crate::model::{Message, Request, Role, ToolCall};
use crate::provider::{Provider, ProviderError};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Processing,
    Closed,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    pub provider: Option<String>,
    pub max_tool_rounds_per_input: u32,
    pub max_turns: u32,
    pub parallel_tool_calls: bool,
    pub loop_detection_window: usize,
    pub base_instructions: String,
    pub environment_block: String,
    pub project_docs: String,
    pub user_overrides: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            model: String::new(),
            provider: None,
            max_tool_rounds_per_input: 0,
            max_turns: 0,
            parallel_tool_calls: false,
            loop_detection_window: 10,
            base_instructions: String::new(),
            environment_block: String::new(),
            project_docs: String::new(),
            user_overrides: String::new(),
        }
    }
}

/// Multi-turn agent session. `submit` is documented as non-reentrant per
/// session (§9 Open Question); a submit-scoped mutex makes concurrent
/// calls serialize rather than race, resolving that question in favor of
/// explicit serialization.
pub struct Session {
    config: SessionConfig,
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    history: Mutex<Vec<Message>>,
    steering: SteeringQueue,
    follow_up: FollowUpQueue,
    loop_detector: Mutex<LoopDetector>,
    submit_lock: Mutex<()>,
    state: Mutex<SessionState>,
    abort_signaled: AtomicBool,
    cumulative_turns: AtomicU32,
    pub events: EventEmitter<SessionEvent>,
}

impl Session {
    pub fn new(config: SessionConfig, provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>) -> Self {
        let window = config.loop_detection_window;
        Session {
            config,
            provider,
            tools,
            history: Mutex::new(Vec::new()),
            steering: SteeringQueue::new(),
            follow_up: FollowUpQueue::new(),
            loop_detector: Mutex::new(LoopDetector::new(window)),
            submit_lock: Mutex::new(()),
            state: Mutex::new(SessionState::Idle),
            abort_signaled: AtomicBool::new(false),
            cumulative_turns: AtomicU32::new(0),
            events: EventEmitter::new(),
        }
    }

    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    pub async fn history(&self) -> Vec<Message> {
        self.history.lock().await.clone()
    }

    pub async fn steer(&self, text: impl Into<String>) {
        self.steering.enqueue(text).await;
    }

    pub async fn queue_follow_up(&self, text: impl Into<String>) {
        self.follow_up.enqueue(text).await;
    }

    pub fn abort(&self) {
        self.abort_signaled.store(true, Ordering::SeqCst);
    }

    pub async fn close(&self) {
        *self.state.lock().await = SessionState::Closed;
    }

    /// Appends a user turn to history and runs the loop to a natural
    /// stop or a bound (§4.1).
    pub async fn submit(&self, user_text: impl Into<String>) -> Result<(), ProviderError> {
        let _permit = self.submit_lock.lock().await;

        {
            let mut state = self.state.lock().await;
            if *state == SessionState::Closed {
                return Err(ProviderError::ConfigurationError("session is closed".into()));
            }
            if *state == SessionState::Idle {
                self.events.emit(SessionEvent::SessionStart).await;
            }
            *state = SessionState::Processing;
        }

        let user_text = user_text.into();
        self.events.emit(SessionEvent::UserInput { text: user_text.clone() }).await;
        self.history.lock().await.push(Message::user(user_text));

        self.run_rounds().await?;

        if !self.follow_up.is_empty().await {
            if let Some(next) = self.follow_up.dequeue().await {
                return Box::pin(self.submit(next)).await;
            }
        }

        Ok(())
    }

    async fn run_rounds(&self) -> Result<(), ProviderError> {
        let mut rounds = 0u32;
        loop {
            if self.abort_signaled.load(Ordering::SeqCst) {
                return Ok(());
            }
            if self.config.max_tool_rounds_per_input > 0 && rounds >= self.config.max_tool_rounds_per_input {
                self.events.emit(SessionEvent::TurnLimit { reason: "max_tool_rounds_per_input".into() }).await;
                return Ok(());
            }
            if self.config.max_turns > 0 && self.cumulative_turns.load(Ordering::SeqCst) >= self.config.max_turns {
                self.events.emit(SessionEvent::TurnLimit { reason: "max_turns".into() }).await;
                return Ok(());
            }

            let steering_msgs = self.steering.drain().await;
            if !steering_msgs.is_empty() {
                let mut history = self.history.lock().await;
                for msg in steering_msgs {
                    self.events.emit(SessionEvent::SteeringInjected { text: msg.text.clone() }).await;
                    history.push(Message::user(msg.text));
                }
            }

            let request = self.build_request().await;
            let response = self.provider.complete(request).await?;
            self.cumulative_turns.fetch_add(1, Ordering::SeqCst);

            self.events.emit(SessionEvent::AssistantTextStart).await;
            let text = response.text();
            if !text.is_empty() {
                self.events.emit(SessionEvent::AssistantTextDelta { delta: text.clone() }).await;
            }
            self.events.emit(SessionEvent::AssistantTextEnd).await;

            let tool_calls = response.tool_calls();
            self.history.lock().await.push(response.message.clone());

            if tool_calls.is_empty() {
                *self.state.lock().await = SessionState::Idle;
                self.events.emit(SessionEvent::SessionEnd).await;
                return Ok(());
            }

            let results = self.execute_tool_calls(&tool_calls).await;
            {
                let mut history = self.history.lock().await;
                for (call, content, is_error) in &results {
                    history.push(Message::tool_result(call.id.clone(), content.clone(), *is_error));
                }
            }

            self.record_loop_signatures_and_check(&tool_calls).await;

            rounds += 1;
        }
    }

    /// Five-layer system prompt: base instructions -> environment block
    /// -> tool descriptions -> project docs -> user overrides. Later
    /// layers visually follow and conceptually override earlier ones.
    fn build_system_prompt(&self) -> String {
        let tool_descriptions = self
            .tools
            .definitions()
            .iter()
            .map(|d| format!("- {}: {}", d.name, d.description))
            .collect::<Vec<_>>()
            .join("\n");

        let layers = [
            self.config.base_instructions.as_str(),
            self.config.environment_block.as_str(),
            tool_descriptions.as_str(),
            self.config.project_docs.as_str(),
            self.config.user_overrides.as_str(),
        ];
        layers.iter().filter(|l| !l.is_empty()).cloned().collect::<Vec<_>>().join("\n\n")
    }

    async fn build_request(&self) -> Request {
        let system_prompt = self.build_system_prompt();
        let mut messages = Vec::new();
        if !system_prompt.is_empty() {
            messages.push(Message::system(system_prompt));
        }
        messages.extend(self.history.lock().await.clone());

        Request {
            model: self.config.model.clone(),
            messages,
            provider: self.config.provider.clone(),
            tools: Some(self.tools.definitions()),
            ..Default::default()
        }
    }

    /// Executes every tool call, concurrently if `parallel_tool_calls`
    /// allows it, serially otherwise. Returns (call, truncated content,
    /// is_error) in call order; the full untruncated output is emitted
    /// as a `tool_call_end` event before being truncated for history.
    async fn execute_tool_calls(&self, calls: &[ToolCall]) -> Vec<(ToolCall, String, bool)> {
        if self.config.parallel_tool_calls {
            let futures = calls.iter().map(|call| self.execute_one_tool_call(call));
            futures::future::join_all(futures).await
        } else {
            let mut out = Vec::with_capacity(calls.len());
            for call in calls {
                out.push(self.execute_one_tool_call(call).await);
            }
            out
        }
    }

    async fn execute_one_tool_call(&self, call: &ToolCall) -> (ToolCall, String, bool) {
        self.events.emit(SessionEvent::ToolCallStart { id: call.id.clone(), name: call.name.clone() }).await;
        let args = Value::Object(call.arguments.clone());
        let outcome = self.tools.execute(&call.name, args).await;
        self.events
            .emit(SessionEvent::ToolCallEnd {
                id: call.id.clone(),
                name: call.name.clone(),
                content: outcome.raw_content.clone(),
                is_error: outcome.is_error,
            })
            .await;
        (call.clone(), outcome.content, outcome.is_error)
    }

    /// After a round's tool execution, appends a signature of every tool
    /// call. If a periodic pattern tiles the trailing window, emits
    /// `loop_detection` and appends a steering turn warning the model;
    /// detection does not itself abort (§4.1, §4.13).
    async fn record_loop_signatures_and_check(&self, calls: &[ToolCall]) {
        let mut detector = self.loop_detector.lock().await;
        for call in calls {
            detector.record(tool_call_signature(&call.name, &Value::Object(call.arguments.clone())));
        }
        if detector.check() {
            let window = self.config.loop_detection_window;
            drop(detector);
            self.events.emit(SessionEvent::LoopDetection { pattern_length: window }).await;
            self.history.lock().await.push(Message::user(
                "Loop detected: the last several tool calls repeat a fixed pattern. \
                 Stop repeating and try a different approach.",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tools::{Tool, ToolError, ToolOutput};
    use crate::model::{ContentPart, FinishReason, Response};
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use serde_json::json;

    struct ScriptedProvider {
        responses: Mutex<Vec<Response>>,
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn id(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _request: Request) -> Result<Response, ProviderError> {
            let mut responses = self.responses.lock().await;
            Ok(responses.remove(0))
        }

        async fn stream(&self, _request: Request) -> Result<BoxStream<'static, crate::model::StreamEvent>, ProviderError> {
            unimplemented!()
        }
    }

    fn text_response(text: &str) -> Response {
        Response { message: Message::assistant(text), ..Default::default() }
    }

    fn tool_call_response(name: &str, args: Value) -> Response {
        Response {
            message: Message {
                role: Role::Assistant,
                content: vec![ContentPart::ToolCall {
                    tool_call: ToolCall { id: "call-1".into(), name: name.into(), arguments: args.as_object().unwrap().clone(), raw_arguments: None },
                }],
                ..Default::default()
            },
            finish_reason: FinishReason { reason: "tool_calls".into(), raw: None },
            ..Default::default()
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> crate::model::ToolDefinition {
            crate::model::ToolDefinition { name: "echo".into(), description: "echoes".into(), parameters: json!({}) }
        }
        async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::Text(args.to_string()))
        }
    }

    #[tokio::test]
    async fn natural_completion_ends_with_assistant_turn_and_no_tool_calls() {
        let provider = Arc::new(ScriptedProvider { responses: Mutex::new(vec![text_response("all done")]) });
        let tools = Arc::new(ToolRegistry::new());
        let session = Session::new(SessionConfig { model: "m".into(), ..Default::default() }, provider, tools);

        session.submit("hello").await.unwrap();

        let history = session.history().await;
        let last = history.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.tool_calls.is_empty());
        assert_eq!(last.text(), "all done");
    }

    #[tokio::test]
    async fn tool_call_round_then_natural_completion() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let provider = Arc::new(ScriptedProvider {
            responses: Mutex::new(vec![tool_call_response("echo", json!({"x": 1})), text_response("done")]),
        });
        let session = Session::new(SessionConfig { model: "m".into(), ..Default::default() }, provider, Arc::new(registry));

        session.submit("do it").await.unwrap();

        let history = session.history().await;
        assert!(history.iter().any(|m| m.role == Role::Tool));
        assert_eq!(history.last().unwrap().role, Role::Assistant);
    }

    #[tokio::test]
    async fn max_tool_rounds_per_input_stops_the_loop() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let responses: Vec<Response> = (0..5).map(|_| tool_call_response("echo", json!({}))).collect();
        let provider = Arc::new(ScriptedProvider { responses: Mutex::new(responses) });
        let session = Session::new(
            SessionConfig { model: "m".into(), max_tool_rounds_per_input: 2, ..Default::default() },
            provider,
            Arc::new(registry),
        );

        let (_id, mut rx) = session.events.subscribe(32).await;
        session.submit("loop").await.unwrap();

        let mut saw_turn_limit = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SessionEvent::TurnLimit { .. }) {
                saw_turn_limit = true;
            }
        }
        assert!(saw_turn_limit);
    }

    #[tokio::test]
    async fn loop_detection_warns_without_aborting() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let mut responses: Vec<Response> = (0..12).map(|_| tool_call_response("echo", json!({"a": 1}))).collect();
        responses.push(text_response("finally done"));
        let provider = Arc::new(ScriptedProvider { responses: Mutex::new(responses) });
        let session = Session::new(
            SessionConfig { model: "m".into(), max_tool_rounds_per_input: 15, loop_detection_window: 10, ..Default::default() },
            provider,
            Arc::new(registry),
        );

        session.submit("loop please").await.unwrap();

        let history = session.history().await;
        assert!(history.iter().any(|m| m.text().contains("Loop detected")));
        // the session kept going after the warning instead of aborting.
        assert_eq!(history.last().unwrap().text(), "finally done");
    }

    #[tokio::test]
    async fn abort_stops_before_further_rounds() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let responses: Vec<Response> = (0..5).map(|_| tool_call_response("echo", json!({}))).collect();
        let provider = Arc::new(ScriptedProvider { responses: Mutex::new(responses) });
        let session = Session::new(SessionConfig { model: "m".into(), ..Default::default() }, provider, Arc::new(registry));
        session.abort();
        session.submit("go").await.unwrap();
        assert_eq!(session.history().await.len(), 1); // only the user turn was appended
    }
}
