//! Subagent manager (§4.7): owns a map of agent-id -> handle, each
//! wrapping a child session that shares the parent's execution
//! environment and LLM client with a possibly different model. Depth is
//! tracked by walking parent back-references. There's no teacher
//! analogue (km-tools is single-session), so this is grounded on
//! original_source's `SubAgentManager` contract, expressed with the
//! teacher's `thiserror` + `uuid` idiom.

use crate::agent::session::{Session, SessionConfig};
use crate::agent::tools::ToolRegistry;
use crate::provider::Provider;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SubAgentError {
    #[error("max subagent depth exceeded (limit {limit})")]
    DepthExceeded { limit: u32 },
    #[error("unknown subagent: {0}")]
    Unknown(String),
    #[error("subagent {0} is not running")]
    NotRunning(String),
}

#[derive(Debug, Clone)]
pub struct SubAgentResult {
    pub output: String,
    pub success: bool,
    pub turns_used: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
    Running,
    Completed,
    Terminal,
}

struct SubAgentHandle {
    parent_id: Option<String>,
    session: Arc<Session>,
    state: Mutex<HandleState>,
    result: Mutex<Option<SubAgentResult>>,
}

pub struct SubAgentManager {
    handles: Mutex<HashMap<String, Arc<SubAgentHandle>>>,
    max_subagent_depth: u32,
}

impl SubAgentManager {
    pub fn new(max_subagent_depth: u32) -> Self {
        SubAgentManager { handles: Mutex::new(HashMap::new()), max_subagent_depth }
    }

    async fn depth_of(&self, parent_id: Option<&str>) -> u32 {
        let handles = self.handles.lock().await;
        let mut depth = 0;
        let mut current = parent_id.map(|s| s.to_string());
        while let Some(id) = current {
            depth += 1;
            current = handles.get(&id).and_then(|h| h.parent_id.clone());
        }
        depth
    }

    /// Submits `task` synchronously and records the result; fails with
    /// `DepthExceeded` before doing any work if spawning would exceed
    /// `max_subagent_depth`.
    pub async fn spawn(
        &self,
        parent_id: Option<&str>,
        task: impl Into<String>,
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        model: impl Into<String>,
    ) -> Result<(String, SubAgentResult), SubAgentError> {
        let depth = self.depth_of(parent_id).await;
        if depth + 1 > self.max_subagent_depth {
            return Err(SubAgentError::DepthExceeded { limit: self.max_subagent_depth });
        }

        let id = Uuid::new_v4().to_string();
        let config = SessionConfig { model: model.into(), ..Default::default() };
        let session = Arc::new(Session::new(config, provider, tools));
        let handle = Arc::new(SubAgentHandle {
            parent_id: parent_id.map(|s| s.to_string()),
            session: session.clone(),
            state: Mutex::new(HandleState::Running),
            result: Mutex::new(None),
        });
        self.handles.lock().await.insert(id.clone(), handle.clone());

        let task = task.into();
        let outcome = session.submit(task).await;
        let history = session.history().await;
        let last_assistant_text = history
            .iter()
            .rev()
            .find(|m| m.role == crate::model::Role::Assistant)
            .map(|m| m.text())
            .unwrap_or_default();

        let result = SubAgentResult {
            output: last_assistant_text,
            success: outcome.is_ok(),
            turns_used: history.len() as u32,
        };

        *handle.result.lock().await = Some(result.clone());
        *handle.state.lock().await = HandleState::Completed;

        Ok((id, result))
    }

    pub async fn send_input(&self, agent_id: &str, _text: impl Into<String>) -> Result<(), SubAgentError> {
        let handles = self.handles.lock().await;
        let handle = handles.get(agent_id).ok_or_else(|| SubAgentError::Unknown(agent_id.to_string()))?;
        let state = *handle.state.lock().await;
        if state != HandleState::Running {
            return Err(SubAgentError::NotRunning(agent_id.to_string()));
        }
        // Unreachable in this design: `spawn` always runs the task to
        // completion before returning, so no handle is ever observed
        // Running by a caller of `send_input`.
        Ok(())
    }

    /// No blocking primitive needed: `spawn` already ran the task to
    /// completion, so `wait` just returns the stored result.
    pub async fn wait(&self, agent_id: &str) -> Result<SubAgentResult, SubAgentError> {
        let handles = self.handles.lock().await;
        let handle = handles.get(agent_id).ok_or_else(|| SubAgentError::Unknown(agent_id.to_string()))?;
        handle.result.lock().await.clone().ok_or_else(|| SubAgentError::NotRunning(agent_id.to_string()))
    }

    pub async fn close(&self, agent_id: &str) -> Result<(), SubAgentError> {
        let handles = self.handles.lock().await;
        let handle = handles.get(agent_id).ok_or_else(|| SubAgentError::Unknown(agent_id.to_string()))?;
        *handle.state.lock().await = HandleState::Terminal;
        Ok(())
    }

    pub async fn depth_exceeded(&self, parent_id: Option<&str>) -> bool {
        self.depth_of(parent_id).await + 1 > self.max_subagent_depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tools::ToolRegistry;
    use crate::model::{Request, Response};
    use crate::provider::ProviderError;
    use async_trait::async_trait;
    use futures::stream::BoxStream;

    struct StaticProvider(String);

    #[async_trait]
    impl Provider for StaticProvider {
        fn id(&self) -> &str {
            "static"
        }
        async fn complete(&self, _request: Request) -> Result<Response, ProviderError> {
            Ok(Response { message: crate::model::Message::assistant(self.0.clone()), ..Default::default() })
        }
        async fn stream(&self, _request: Request) -> Result<BoxStream<'static, crate::model::StreamEvent>, ProviderError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn spawn_records_last_assistant_text_as_output() {
        let manager = SubAgentManager::new(4);
        let provider: Arc<dyn Provider> = Arc::new(StaticProvider("sub-agent done".into()));
        let tools = Arc::new(ToolRegistry::new());
        let (_id, result) = manager.spawn(None, "do a thing", provider, tools, "m").await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "sub-agent done");
    }

    #[tokio::test]
    async fn spawn_beyond_max_depth_fails_without_running() {
        let manager = SubAgentManager::new(1);
        let provider: Arc<dyn Provider> = Arc::new(StaticProvider("x".into()));
        let tools = Arc::new(ToolRegistry::new());
        let (parent_id, _) = manager.spawn(None, "root task", provider.clone(), tools.clone(), "m").await.unwrap();
        let err = manager.spawn(Some(&parent_id), "child task", provider, tools, "m").await.unwrap_err();
        assert!(matches!(err, SubAgentError::DepthExceeded { limit: 1 }));
    }

    #[tokio::test]
    async fn wait_returns_stored_result() {
        let manager = SubAgentManager::new(4);
        let provider: Arc<dyn Provider> = Arc::new(StaticProvider("y".into()));
        let tools = Arc::new(ToolRegistry::new());
        let (id, _) = manager.spawn(None, "task", provider, tools, "m").await.unwrap();
        let waited = manager.wait(&id).await.unwrap();
        assert_eq!(waited.output, "y");
    }

    #[tokio::test]
    async fn send_input_rejects_completed_handle() {
        let manager = SubAgentManager::new(4);
        let provider: Arc<dyn Provider> = Arc::new(StaticProvider("z".into()));
        let tools = Arc::new(ToolRegistry::new());
        let (id, _) = manager.spawn(None, "task", provider, tools, "m").await.unwrap();
        let err = manager.send_input(&id, "more").await.unwrap_err();
        assert!(matches!(err, SubAgentError::NotRunning(_)));
    }

    #[tokio::test]
    async fn unknown_agent_id_is_an_error() {
        let manager = SubAgentManager::new(4);
        assert!(matches!(manager.wait("nope").await.unwrap_err(), SubAgentError::Unknown(_)));
    }
}
