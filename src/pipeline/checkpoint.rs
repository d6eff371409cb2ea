//! Crash-recovery checkpointing, ported from `attractor.checkpoint`.

use super::context::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub current_node: String,
    #[serde(default)]
    pub completed_nodes: Vec<String>,
    #[serde(default)]
    pub node_retries: HashMap<String, u32>,
    #[serde(default, rename = "context")]
    pub context_values: HashMap<String, Value>,
    #[serde(default)]
    pub logs: Vec<String>,
}

impl Checkpoint {
    /// Writes via a sibling temp file then renames over `path`, so a
    /// reader (or a crash mid-write) never observes a partial file. The
    /// original writes in place; Rust's `rename` makes the atomic form
    /// cheap enough that there's no reason not to.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CheckpointError> {
        let path = path.as_ref();
        let mut data = self.clone();
        if data.timestamp == 0.0 {
            data.timestamp = Utc::now().timestamp_millis() as f64 / 1000.0;
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&data)?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Checkpoint, CheckpointError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn from_context(
        context: &Context,
        current_node: impl Into<String>,
        completed_nodes: &[String],
        node_retries: &HashMap<String, u32>,
    ) -> Checkpoint {
        Checkpoint {
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
            current_node: current_node.into(),
            completed_nodes: completed_nodes.to_vec(),
            node_retries: node_retries.clone(),
            context_values: context.snapshot(),
            logs: context.logs(),
        }
    }

    pub fn restore_context(&self) -> Context {
        Context::from_values(self.context_values.clone(), self.logs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let dir = std::env::temp_dir().join(format!("attractor-checkpoint-test-{}", std::process::id()));
        let path = dir.join("checkpoint.json");

        let ctx = Context::new();
        ctx.set("key", Value::from("value"));
        ctx.append_log("did a thing");

        let mut retries = HashMap::new();
        retries.insert("n1".to_string(), 2);
        let checkpoint = Checkpoint::from_context(&ctx, "n2", &["n1".to_string()], &retries);
        checkpoint.save(&path).unwrap();

        let loaded = Checkpoint::load(&path).unwrap();
        assert_eq!(loaded.current_node, "n2");
        assert_eq!(loaded.completed_nodes, vec!["n1".to_string()]);
        assert_eq!(loaded.node_retries.get("n1"), Some(&2));
        assert_eq!(loaded.context_values.get("key"), Some(&Value::from("value")));

        let restored = loaded.restore_context();
        assert_eq!(restored.get("key"), Some(Value::from("value")));

        let _ = fs::remove_dir_all(&dir);
    }
}
