//! Core filesystem/shell tools bound to an `ExecutionEnvironment`, ported
//! from `attractor_agent.tools.core`. Parameter names are pinned exactly
//! as original_source defines them.

use super::{Tool, ToolError, ToolOutput};
use crate::agent::environment::{ExecutionEnvironment, GrepOptions};
use crate::model::ToolDefinition;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

fn param_str(args: &Value, name: &str) -> Result<String, ToolError> {
    args.get(name)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ToolError::ExecutionFailed(format!("missing required parameter '{}'", name)))
}

fn param_str_opt(args: &Value, name: &str) -> Option<String> {
    args.get(name).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn param_usize_opt(args: &Value, name: &str) -> Option<usize> {
    args.get(name).and_then(|v| v.as_u64()).map(|n| n as usize)
}

fn param_bool(args: &Value, name: &str, default: bool) -> bool {
    args.get(name).and_then(|v| v.as_bool()).unwrap_or(default)
}

pub struct ReadFileTool {
    env: Arc<dyn ExecutionEnvironment>,
}

impl ReadFileTool {
    pub fn new(env: Arc<dyn ExecutionEnvironment>) -> Self {
        ReadFileTool { env }
    }
}

/// 6-column, right-aligned line numbers, matching original_source's
/// `f"{i:6d}\t{line}"` rendering.
fn number_lines(text: &str, start_at: usize) -> String {
    text.lines()
        .enumerate()
        .map(|(i, line)| format!("{:6}\t{}", start_at + i, line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Tool for ReadFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".into(),
            description: "Reads a file from the working tree, optionally a line range.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string"},
                    "offset": {"type": "integer", "description": "1-based starting line"},
                    "limit": {"type": "integer", "description": "max lines to return"}
                },
                "required": ["file_path"]
            }),
        }
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let file_path = param_str(&args, "file_path")?;
        let offset = param_usize_opt(&args, "offset");
        let limit = param_usize_opt(&args, "limit");
        let content = self
            .env
            .read_file(&file_path, offset, limit)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(ToolOutput::Text(number_lines(&content, offset.unwrap_or(1))))
    }
}

pub struct WriteFileTool {
    env: Arc<dyn ExecutionEnvironment>,
}

impl WriteFileTool {
    pub fn new(env: Arc<dyn ExecutionEnvironment>) -> Self {
        WriteFileTool { env }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "write_file".into(),
            description: "Writes content to a file, creating parent directories as needed.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["file_path", "content"]
            }),
        }
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let file_path = param_str(&args, "file_path")?;
        let content = param_str(&args, "content")?;
        self.env
            .write_file(&file_path, &content)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(ToolOutput::Text(format!(
            "Wrote {} bytes, {} lines to {}",
            content.len(),
            content.lines().count(),
            file_path
        )))
    }
}

pub struct EditFileTool {
    env: Arc<dyn ExecutionEnvironment>,
}

impl EditFileTool {
    pub fn new(env: Arc<dyn ExecutionEnvironment>) -> Self {
        EditFileTool { env }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "edit_file".into(),
            description: "Exact-string replace within a file.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string"},
                    "old_string": {"type": "string"},
                    "new_string": {"type": "string"},
                    "replace_all": {"type": "boolean", "default": false}
                },
                "required": ["file_path", "old_string", "new_string"]
            }),
        }
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let file_path = param_str(&args, "file_path")?;
        let old_string = param_str(&args, "old_string")?;
        let new_string = param_str(&args, "new_string")?;
        let replace_all = param_bool(&args, "replace_all", false);

        let content = self
            .env
            .read_file(&file_path, None, None)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        let occurrences = content.matches(&old_string).count();
        if occurrences == 0 {
            return Ok(ToolOutput::Text(format!("old_string not found in {}", file_path)));
        }
        if !replace_all && occurrences > 1 {
            return Ok(ToolOutput::Text(format!(
                "old_string occurs {} times in {}; pass replace_all=true or narrow the match",
                occurrences, file_path
            )));
        }

        let updated = if replace_all {
            content.replace(&old_string, &new_string)
        } else {
            content.replacen(&old_string, &new_string, 1)
        };

        self.env
            .write_file(&file_path, &updated)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(ToolOutput::Text(format!("Replaced {} occurrence(s) in {}", if replace_all { occurrences } else { 1 }, file_path)))
    }
}

pub struct ShellTool {
    env: Arc<dyn ExecutionEnvironment>,
    default_timeout_ms: u64,
}

impl ShellTool {
    pub fn new(env: Arc<dyn ExecutionEnvironment>, default_timeout_ms: u64) -> Self {
        ShellTool { env, default_timeout_ms }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "shell".into(),
            description: "Runs a shell command in the execution environment.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "timeout_ms": {"type": "integer"},
                    "description": {"type": "string"}
                },
                "required": ["command"]
            }),
        }
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let command = param_str(&args, "command")?;
        let timeout_ms = args.get("timeout_ms").and_then(|v| v.as_u64()).unwrap_or(self.default_timeout_ms);

        let result = self
            .env
            .exec_command(&command, timeout_ms, None, None)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        let mut out = String::new();
        if !result.stdout.is_empty() {
            out.push_str(&result.stdout);
        }
        if !result.stderr.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("[stderr]\n{}", result.stderr));
        }
        out.push_str(&format!("\n[exit_code={}]", result.exit_code));
        Ok(ToolOutput::Text(out))
    }
}

pub struct GrepTool {
    env: Arc<dyn ExecutionEnvironment>,
}

impl GrepTool {
    pub fn new(env: Arc<dyn ExecutionEnvironment>) -> Self {
        GrepTool { env }
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "grep".into(),
            description: "Recursive pattern search with optional glob filter.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string"},
                    "path": {"type": "string"},
                    "glob_filter": {"type": "string"},
                    "case_insensitive": {"type": "boolean", "default": false},
                    "max_results": {"type": "integer"}
                },
                "required": ["pattern"]
            }),
        }
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let pattern = param_str(&args, "pattern")?;
        let path = param_str_opt(&args, "path").unwrap_or_else(|| ".".to_string());
        let options = GrepOptions {
            glob_filter: param_str_opt(&args, "glob_filter"),
            case_insensitive: param_bool(&args, "case_insensitive", false),
            max_results: param_usize_opt(&args, "max_results"),
        };
        let result = self
            .env
            .grep(&pattern, &path, options)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(ToolOutput::Text(result))
    }
}

pub struct GlobTool {
    env: Arc<dyn ExecutionEnvironment>,
}

impl GlobTool {
    pub fn new(env: Arc<dyn ExecutionEnvironment>) -> Self {
        GlobTool { env }
    }
}

#[async_trait]
impl Tool for GlobTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "glob".into(),
            description: "Filesystem globbing with ** recursion; results sorted by mtime descending.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string"},
                    "path": {"type": "string"}
                },
                "required": ["pattern"]
            }),
        }
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let pattern = param_str(&args, "pattern")?;
        let path = param_str_opt(&args, "path").unwrap_or_else(|| ".".to_string());
        let matches = self
            .env
            .glob(&pattern, &path)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(ToolOutput::Text(matches.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::environment::LocalExecutionEnvironment;

    #[tokio::test]
    async fn edit_file_refuses_ambiguous_match_without_replace_all() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn ExecutionEnvironment> = Arc::new(LocalExecutionEnvironment::new(dir.path()));
        env.write_file("f.txt", "foo foo foo").await.unwrap();
        let tool = EditFileTool::new(env.clone());
        let out = tool
            .execute(json!({"file_path": "f.txt", "old_string": "foo", "new_string": "bar"}))
            .await
            .unwrap();
        let text = out.into_string();
        assert!(text.contains("occurs 3 times"));
    }

    #[tokio::test]
    async fn edit_file_replace_all_replaces_every_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn ExecutionEnvironment> = Arc::new(LocalExecutionEnvironment::new(dir.path()));
        env.write_file("f.txt", "foo foo foo").await.unwrap();
        let tool = EditFileTool::new(env.clone());
        tool.execute(json!({"file_path": "f.txt", "old_string": "foo", "new_string": "bar", "replace_all": true}))
            .await
            .unwrap();
        let content = env.read_file("f.txt", None, None).await.unwrap();
        assert_eq!(content, "bar bar bar");
    }

    #[tokio::test]
    async fn edit_file_not_found_is_error_result_not_exception() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn ExecutionEnvironment> = Arc::new(LocalExecutionEnvironment::new(dir.path()));
        env.write_file("f.txt", "hello").await.unwrap();
        let tool = EditFileTool::new(env);
        let out = tool
            .execute(json!({"file_path": "f.txt", "old_string": "missing", "new_string": "x"}))
            .await
            .unwrap();
        assert!(out.into_string().contains("not found"));
    }

    #[test]
    fn number_lines_pads_to_six_columns() {
        let out = number_lines("a\nb", 1);
        assert_eq!(out, "     1\ta\n     2\tb");
    }
}
