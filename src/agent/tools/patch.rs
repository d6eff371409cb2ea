//! v4a patch format: parser and hunk-applier, ported line-for-line from
//! `attractor_agent.tools.patch`. Grounded in the teacher's error-enum
//! style (`thiserror`) but the grammar and matching algorithm are
//! original_source's own.

use super::{Tool, ToolError, ToolOutput};
use crate::agent::environment::ExecutionEnvironment;
use crate::model::ToolDefinition;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("patch missing '*** Begin Patch' / '*** End Patch' markers")]
    MissingMarkers,
    #[error("unrecognized operation header: {0}")]
    UnrecognizedOperation(String),
}

#[derive(Debug, Clone)]
pub struct Hunk {
    pub context_hint: String,
    /// (kind, text) where kind is ' ', '-', or '+'.
    pub lines: Vec<(char, String)>,
}

#[derive(Debug, Clone)]
pub enum PatchOp {
    Add { path: String, content: String },
    Delete { path: String },
    Update { path: String, move_to: Option<String>, hunks: Vec<Hunk> },
}

/// Parses the patch body (between the Begin/End markers). Malformed
/// individual lines are skipped to preserve forward progress, per the
/// format's documented failure semantics; only the overall marker
/// structure is a hard parse error.
pub fn parse_patch(text: &str) -> Result<Vec<PatchOp>, PatchError> {
    let lines: Vec<&str> = text.lines().collect();
    let begin = lines.iter().position(|l| l.trim() == "*** Begin Patch");
    let end = lines.iter().position(|l| l.trim() == "*** End Patch");
    let (begin, end) = match (begin, end) {
        (Some(b), Some(e)) if e > b => (b, e),
        _ => return Err(PatchError::MissingMarkers),
    };

    let mut ops = Vec::new();
    let mut i = begin + 1;
    while i < end {
        let line = lines[i];
        if let Some(path) = line.strip_prefix("*** Add File: ") {
            let mut content = String::new();
            i += 1;
            while i < end && !lines[i].starts_with("*** ") {
                if let Some(body) = lines[i].strip_prefix('+') {
                    content.push_str(body);
                    content.push('\n');
                }
                i += 1;
            }
            ops.push(PatchOp::Add { path: path.to_string(), content });
        } else if let Some(path) = line.strip_prefix("*** Delete File: ") {
            ops.push(PatchOp::Delete { path: path.to_string() });
            i += 1;
        } else if let Some(path) = line.strip_prefix("*** Update File: ") {
            i += 1;
            let mut move_to = None;
            if i < end {
                if let Some(dest) = lines[i].strip_prefix("*** Move to: ") {
                    move_to = Some(dest.to_string());
                    i += 1;
                }
            }
            let mut hunks = Vec::new();
            while i < end && !lines[i].starts_with("*** ") {
                if let Some(hint) = lines[i].strip_prefix("@@") {
                    let mut hunk = Hunk { context_hint: hint.trim().to_string(), lines: Vec::new() };
                    i += 1;
                    while i < end && !lines[i].starts_with("@@") && !lines[i].starts_with("*** ") {
                        let raw = lines[i];
                        if let Some(body) = raw.strip_prefix(' ') {
                            hunk.lines.push((' ', body.to_string()));
                        } else if let Some(body) = raw.strip_prefix('-') {
                            hunk.lines.push(('-', body.to_string()));
                        } else if let Some(body) = raw.strip_prefix('+') {
                            hunk.lines.push(('+', body.to_string()));
                        }
                        // any other shape (blank lines, stray text) is
                        // silently skipped, not a parse failure.
                        i += 1;
                    }
                    hunks.push(hunk);
                } else {
                    i += 1;
                }
            }
            ops.push(PatchOp::Update { path: path.to_string(), move_to, hunks });
        } else {
            i += 1;
        }
    }
    Ok(ops)
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Finds the position in `file_lines` to begin walking a hunk, trying
/// exact match, then whitespace-normalized fuzzy match, then the
/// trimmed context-hint substring, falling back to position 0.
fn locate_position(file_lines: &[String], hunk: &Hunk) -> usize {
    let needle: Vec<&str> = hunk
        .lines
        .iter()
        .filter(|(kind, _)| *kind != '+')
        .map(|(_, text)| text.as_str())
        .collect();

    if !needle.is_empty() {
        if let Some(pos) = find_subslice(file_lines, &needle, |a, b| a == b) {
            return pos;
        }
        if let Some(pos) = find_subslice(file_lines, &needle, |a, b| normalize_ws(a) == normalize_ws(b)) {
            return pos;
        }
    }

    if !hunk.context_hint.is_empty() {
        let hint = hunk.context_hint.trim();
        if let Some(pos) = file_lines.iter().position(|l| l.trim().contains(hint)) {
            return pos;
        }
    }

    0
}

fn find_subslice(haystack: &[String], needle: &[&str], eq: impl Fn(&str, &str) -> bool) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    'outer: for start in 0..=(haystack.len() - needle.len()) {
        for (offset, want) in needle.iter().enumerate() {
            if !eq(haystack[start + offset].as_str(), want) {
                continue 'outer;
            }
        }
        return Some(start);
    }
    None
}

/// Walks a hunk at `position`, returning (replacement lines, lines
/// consumed from the original file).
fn walk_hunk(file_lines: &[String], hunk: &Hunk, position: usize) -> (Vec<String>, usize) {
    let mut output = Vec::new();
    let mut consumed = 0usize;
    let mut cursor = position;

    for (kind, text) in &hunk.lines {
        match kind {
            ' ' => {
                if cursor < file_lines.len() {
                    output.push(file_lines[cursor].clone());
                    cursor += 1;
                    consumed += 1;
                } else {
                    output.push(text.clone());
                }
            }
            '-' => {
                if cursor < file_lines.len() {
                    cursor += 1;
                    consumed += 1;
                }
            }
            '+' => output.push(text.clone()),
            _ => unreachable!(),
        }
    }
    (output, consumed)
}

pub fn apply_hunk(content: &str, hunk: &Hunk) -> String {
    let file_lines: Vec<String> = content.lines().map(|s| s.to_string()).collect();
    let position = locate_position(&file_lines, hunk);
    let (replacement, consumed) = walk_hunk(&file_lines, hunk, position);

    let mut result = Vec::new();
    result.extend_from_slice(&file_lines[..position]);
    result.extend(replacement);
    result.extend_from_slice(&file_lines[(position + consumed).min(file_lines.len())..]);
    let mut joined = result.join("\n");
    if !result.is_empty() {
        joined.push('\n');
    }
    joined
}

pub struct ApplyPatchTool {
    env: Arc<dyn ExecutionEnvironment>,
}

impl ApplyPatchTool {
    pub fn new(env: Arc<dyn ExecutionEnvironment>) -> Self {
        ApplyPatchTool { env }
    }

    async fn apply(&self, ops: Vec<PatchOp>) -> Result<String, ToolError> {
        let mut summary = Vec::new();
        for op in ops {
            match op {
                PatchOp::Add { path, content } => {
                    self.env.write_file(&path, &content).await.map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                    summary.push(format!("Add {}", path));
                }
                PatchOp::Delete { path } => {
                    self.env
                        .exec_command(&format!("rm -f {}", path), 5_000, None, None)
                        .await
                        .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                    summary.push(format!("Delete {}", path));
                }
                PatchOp::Update { path, move_to, hunks } => {
                    let mut content = self
                        .env
                        .read_file(&path, None, None)
                        .await
                        .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                    for hunk in &hunks {
                        content = apply_hunk(&content, hunk);
                    }
                    match &move_to {
                        Some(dest) if dest != &path => {
                            self.env.write_file(dest, &content).await.map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                            self.env
                                .exec_command(&format!("rm -f {}", path), 5_000, None, None)
                                .await
                                .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                            summary.push(format!("Update {} -> {}", path, dest));
                        }
                        _ => {
                            self.env.write_file(&path, &content).await.map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                            summary.push(format!("Update {}", path));
                        }
                    }
                }
            }
        }
        Ok(summary.join("\n"))
    }
}

#[async_trait]
impl Tool for ApplyPatchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "apply_patch".into(),
            description: "Parses and applies a v4a patch.".into(),
            parameters: json!({
                "type": "object",
                "properties": {"patch": {"type": "string"}},
                "required": ["patch"]
            }),
        }
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let patch_text = args
            .get("patch")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::ExecutionFailed("missing required parameter 'patch'".into()))?;
        let ops = parse_patch(patch_text).map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        let summary = self.apply(ops).await?;
        Ok(ToolOutput::Text(summary))
    }
}
