//! Sandboxed execution environment abstraction, ported from
//! `attractor_agent.environments.{base,local}`. The teacher's `BashTool`
//! (`tools/bash.rs`) is the closest Rust-idiom grounding for the
//! subprocess half of this; the allow/deny env-var lists and directory
//! walking come straight from original_source since the teacher has no
//! equivalent filtering.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("io error on {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Default)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct GrepOptions {
    pub glob_filter: Option<String>,
    pub case_insensitive: bool,
    pub max_results: Option<usize>,
}

/// Interface for all execution environments: local filesystem + subprocess
/// today, potentially a remote sandbox tomorrow.
#[async_trait]
pub trait ExecutionEnvironment: Send + Sync {
    async fn read_file(&self, path: &str, offset: Option<usize>, limit: Option<usize>) -> Result<String, EnvError>;
    async fn write_file(&self, path: &str, content: &str) -> Result<(), EnvError>;
    async fn file_exists(&self, path: &str) -> bool;
    async fn list_directory(&self, path: &str, depth: usize) -> Result<Vec<DirEntry>, EnvError>;
    async fn exec_command(
        &self,
        command: &str,
        timeout_ms: u64,
        working_dir: Option<&str>,
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<ExecResult, EnvError>;
    async fn grep(&self, pattern: &str, path: &str, options: GrepOptions) -> Result<String, EnvError>;
    async fn glob(&self, pattern: &str, path: &str) -> Result<Vec<String>, EnvError>;
    async fn initialize(&self) -> Result<(), EnvError>;
    async fn cleanup(&self) -> Result<(), EnvError>;
    fn working_directory(&self) -> &str;
    fn platform(&self) -> &str;
    fn os_version(&self) -> &str;
}

/// Variables always passed through regardless of secret-pattern matching.
const SAFE_ENV_VARS: &[&str] = &[
    "PATH", "HOME", "USER", "SHELL", "LANG", "TERM", "TMPDIR", "LC_ALL", "LC_CTYPE", "LOGNAME",
    "EDITOR", "VISUAL",
];

/// Substrings that exclude a variable from the child environment unless
/// it's in `SAFE_ENV_VARS` or explicitly re-injected via `extra`.
const SECRET_PATTERNS: &[&str] = &["_API_KEY", "_SECRET", "_TOKEN", "_PASSWORD", "_CREDENTIAL"];

pub fn filter_env(extra: Option<&HashMap<String, String>>) -> HashMap<String, String> {
    let mut env = HashMap::new();
    for (key, val) in std::env::vars() {
        if SAFE_ENV_VARS.contains(&key.as_str()) {
            env.insert(key, val);
        } else {
            let upper = key.to_uppercase();
            if !SECRET_PATTERNS.iter().any(|p| upper.contains(p)) {
                env.insert(key, val);
            }
        }
    }
    if let Some(extra) = extra {
        for (k, v) in extra {
            env.insert(k.clone(), v.clone());
        }
    }
    env
}

pub struct LocalExecutionEnvironment {
    working_dir: PathBuf,
}

impl LocalExecutionEnvironment {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        LocalExecutionEnvironment { working_dir: working_dir.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.working_dir.join(p)
        }
    }

    fn walk(root: &Path, entries: &mut Vec<DirEntry>, max_depth: usize, current: usize) {
        if current >= max_depth {
            return;
        }
        let Ok(read_dir) = std::fs::read_dir(root) else { return };
        let mut items: Vec<_> = read_dir.flatten().collect();
        items.sort_by_key(|e| e.file_name());
        for item in items {
            let path = item.path();
            let is_dir = path.is_dir();
            let size = if is_dir { None } else { std::fs::metadata(&path).ok().map(|m| m.len()) };
            entries.push(DirEntry {
                name: item.file_name().to_string_lossy().to_string(),
                is_dir,
                size,
            });
            if is_dir && current + 1 < max_depth {
                Self::walk(&path, entries, max_depth, current + 1);
            }
        }
    }
}

#[async_trait]
impl ExecutionEnvironment for LocalExecutionEnvironment {
    async fn read_file(&self, path: &str, offset: Option<usize>, limit: Option<usize>) -> Result<String, EnvError> {
        let full = self.resolve(path);
        let text = tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| EnvError::Io { path: path.to_string(), source: e })?;
        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        let start = offset.unwrap_or(1).saturating_sub(1);
        let slice: Vec<&str> = match limit {
            Some(limit) => lines.into_iter().skip(start).take(limit).collect(),
            None => lines.into_iter().skip(start).collect(),
        };
        Ok(slice.concat())
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), EnvError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EnvError::Io { path: path.to_string(), source: e })?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| EnvError::Io { path: path.to_string(), source: e })
    }

    async fn file_exists(&self, path: &str) -> bool {
        tokio::fs::metadata(self.resolve(path)).await.is_ok()
    }

    async fn list_directory(&self, path: &str, depth: usize) -> Result<Vec<DirEntry>, EnvError> {
        let root = self.resolve(path);
        let mut entries = Vec::new();
        Self::walk(&root, &mut entries, depth.max(1), 0);
        Ok(entries)
    }

    async fn exec_command(
        &self,
        command: &str,
        timeout_ms: u64,
        working_dir: Option<&str>,
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<ExecResult, EnvError> {
        let cwd = match working_dir {
            Some(wd) => self.resolve(wd),
            None => self.working_dir.clone(),
        };
        let env = filter_env(env_vars.as_ref());
        let start = std::time::Instant::now();

        let shell = if cfg!(windows) { "cmd" } else { "sh" };
        let shell_arg = if cfg!(windows) { "/C" } else { "-c" };

        let mut child = Command::new(shell)
            .arg(shell_arg)
            .arg(command)
            .current_dir(&cwd)
            .env_clear()
            .envs(&env)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| EnvError::Io { path: command.to_string(), source: e })?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let stdout_task = tokio::spawn(async move {
            let mut out = String::new();
            if let Some(pipe) = stdout_pipe {
                let mut reader = BufReader::new(pipe).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    out.push_str(&line);
                    out.push('\n');
                }
            }
            out
        });
        let stderr_task = tokio::spawn(async move {
            let mut out = String::new();
            if let Some(pipe) = stderr_pipe {
                let mut reader = BufReader::new(pipe).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    out.push_str(&line);
                    out.push('\n');
                }
            }
            out
        });

        let wait_result = tokio::time::timeout(
            std::time::Duration::from_millis(timeout_ms),
            child.wait(),
        )
        .await;

        let (timed_out, exit_code, stdout, stderr) = match wait_result {
            Ok(Ok(status)) => {
                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                (false, status.code().unwrap_or(-1), stdout, stderr)
            }
            _ => {
                // Soft terminate, grace period, then hard kill.
                let _ = child.start_kill();
                let grace = tokio::time::timeout(std::time::Duration::from_secs(2), child.wait()).await;
                if grace.is_err() {
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                }
                stdout_task.abort();
                stderr_task.abort();
                (true, -1, String::new(), "Command timed out".to_string())
            }
        };

        Ok(ExecResult {
            stdout,
            stderr,
            exit_code,
            timed_out,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn grep(&self, pattern: &str, path: &str, options: GrepOptions) -> Result<String, EnvError> {
        let mut args = vec!["-rn".to_string()];
        if options.case_insensitive {
            args.push("-i".to_string());
        }
        args.push(pattern.to_string());
        args.push(self.resolve(path).to_string_lossy().to_string());
        if let Some(glob) = &options.glob_filter {
            args.push("--include".to_string());
            args.push(glob.clone());
        }
        if let Some(max) = options.max_results {
            args.push("-m".to_string());
            args.push(max.to_string());
        }

        let output = Command::new("grep")
            .args(&args)
            .output()
            .await
            .map_err(|e| EnvError::Io { path: path.to_string(), source: e })?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn glob(&self, pattern: &str, path: &str) -> Result<Vec<String>, EnvError> {
        let root = self.resolve(path);
        let mut matches: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();

        if pattern.contains("**") {
            let suffix = pattern.replace("**/", "");
            for entry in walkdir_flat(&root) {
                if glob_match(&suffix, entry.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default().as_str())
                    || glob_match(&suffix, entry.strip_prefix(&root).ok().map(|p| p.to_string_lossy().to_string()).unwrap_or_default().as_str())
                {
                    let mtime = std::fs::metadata(&entry).and_then(|m| m.modified()).unwrap_or(std::time::UNIX_EPOCH);
                    matches.push((entry, mtime));
                }
            }
        } else if let Ok(read_dir) = std::fs::read_dir(&root) {
            for entry in read_dir.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if glob_match(pattern, &name) {
                    let mtime = entry.metadata().and_then(|m| m.modified()).unwrap_or(std::time::UNIX_EPOCH);
                    matches.push((entry.path(), mtime));
                }
            }
        }

        matches.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(matches
            .into_iter()
            .map(|(p, _)| p.strip_prefix(&root).unwrap_or(&p).to_string_lossy().to_string())
            .collect())
    }

    async fn initialize(&self) -> Result<(), EnvError> {
        tokio::fs::create_dir_all(&self.working_dir)
            .await
            .map_err(|e| EnvError::Io { path: self.working_dir.to_string_lossy().to_string(), source: e })
    }

    async fn cleanup(&self) -> Result<(), EnvError> {
        Ok(())
    }

    fn working_directory(&self) -> &str {
        self.working_dir.to_str().unwrap_or("")
    }

    fn platform(&self) -> &str {
        std::env::consts::OS
    }

    fn os_version(&self) -> &str {
        ""
    }
}

fn walkdir_flat(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    fn recurse(dir: &Path, out: &mut Vec<PathBuf>) {
        let Ok(read_dir) = std::fs::read_dir(dir) else { return };
        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.is_dir() {
                recurse(&path, out);
            } else {
                out.push(path);
            }
        }
    }
    recurse(root, &mut out);
    out
}

/// Minimal `fnmatch`-style glob: `*` matches any run of characters, `?`
/// matches exactly one. No brace expansion or character classes, matching
/// the scope original_source's `fnmatch.fnmatch` covers.
fn glob_match(pattern: &str, name: &str) -> bool {
    fn match_here(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => match_here(&p[1..], n) || (!n.is_empty() && match_here(p, &n[1..])),
            (Some(b'?'), Some(_)) => match_here(&p[1..], &n[1..]),
            (Some(pc), Some(nc)) if pc == nc => match_here(&p[1..], &n[1..]),
            _ => false,
        }
    }
    match_here(pattern.as_bytes(), name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_env_blocks_secret_shaped_vars() {
        std::env::set_var("MY_SERVICE_API_KEY", "sekret");
        std::env::set_var("HOME", "/home/test");
        let env = filter_env(None);
        assert!(!env.contains_key("MY_SERVICE_API_KEY"));
        assert!(env.contains_key("HOME"));
        std::env::remove_var("MY_SERVICE_API_KEY");
    }

    #[test]
    fn filter_env_allows_explicit_reinjection() {
        std::env::set_var("X_SECRET_THING", "sekret");
        let mut extra = HashMap::new();
        extra.insert("X_SECRET_THING".to_string(), "overridden".to_string());
        let env = filter_env(Some(&extra));
        assert_eq!(env.get("X_SECRET_THING"), Some(&"overridden".to_string()));
        std::env::remove_var("X_SECRET_THING");
    }

    #[test]
    fn glob_match_handles_star_and_question() {
        assert!(glob_match("*.rs", "main.rs"));
        assert!(!glob_match("*.rs", "main.py"));
        assert!(glob_match("a?c", "abc"));
    }

    #[tokio::test]
    async fn read_write_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalExecutionEnvironment::new(dir.path());
        env.write_file("sub/file.txt", "hello\nworld\n").await.unwrap();
        let content = env.read_file("sub/file.txt", None, None).await.unwrap();
        assert_eq!(content, "hello\nworld\n");
        let partial = env.read_file("sub/file.txt", Some(2), Some(1)).await.unwrap();
        assert_eq!(partial, "world\n");
    }

    #[tokio::test]
    async fn exec_command_times_out_with_soft_then_hard_kill() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalExecutionEnvironment::new(dir.path());
        let start = std::time::Instant::now();
        let result = env.exec_command("sleep 10", 200, None, None).await.unwrap();
        assert!(result.timed_out);
        assert_eq!(result.exit_code, -1);
        assert!(start.elapsed() < std::time::Duration::from_secs(3));
    }
}
