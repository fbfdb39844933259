//! Built-in workspace tools: file access and shell execution.
//!
//! All paths are resolved relative to the workspace root; absolute paths
//! and parent traversal are rejected.

use crate::ToolHandler;
use serde_json::{Value, json};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use taskloop_core::{ToolDefinition, ToolError};
use wait_timeout::ChildExt;

const READ_MAX_BYTES_DEFAULT: usize = 1_000_000;
const SHELL_TIMEOUT_SECONDS_DEFAULT: u64 = 120;

/// Register the standard tool set rooted at `workspace`.
pub fn register_builtin(registry: &mut crate::ToolRegistry, workspace: &Path) {
    let workspace = workspace.to_path_buf();
    registry.register(Arc::new(ReadFile {
        workspace: workspace.clone(),
    }));
    registry.register(Arc::new(WriteFile {
        workspace: workspace.clone(),
    }));
    registry.register(Arc::new(ListDirectory {
        workspace: workspace.clone(),
    }));
    registry.register(Arc::new(RunShellCommand { workspace }));
}

fn invalid_args(tool: &str, detail: impl Into<String>) -> ToolError {
    ToolError::InvalidArgs {
        tool: tool.to_string(),
        detail: detail.into(),
    }
}

fn execution(tool: &str, detail: impl std::fmt::Display) -> ToolError {
    ToolError::Execution {
        tool: tool.to_string(),
        detail: detail.to_string(),
    }
}

fn required_str<'a>(tool: &str, args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| invalid_args(tool, format!("'{key}' argument is required")))
}

/// Resolve a workspace-relative path, rejecting escapes.
fn resolve(tool: &str, workspace: &Path, rel: &str) -> Result<PathBuf, ToolError> {
    let rel_path = Path::new(rel);
    if rel_path.is_absolute() {
        return Err(invalid_args(tool, "absolute paths are not allowed"));
    }
    if rel_path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(invalid_args(tool, "'..' path components are not allowed"));
    }
    Ok(workspace.join(rel_path))
}

pub struct ReadFile {
    workspace: PathBuf,
}

impl ToolHandler for ReadFile {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            "read_file",
            "Read a text file from the workspace.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Workspace-relative file path"},
                    "max_bytes": {"type": "integer", "description": "Byte cap (default 1MB)"}
                },
                "required": ["path"]
            }),
        )
    }

    fn invoke(&self, args: &Value) -> Result<Value, ToolError> {
        let path = required_str("read_file", args, "path")?;
        let full = resolve("read_file", &self.workspace, path)?;
        let max_bytes = args
            .get("max_bytes")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(READ_MAX_BYTES_DEFAULT);

        let bytes = std::fs::read(&full).map_err(|e| execution("read_file", e))?;
        let truncated = bytes.len() > max_bytes;
        let slice = if truncated { &bytes[..max_bytes] } else { &bytes };
        let content = String::from_utf8_lossy(slice).to_string();
        Ok(json!({
            "path": path,
            "content": content,
            "truncated": truncated,
        }))
    }
}

pub struct WriteFile {
    workspace: PathBuf,
}

impl ToolHandler for WriteFile {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            "write_file",
            "Write content to a workspace file, creating parent directories.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["path", "content"]
            }),
        )
    }

    fn invoke(&self, args: &Value) -> Result<Value, ToolError> {
        let path = required_str("write_file", args, "path")?;
        let content = required_str("write_file", args, "content")?;
        let full = resolve("write_file", &self.workspace, path)?;
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|e| execution("write_file", e))?;
        }
        std::fs::write(&full, content).map_err(|e| execution("write_file", e))?;
        Ok(json!({"path": path, "bytes_written": content.len()}))
    }
}

pub struct ListDirectory {
    workspace: PathBuf,
}

impl ToolHandler for ListDirectory {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            "list_directory",
            "List entries of a workspace directory (single level).",
            json!({
                "type": "object",
                "properties": {
                    "dir": {"type": "string", "description": "Workspace-relative directory (default '.')"}
                }
            }),
        )
    }

    fn invoke(&self, args: &Value) -> Result<Value, ToolError> {
        let dir = args.get("dir").and_then(|v| v.as_str()).unwrap_or(".");
        let full = resolve("list_directory", &self.workspace, dir)?;
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&full).map_err(|e| execution("list_directory", e))? {
            let entry = entry.map_err(|e| execution("list_directory", e))?;
            entries.push(entry.file_name().to_string_lossy().to_string());
        }
        entries.sort();
        Ok(json!({"dir": dir, "entries": entries}))
    }
}

pub struct RunShellCommand {
    workspace: PathBuf,
}

impl ToolHandler for RunShellCommand {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            "run_shell_command",
            "Run a shell command in the workspace and capture its output.",
            json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "timeout_secs": {"type": "integer", "description": "Kill after this many seconds (default 120)"}
                },
                "required": ["command"]
            }),
        )
    }

    fn invoke(&self, args: &Value) -> Result<Value, ToolError> {
        let command = required_str("run_shell_command", args, "command")?;
        let timeout = Duration::from_secs(
            args.get("timeout_secs")
                .and_then(|v| v.as_u64())
                .unwrap_or(SHELL_TIMEOUT_SECONDS_DEFAULT),
        );

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| execution("run_shell_command", e))?;

        let status = child
            .wait_timeout(timeout)
            .map_err(|e| execution("run_shell_command", e))?;

        let Some(status) = status else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(execution(
                "run_shell_command",
                format!("timed out after {}s", timeout.as_secs()),
            ));
        };

        let mut stdout = String::new();
        let mut stderr = String::new();
        if let Some(mut out) = child.stdout.take() {
            let _ = out.read_to_string(&mut stdout);
        }
        if let Some(mut err) = child.stderr.take() {
            let _ = err.read_to_string(&mut stderr);
        }

        Ok(json!({
            "exit_code": status.code(),
            "stdout": stdout,
            "stderr": stderr,
        }))
    }
}
