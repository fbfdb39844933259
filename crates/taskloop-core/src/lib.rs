//! Shared data model for the taskloop agent runtime.
//!
//! Everything that crosses a crate boundary lives here: conversation
//! messages, tool-call requests/results, the three-way turn
//! classification, termination reasons, and run state.

mod config;

pub use config::{AppConfig, LlmConfig, LoopConfig};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = anyhow::Result<T>;

/// Reserved tool name intercepted by the dispatcher to end a run.
pub const COMPLETE_TASK_TOOL_NAME: &str = "complete_task";

/// System-prompt suffix that teaches the model the termination protocol.
pub const COMPLETION_PROTOCOL_PROMPT: &str = "\
## Task Completion Protocol

CRITICAL: You MUST follow this protocol to complete any task:

1. When you have finished your work and have a final answer, you MUST call the `complete_task` tool.
2. The `complete_task` tool requires a `result` argument containing your comprehensive findings.
3. This is the ONLY way to properly finish a task. Failure to call `complete_task` is a protocol violation.
4. Do NOT stop responding without calling `complete_task`.
5. After calling `complete_task`, do NOT call any other tools.";

// ── Conversation ─────────────────────────────────────────────────────────────

/// A message in the append-only conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum ChatMessage {
    #[serde(rename = "system")]
    System { content: String },
    #[serde(rename = "user")]
    User { content: String },
    #[serde(rename = "assistant")]
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        content: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        tool_calls: Vec<ToolCallRequest>,
    },
    #[serde(rename = "tool")]
    Tool {
        tool_call_id: String,
        content: String,
    },
}

/// Rough token estimate: ~4 chars per token. Good enough for the
/// compaction trigger; callers needing accuracy plug in a tokenizer.
pub fn estimate_tokens(messages: &[ChatMessage]) -> u64 {
    let chars: usize = messages
        .iter()
        .map(|m| match m {
            ChatMessage::System { content } | ChatMessage::User { content } => content.len(),
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                content.as_deref().map_or(0, str::len)
                    + tool_calls
                        .iter()
                        .map(|c| c.name.len() + c.arguments.len())
                        .sum::<usize>()
            }
            ChatMessage::Tool { content, .. } => content.len(),
        })
        .sum();
    (chars / 4) as u64
}

// ── Tool calls ───────────────────────────────────────────────────────────────

/// A single tool call requested by the model. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments exactly as the model produced them.
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn is_completion(&self) -> bool {
        self.name == COMPLETE_TASK_TOOL_NAME
    }

    /// Parse the raw arguments, defaulting to an empty object when the
    /// model emitted malformed JSON.
    pub fn parsed_arguments(&self) -> serde_json::Value {
        serde_json::from_str(&self.arguments).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// Why a tool call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    UnknownTool,
    InvalidArgs,
    Execution,
    Blocked,
}

/// Outcome of one tool call: a payload, or a structured failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { payload: serde_json::Value },
    Failure { kind: ToolFailureKind, detail: String },
}

/// Result of one tool call, keyed back to the request id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub request_id: String,
    pub outcome: ToolOutcome,
}

impl ToolCallResult {
    pub fn success(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            request_id: request_id.into(),
            outcome: ToolOutcome::Success { payload },
        }
    }

    pub fn failure(
        request_id: impl Into<String>,
        kind: ToolFailureKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            outcome: ToolOutcome::Failure {
                kind,
                detail: detail.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success { .. })
    }

    /// Render as the transcript message the model sees on the next turn.
    pub fn to_message(&self) -> ChatMessage {
        let content = match &self.outcome {
            ToolOutcome::Success { payload } => payload
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| payload.to_string()),
            ToolOutcome::Failure { kind, detail } => {
                format!("Error ({kind:?}): {detail}")
            }
        };
        ChatMessage::Tool {
            tool_call_id: self.request_id.clone(),
            content,
        }
    }
}

/// Tool-level failures. Caught per call and converted into a `failure`
/// `ToolCallResult`, never propagated as a process-level fault.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments for {tool}: {detail}")]
    InvalidArgs { tool: String, detail: String },
    #[error("{tool} failed: {detail}")]
    Execution { tool: String, detail: String },
}

impl ToolError {
    pub fn failure_kind(&self) -> ToolFailureKind {
        match self {
            Self::UnknownTool(_) => ToolFailureKind::UnknownTool,
            Self::InvalidArgs { .. } => ToolFailureKind::InvalidArgs,
            Self::Execution { .. } => ToolFailureKind::Execution,
        }
    }
}

// ── Tool definitions (sent to the model) ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// The reserved completion tool. Its `result` argument becomes the
/// run's final payload verbatim.
pub fn complete_task_definition() -> ToolDefinition {
    ToolDefinition::function(
        COMPLETE_TASK_TOOL_NAME,
        "Call this tool to submit your final answer and complete the task. \
         This is the ONLY way to finish. You MUST call this tool when your \
         task is done. Provide comprehensive results in the 'result' argument.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "result": {
                    "type": "string",
                    "description": "Your final results or findings to return. \
                        Ensure this is comprehensive and follows any formatting \
                        requested in your instructions."
                }
            },
            "required": ["result"]
        }),
    )
}

/// Extract the final payload from a completion request: the declared
/// `result` field verbatim, or the empty string when absent.
pub fn completion_payload(request: &ToolCallRequest) -> String {
    request
        .parsed_arguments()
        .get("result")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

// ── Model response & classification ──────────────────────────────────────────

/// One model response: free text plus zero or more tool-call requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelResponse {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ModelResponse {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            text: String::new(),
            tool_calls,
        }
    }

    pub fn classify(&self) -> Classification {
        classify(&self.tool_calls)
    }
}

/// Three-way categorization of a turn's tool-call requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// No requests at all — a protocol violation.
    Empty,
    /// One or more non-completion requests.
    Ordinary,
    /// A completion request present, with or without ordinary requests.
    Completing,
}

pub fn classify(requests: &[ToolCallRequest]) -> Classification {
    if requests.is_empty() {
        Classification::Empty
    } else if requests.iter().any(ToolCallRequest::is_completion) {
        Classification::Completing
    } else {
        Classification::Ordinary
    }
}

// ── Termination & run state ──────────────────────────────────────────────────

/// Exactly one of these is attached to the final outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum TerminationReason {
    /// The completion tool was invoked and accepted.
    Goal,
    /// The model stopped emitting tool calls and recovery failed.
    NoCompleteTaskCall,
    MaxTurns,
    Timeout,
    Error(String),
}

impl TerminationReason {
    pub fn is_goal(&self) -> bool {
        matches!(self, Self::Goal)
    }

    /// Human-readable explanation of which protocol step failed.
    pub fn detail(&self) -> String {
        match self {
            Self::Goal => "task completed via complete_task".to_string(),
            Self::NoCompleteTaskCall => {
                "model stopped responding without calling complete_task".to_string()
            }
            Self::MaxTurns => "turn budget exhausted before complete_task was called".to_string(),
            Self::Timeout => "wall-clock budget exhausted before complete_task was called".to_string(),
            Self::Error(detail) => detail.clone(),
        }
    }
}

/// Per-run counters threaded through each turn. Owned by the recovery
/// manager; `terminal` transitions false→true exactly once.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub turns: usize,
    pub consecutive_violations: usize,
    pub elapsed: std::time::Duration,
    pub terminal: bool,
    pub reason: Option<TerminationReason>,
}

impl RunState {
    /// Mark the run terminal. The first call wins; later calls are ignored
    /// so the attached reason never reverts.
    pub fn finish(&mut self, reason: TerminationReason) {
        if !self.terminal {
            self.terminal = true;
            self.reason = Some(reason);
        }
    }
}

/// Final result surface of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: uuid::Uuid,
    #[serde(flatten)]
    pub reason: TerminationReason,
    /// Present iff `reason` is `Goal`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    pub turns_executed: usize,
    pub elapsed_ms: u64,
}
