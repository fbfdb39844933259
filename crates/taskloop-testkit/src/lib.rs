//! Test doubles shared by the workspace's protocol tests: a scripted
//! model, a model that never answers, and spy tool handlers.

use anyhow::{Result, anyhow};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskloop_core::{
    COMPLETE_TASK_TOOL_NAME, ChatMessage, ModelResponse, ToolCallRequest, ToolDefinition, ToolError,
};
use taskloop_llm::ModelClient;
use taskloop_tools::ToolHandler;

/// A model that replays a fixed response sequence and counts invocations.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<ModelResponse>>,
    invocations: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from(responses)),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl ModelClient for ScriptedModel {
    fn invoke(&self, _: &[ChatMessage], _: &[ToolDefinition]) -> Result<ModelResponse> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .expect("scripted responses lock")
            .pop_front()
            .ok_or_else(|| anyhow!("no more scripted responses"))
    }
}

/// A model whose invocation blocks far longer than any grace period.
pub struct StalledModel {
    pub stall: Duration,
}

impl ModelClient for StalledModel {
    fn invoke(&self, _: &[ChatMessage], _: &[ToolDefinition]) -> Result<ModelResponse> {
        std::thread::sleep(self.stall);
        Ok(ModelResponse::text_only("too late"))
    }
}

/// A model that always fails, for `TerminationReason::Error` paths.
pub struct FailingModel;

impl ModelClient for FailingModel {
    fn invoke(&self, _: &[ChatMessage], _: &[ToolDefinition]) -> Result<ModelResponse> {
        Err(anyhow!("provider unavailable"))
    }
}

/// Tool handler that records how often it ran and returns a fixed payload.
pub struct SpyHandler {
    name: String,
    payload: serde_json::Value,
    invocations: Arc<AtomicUsize>,
}

impl SpyHandler {
    pub fn new(name: &str) -> (Arc<Self>, Arc<AtomicUsize>) {
        let invocations = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(Self {
            name: name.to_string(),
            payload: serde_json::json!({"ok": true}),
            invocations: invocations.clone(),
        });
        (handler, invocations)
    }
}

impl ToolHandler for SpyHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            self.name.as_str(),
            "test spy",
            serde_json::json!({"type": "object"}),
        )
    }

    fn invoke(&self, _: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(self.payload.clone())
    }
}

// ── Response shorthands ──────────────────────────────────────────────────────

/// A response with no tool calls at all (a protocol violation).
pub fn empty_response() -> ModelResponse {
    ModelResponse::text_only("thinking out loud")
}

/// A response calling the named ordinary tools in order.
pub fn ordinary_response(tools: &[&str]) -> ModelResponse {
    ModelResponse::with_calls(
        tools
            .iter()
            .enumerate()
            .map(|(i, name)| ToolCallRequest::new(format!("call_{i}"), *name, "{}"))
            .collect(),
    )
}

/// A response calling `complete_task` with the given result payload.
pub fn completing_response(result: &str) -> ModelResponse {
    ModelResponse::with_calls(vec![ToolCallRequest::new(
        "call_done",
        COMPLETE_TASK_TOOL_NAME,
        serde_json::json!({ "result": result }).to_string(),
    )])
}

/// A completion call whose arguments omit the `result` field.
pub fn completing_with_no_result() -> ModelResponse {
    ModelResponse::with_calls(vec![ToolCallRequest::new(
        "call_done",
        COMPLETE_TASK_TOOL_NAME,
        "{}",
    )])
}

/// A response asking to both act and complete in the same turn.
pub fn completing_with_side_effects(result: &str, tools: &[&str]) -> ModelResponse {
    let mut calls: Vec<ToolCallRequest> = tools
        .iter()
        .enumerate()
        .map(|(i, name)| ToolCallRequest::new(format!("call_{i}"), *name, "{}"))
        .collect();
    calls.push(ToolCallRequest::new(
        "call_done",
        COMPLETE_TASK_TOOL_NAME,
        serde_json::json!({ "result": result }).to_string(),
    ));
    ModelResponse::with_calls(calls)
}
