//! One turn: hooks around a model invocation, classification, dispatch,
//! and transcript bookkeeping.
//!
//! The executor is a pure per-turn state transformer. It takes the
//! conversation by value and returns the updated transcript with a
//! report; retry and recovery policy live with the caller.

use crate::dispatcher::ToolCallDispatcher;
use std::sync::Arc;
use taskloop_core::{ChatMessage, Classification, ModelResponse, Result, ToolDefinition};
use taskloop_hooks::HookPipeline;
use taskloop_llm::ModelClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnMode {
    Normal,
    /// The final warning turn: only `complete_task` may execute.
    Warning,
}

/// What one turn did, for the loop driver.
#[derive(Debug)]
pub struct TurnReport {
    pub classification: Classification,
    pub completion_accepted: bool,
    pub payload: Option<String>,
    pub suppressed_calls: usize,
    /// (tool name, success) per executed request, for observability.
    pub tool_runs: Vec<(String, bool)>,
}

#[derive(Clone)]
pub struct TurnExecutor {
    model: Arc<dyn ModelClient>,
    hooks: Arc<HookPipeline>,
    dispatcher: ToolCallDispatcher,
    tools: Vec<ToolDefinition>,
}

impl TurnExecutor {
    pub fn new(
        model: Arc<dyn ModelClient>,
        hooks: Arc<HookPipeline>,
        dispatcher: ToolCallDispatcher,
        tools: Vec<ToolDefinition>,
    ) -> Self {
        Self {
            model,
            hooks,
            dispatcher,
            tools,
        }
    }

    /// Run one turn. A model-invocation failure propagates as an error
    /// without retry; the caller decides what it means for the run.
    pub fn run_turn(
        &self,
        mut conversation: Vec<ChatMessage>,
        mode: TurnMode,
    ) -> Result<(Vec<ChatMessage>, TurnReport)> {
        // Phase: before-model. A hook may supply a synthetic response,
        // skipping the real invocation.
        let synthetic = self.hooks.run_before_model(&mut conversation);
        let response = match synthetic {
            Some(response) => response,
            None => self.model.invoke(&conversation, &self.tools)?,
        };

        // Phase: after-model. Hooks may rewrite the request sequence;
        // finalizing is only possible by injecting a completion request.
        let response = self.hooks.run_after_model(response);
        let classification = response.classify();

        conversation.push(assistant_message(&response));

        let outcome = self.dispatcher.dispatch(
            classification,
            &response.tool_calls,
            mode == TurnMode::Warning,
        );

        let mut tool_runs = Vec::with_capacity(outcome.results.len());
        for result in &outcome.results {
            let name = response
                .tool_calls
                .iter()
                .find(|r| r.id == result.request_id)
                .map(|r| r.name.clone())
                .unwrap_or_default();
            tool_runs.push((name, result.is_success()));
            conversation.push(result.to_message());
        }

        Ok((
            conversation,
            TurnReport {
                classification,
                completion_accepted: outcome.completion_accepted,
                payload: outcome.payload,
                suppressed_calls: outcome.suppressed_calls,
                tool_runs,
            },
        ))
    }
}

fn assistant_message(response: &ModelResponse) -> ChatMessage {
    ChatMessage::Assistant {
        content: if response.text.is_empty() {
            None
        } else {
            Some(response.text.clone())
        },
        tool_calls: response.tool_calls.clone(),
    }
}
