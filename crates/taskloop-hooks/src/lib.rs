//! Five-phase hook pipeline.
//!
//! Each phase holds an ordered list of trait objects. A hook returns one
//! of pass (context unchanged), modify (context replaced, remaining hooks
//! still run), or a phase-specific short-circuit that stops the pipeline
//! and skips the phase's default action. Hooks see conversation state
//! only through the context they are given; the pipeline is the single
//! auditable mutation path per phase.

mod compact;

pub use compact::{CompactContext, CompactContextConfig};

use std::sync::Arc;
use taskloop_core::{ChatMessage, ModelResponse, RunOutcome, ToolCallRequest, ToolCallResult};

// ── Phase actions ────────────────────────────────────────────────────────────

pub enum BeforeModelAction {
    Pass,
    /// Replace the conversation the model will see this turn.
    Modify(Vec<ChatMessage>),
    /// Skip the real model invocation and use this response instead.
    Synthetic(ModelResponse),
}

pub enum AfterModelAction {
    Pass,
    /// Rewrite the response (e.g. strip requests, inject a synthetic
    /// completion request). There is no direct path to the run's final
    /// result: a hook that wants to finalize must inject a completion
    /// request and let the dispatcher process it uniformly.
    Modify(ModelResponse),
    /// Rewrite and stop running the remaining after-model hooks.
    Final(ModelResponse),
}

pub enum BeforeToolAction {
    Pass,
    /// Rewrite the pending request list.
    Modify(Vec<ToolCallRequest>),
    /// Skip tool execution entirely; the reason is reported back to the
    /// model as a failure result per pending request.
    Block(String),
}

pub enum AfterToolAction {
    Pass,
    /// Rewrite the result list before it is appended to the transcript.
    Modify(Vec<ToolCallResult>),
}

pub enum AfterAgentAction {
    Pass,
    /// Rewrite the final outcome value. The run is already terminal;
    /// this cannot resume the loop.
    Modify(RunOutcome),
}

// ── Phase traits ─────────────────────────────────────────────────────────────

pub trait BeforeModelHook: Send + Sync {
    fn on_before_model(&self, conversation: &[ChatMessage]) -> BeforeModelAction;
}

pub trait AfterModelHook: Send + Sync {
    fn on_after_model(&self, response: &ModelResponse) -> AfterModelAction;
}

pub trait BeforeToolHook: Send + Sync {
    fn on_before_tool(&self, pending: &[ToolCallRequest]) -> BeforeToolAction;
}

pub trait AfterToolHook: Send + Sync {
    fn on_after_tool(&self, results: &[ToolCallResult]) -> AfterToolAction;
}

pub trait AfterAgentHook: Send + Sync {
    fn on_after_agent(&self, outcome: &RunOutcome) -> AfterAgentAction;
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

/// Outcome of the before-tool phase.
pub enum ToolGate {
    Proceed(Vec<ToolCallRequest>),
    Blocked(String),
}

/// Ordered hook lists for all five phases.
#[derive(Default, Clone)]
pub struct HookPipeline {
    before_model: Vec<Arc<dyn BeforeModelHook>>,
    after_model: Vec<Arc<dyn AfterModelHook>>,
    before_tool: Vec<Arc<dyn BeforeToolHook>>,
    after_tool: Vec<Arc<dyn AfterToolHook>>,
    after_agent: Vec<Arc<dyn AfterAgentHook>>,
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_before_model(&mut self, hook: Arc<dyn BeforeModelHook>) -> &mut Self {
        self.before_model.push(hook);
        self
    }

    pub fn add_after_model(&mut self, hook: Arc<dyn AfterModelHook>) -> &mut Self {
        self.after_model.push(hook);
        self
    }

    pub fn add_before_tool(&mut self, hook: Arc<dyn BeforeToolHook>) -> &mut Self {
        self.before_tool.push(hook);
        self
    }

    pub fn add_after_tool(&mut self, hook: Arc<dyn AfterToolHook>) -> &mut Self {
        self.after_tool.push(hook);
        self
    }

    pub fn add_after_agent(&mut self, hook: Arc<dyn AfterAgentHook>) -> &mut Self {
        self.after_agent.push(hook);
        self
    }

    /// Run the before-model phase. Mutates the conversation in place and
    /// returns a synthetic response if a hook short-circuited the real
    /// model invocation.
    pub fn run_before_model(&self, conversation: &mut Vec<ChatMessage>) -> Option<ModelResponse> {
        for hook in &self.before_model {
            match hook.on_before_model(conversation) {
                BeforeModelAction::Pass => {}
                BeforeModelAction::Modify(updated) => *conversation = updated,
                BeforeModelAction::Synthetic(response) => return Some(response),
            }
        }
        None
    }

    pub fn run_after_model(&self, mut response: ModelResponse) -> ModelResponse {
        for hook in &self.after_model {
            match hook.on_after_model(&response) {
                AfterModelAction::Pass => {}
                AfterModelAction::Modify(updated) => response = updated,
                AfterModelAction::Final(updated) => return updated,
            }
        }
        response
    }

    pub fn run_before_tool(&self, mut pending: Vec<ToolCallRequest>) -> ToolGate {
        for hook in &self.before_tool {
            match hook.on_before_tool(&pending) {
                BeforeToolAction::Pass => {}
                BeforeToolAction::Modify(updated) => pending = updated,
                BeforeToolAction::Block(reason) => return ToolGate::Blocked(reason),
            }
        }
        ToolGate::Proceed(pending)
    }

    pub fn run_after_tool(&self, mut results: Vec<ToolCallResult>) -> Vec<ToolCallResult> {
        for hook in &self.after_tool {
            match hook.on_after_tool(&results) {
                AfterToolAction::Pass => {}
                AfterToolAction::Modify(updated) => results = updated,
            }
        }
        results
    }

    pub fn run_after_agent(&self, mut outcome: RunOutcome) -> RunOutcome {
        for hook in &self.after_agent {
            match hook.on_after_agent(&outcome) {
                AfterAgentAction::Pass => {}
                AfterAgentAction::Modify(updated) => outcome = updated,
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use taskloop_core::{COMPLETE_TASK_TOOL_NAME, Classification};

    struct InjectUser(&'static str);
    impl BeforeModelHook for InjectUser {
        fn on_before_model(&self, conversation: &[ChatMessage]) -> BeforeModelAction {
            let mut updated = conversation.to_vec();
            updated.push(ChatMessage::User {
                content: self.0.to_string(),
            });
            BeforeModelAction::Modify(updated)
        }
    }

    struct ShortCircuit;
    impl BeforeModelHook for ShortCircuit {
        fn on_before_model(&self, _: &[ChatMessage]) -> BeforeModelAction {
            BeforeModelAction::Synthetic(ModelResponse::text_only("synthetic"))
        }
    }

    struct CountCalls(AtomicUsize);
    impl BeforeModelHook for CountCalls {
        fn on_before_model(&self, _: &[ChatMessage]) -> BeforeModelAction {
            self.0.fetch_add(1, Ordering::SeqCst);
            BeforeModelAction::Pass
        }
    }

    #[test]
    fn modify_chains_in_registration_order() {
        let mut pipeline = HookPipeline::new();
        pipeline.add_before_model(Arc::new(InjectUser("first")));
        pipeline.add_before_model(Arc::new(InjectUser("second")));

        let mut conversation = vec![ChatMessage::System {
            content: "sys".to_string(),
        }];
        assert!(pipeline.run_before_model(&mut conversation).is_none());
        assert_eq!(conversation.len(), 3);
        match (&conversation[1], &conversation[2]) {
            (ChatMessage::User { content: a }, ChatMessage::User { content: b }) => {
                assert_eq!(a, "first");
                assert_eq!(b, "second");
            }
            other => panic!("unexpected transcript: {other:?}"),
        }
    }

    #[test]
    fn synthetic_response_skips_remaining_hooks() {
        let counter = Arc::new(CountCalls(AtomicUsize::new(0)));
        let mut pipeline = HookPipeline::new();
        pipeline.add_before_model(Arc::new(ShortCircuit));
        pipeline.add_before_model(counter.clone());

        let mut conversation = Vec::new();
        let synthetic = pipeline.run_before_model(&mut conversation).unwrap();
        assert_eq!(synthetic.text, "synthetic");
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    struct ForceCompletion;
    impl AfterModelHook for ForceCompletion {
        fn on_after_model(&self, response: &ModelResponse) -> AfterModelAction {
            let mut updated = response.clone();
            updated.tool_calls = vec![ToolCallRequest::new(
                "hook_0",
                COMPLETE_TASK_TOOL_NAME,
                r#"{"result":"forced"}"#,
            )];
            AfterModelAction::Modify(updated)
        }
    }

    #[test]
    fn after_model_hook_finalizes_by_injecting_completion() {
        let mut pipeline = HookPipeline::new();
        pipeline.add_after_model(Arc::new(ForceCompletion));

        let rewritten = pipeline.run_after_model(ModelResponse::text_only("rambling"));
        assert_eq!(rewritten.classify(), Classification::Completing);
    }

    struct BlockAll;
    impl BeforeToolHook for BlockAll {
        fn on_before_tool(&self, _: &[ToolCallRequest]) -> BeforeToolAction {
            BeforeToolAction::Block("policy says no".to_string())
        }
    }

    #[test]
    fn before_tool_block_short_circuits() {
        let mut pipeline = HookPipeline::new();
        pipeline.add_before_tool(Arc::new(BlockAll));
        let pending = vec![ToolCallRequest::new("1", "read_file", "{}")];
        match pipeline.run_before_tool(pending) {
            ToolGate::Blocked(reason) => assert_eq!(reason, "policy says no"),
            ToolGate::Proceed(_) => panic!("expected block"),
        }
    }

    #[test]
    fn empty_pipeline_passes_everything_through() {
        let pipeline = HookPipeline::new();
        let mut conversation = vec![ChatMessage::User {
            content: "q".to_string(),
        }];
        assert!(pipeline.run_before_model(&mut conversation).is_none());
        assert_eq!(conversation.len(), 1);

        let response = pipeline.run_after_model(ModelResponse::text_only("a"));
        assert_eq!(response.text, "a");
    }
}
