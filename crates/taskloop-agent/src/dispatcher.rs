//! Decides which requested tool calls actually run.
//!
//! The completion tool is intercepted here: it is never handed to the
//! invoker, and any ordinary calls co-requested in the same response are
//! discarded unexecuted. Completion is exclusive and authoritative
//! within its turn.

use std::sync::Arc;
use taskloop_core::{
    Classification, ToolCallRequest, ToolCallResult, ToolFailureKind, completion_payload,
};
use taskloop_hooks::{HookPipeline, ToolGate};
use taskloop_tools::ToolInvoker;

/// What a dispatch produced.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// Results in original request order, one per executed (or blocked)
    /// request.
    pub results: Vec<ToolCallResult>,
    pub completion_accepted: bool,
    /// The completion request's declared `result` field, verbatim.
    pub payload: Option<String>,
    /// Ordinary requests discarded without execution.
    pub suppressed_calls: usize,
}

#[derive(Clone)]
pub struct ToolCallDispatcher {
    invoker: ToolInvoker,
    hooks: Arc<HookPipeline>,
}

impl ToolCallDispatcher {
    pub fn new(invoker: ToolInvoker, hooks: Arc<HookPipeline>) -> Self {
        Self { invoker, hooks }
    }

    /// Dispatch one classified response. `completion_only` is set during
    /// the final warning turn, where ordinary calls are not executed.
    pub fn dispatch(
        &self,
        classification: Classification,
        requests: &[ToolCallRequest],
        completion_only: bool,
    ) -> DispatchOutcome {
        match classification {
            Classification::Empty => DispatchOutcome::default(),
            Classification::Completing => self.intercept_completion(requests),
            Classification::Ordinary => {
                if completion_only {
                    return DispatchOutcome {
                        suppressed_calls: requests.len(),
                        ..DispatchOutcome::default()
                    };
                }
                self.run_ordinary(requests)
            }
        }
    }

    fn intercept_completion(&self, requests: &[ToolCallRequest]) -> DispatchOutcome {
        // classify() guarantees a completion request is present.
        let Some(completion) = requests.iter().find(|r| r.is_completion()) else {
            return DispatchOutcome::default();
        };
        DispatchOutcome {
            results: vec![ToolCallResult::success(
                &completion.id,
                serde_json::json!({"status": "task completed"}),
            )],
            completion_accepted: true,
            payload: Some(completion_payload(completion)),
            suppressed_calls: requests.len() - 1,
        }
    }

    fn run_ordinary(&self, requests: &[ToolCallRequest]) -> DispatchOutcome {
        let pending = match self.hooks.run_before_tool(requests.to_vec()) {
            ToolGate::Proceed(pending) => pending,
            ToolGate::Blocked(reason) => {
                // Mirror the denial back to the model per request so it
                // can try a different approach next turn.
                let results = requests
                    .iter()
                    .map(|r| {
                        ToolCallResult::failure(
                            &r.id,
                            ToolFailureKind::Blocked,
                            format!("tool call blocked by hook: {reason}"),
                        )
                    })
                    .collect();
                return DispatchOutcome {
                    results,
                    ..DispatchOutcome::default()
                };
            }
        };

        let results = self.invoker.invoke_all(&pending);
        let results = self.hooks.run_after_tool(results);
        DispatchOutcome {
            results,
            ..DispatchOutcome::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use taskloop_core::{COMPLETE_TASK_TOOL_NAME, classify};
    use taskloop_tools::ToolRegistry;

    fn spy_dispatcher(
        tool: &str,
    ) -> (ToolCallDispatcher, std::sync::Arc<std::sync::atomic::AtomicUsize>) {
        let (handler, count) = taskloop_testkit::SpyHandler::new(tool);
        let mut registry = ToolRegistry::new();
        registry.register(handler);
        let invoker = ToolInvoker::new(Arc::new(registry));
        (
            ToolCallDispatcher::new(invoker, Arc::new(HookPipeline::new())),
            count,
        )
    }

    fn completion(result: &str) -> ToolCallRequest {
        ToolCallRequest::new(
            "done",
            COMPLETE_TASK_TOOL_NAME,
            serde_json::json!({ "result": result }).to_string(),
        )
    }

    #[test]
    fn completion_is_intercepted_not_executed() {
        let (dispatcher, count) = spy_dispatcher("probe");
        let requests = vec![completion("42")];
        let outcome = dispatcher.dispatch(classify(&requests), &requests, false);
        assert!(outcome.completion_accepted);
        assert_eq!(outcome.payload.as_deref(), Some("42"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn co_requested_ordinary_calls_are_discarded() {
        let (dispatcher, count) = spy_dispatcher("probe");
        let requests = vec![
            ToolCallRequest::new("c0", "probe", "{}"),
            ToolCallRequest::new("c1", "probe", "{}"),
            completion("done"),
        ];
        let outcome = dispatcher.dispatch(classify(&requests), &requests, false);
        assert!(outcome.completion_accepted);
        assert_eq!(outcome.suppressed_calls, 2);
        assert_eq!(count.load(Ordering::SeqCst), 0, "spy must never run");
    }

    #[test]
    fn ordinary_calls_run_in_request_order() {
        let (dispatcher, count) = spy_dispatcher("probe");
        let requests = vec![
            ToolCallRequest::new("c0", "probe", "{}"),
            ToolCallRequest::new("c1", "probe", "{}"),
        ];
        let outcome = dispatcher.dispatch(classify(&requests), &requests, false);
        assert!(!outcome.completion_accepted);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].request_id, "c0");
        assert_eq!(outcome.results[1].request_id, "c1");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn warning_turn_suppresses_ordinary_execution() {
        let (dispatcher, count) = spy_dispatcher("probe");
        let requests = vec![ToolCallRequest::new("c0", "probe", "{}")];
        let outcome = dispatcher.dispatch(classify(&requests), &requests, true);
        assert_eq!(outcome.suppressed_calls, 1);
        assert!(outcome.results.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_dispatch_is_a_no_op() {
        let (dispatcher, _) = spy_dispatcher("probe");
        let outcome = dispatcher.dispatch(classify(&[]), &[], false);
        assert!(!outcome.completion_accepted);
        assert!(outcome.results.is_empty());
    }

    #[test]
    fn blocked_hook_denies_every_pending_request() {
        struct DenyAll;
        impl taskloop_hooks::BeforeToolHook for DenyAll {
            fn on_before_tool(
                &self,
                _: &[ToolCallRequest],
            ) -> taskloop_hooks::BeforeToolAction {
                taskloop_hooks::BeforeToolAction::Block("read-only session".to_string())
            }
        }

        let (handler, count) = taskloop_testkit::SpyHandler::new("probe");
        let mut registry = ToolRegistry::new();
        registry.register(handler);
        let mut hooks = HookPipeline::new();
        hooks.add_before_tool(Arc::new(DenyAll));
        let dispatcher =
            ToolCallDispatcher::new(ToolInvoker::new(Arc::new(registry)), Arc::new(hooks));

        let requests = vec![
            ToolCallRequest::new("c0", "probe", "{}"),
            ToolCallRequest::new("c1", "probe", "{}"),
        ];
        let outcome = dispatcher.dispatch(classify(&requests), &requests, false);
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.results.iter().all(|r| !r.is_success()));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
