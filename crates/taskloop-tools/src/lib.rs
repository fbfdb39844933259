//! Tool registry and invoker.
//!
//! A `ToolHandler` is an opaque function from arguments to a JSON
//! payload. The invoker catches every handler failure and converts it
//! into a structured failure `ToolCallResult`; tool errors are
//! conversational, never process-level faults.

mod builtin;

pub use builtin::{ListDirectory, ReadFile, RunShellCommand, WriteFile, register_builtin};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use taskloop_core::{ToolCallRequest, ToolCallResult, ToolDefinition, ToolError, ToolFailureKind};

pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    fn invoke(&self, args: &serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

/// Named tool handlers, looked up per request.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    handlers: BTreeMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        self.handlers
            .insert(handler.definition().function.name.clone(), handler);
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn ToolHandler>, ToolError> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    /// Definitions for every registered tool, in name order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.handlers.values().map(|h| h.definition()).collect()
    }
}

/// Executes requested tool calls against the registry.
#[derive(Clone)]
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    /// Upper bound on worker threads for a single batch.
    max_workers: usize,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            max_workers: 4,
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Execute one request. Never panics and never propagates: every
    /// failure mode becomes a failure result the model sees next turn.
    pub fn invoke(&self, request: &ToolCallRequest) -> ToolCallResult {
        let args: serde_json::Value = match serde_json::from_str(&request.arguments) {
            Ok(v) => v,
            Err(e) => {
                return ToolCallResult::failure(
                    &request.id,
                    ToolFailureKind::InvalidArgs,
                    format!("arguments are not valid JSON: {e}"),
                );
            }
        };

        let handler = match self.registry.lookup(&request.name) {
            Ok(h) => h,
            Err(e) => {
                return ToolCallResult::failure(&request.id, e.failure_kind(), e.to_string());
            }
        };

        match handler.invoke(&args) {
            Ok(payload) => ToolCallResult::success(&request.id, payload),
            Err(e) => ToolCallResult::failure(&request.id, e.failure_kind(), e.to_string()),
        }
    }

    /// Execute a batch on a bounded worker pool. Results come back in
    /// the original request order regardless of completion order, so
    /// the transcript stays deterministic.
    pub fn invoke_all(&self, requests: &[ToolCallRequest]) -> Vec<ToolCallResult> {
        if requests.len() <= 1 || self.max_workers == 1 {
            return requests.iter().map(|r| self.invoke(r)).collect();
        }

        let next = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel::<(usize, ToolCallResult)>();
        let workers = self.max_workers.min(requests.len());

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let next = &next;
                scope.spawn(move || {
                    loop {
                        let i = next.fetch_add(1, Ordering::SeqCst);
                        if i >= requests.len() {
                            break;
                        }
                        let result = self.invoke(&requests[i]);
                        if tx.send((i, result)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(tx);

        let mut slots: Vec<Option<ToolCallResult>> = requests.iter().map(|_| None).collect();
        for (i, result) in rx {
            slots[i] = Some(result);
        }
        slots
            .into_iter()
            .zip(requests)
            .map(|(slot, request)| {
                slot.unwrap_or_else(|| {
                    ToolCallResult::failure(
                        &request.id,
                        ToolFailureKind::Execution,
                        "worker produced no result",
                    )
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    struct Echo;
    impl ToolHandler for Echo {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::function("echo", "echo args back", json!({"type": "object"}))
        }
        fn invoke(&self, args: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
            Ok(args.clone())
        }
    }

    struct Failing;
    impl ToolHandler for Failing {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::function("failing", "always fails", json!({"type": "object"}))
        }
        fn invoke(&self, _: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
            Err(ToolError::Execution {
                tool: "failing".to_string(),
                detail: "boom".to_string(),
            })
        }
    }

    /// Sleeps per the `ms` argument, so reversed delays exercise the
    /// out-of-order completion path.
    struct Sleepy;
    impl ToolHandler for Sleepy {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::function("sleepy", "sleep then echo idx", json!({"type": "object"}))
        }
        fn invoke(&self, args: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
            let ms = args.get("ms").and_then(|v| v.as_u64()).unwrap_or(0);
            std::thread::sleep(Duration::from_millis(ms));
            Ok(json!({"idx": args.get("idx").cloned().unwrap_or(json!(null))}))
        }
    }

    fn invoker() -> ToolInvoker {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        registry.register(Arc::new(Failing));
        registry.register(Arc::new(Sleepy));
        ToolInvoker::new(Arc::new(registry))
    }

    #[test]
    fn unknown_tool_becomes_failure_result() {
        let result = invoker().invoke(&ToolCallRequest::new("c1", "frob", "{}"));
        match result.outcome {
            taskloop_core::ToolOutcome::Failure { kind, detail } => {
                assert_eq!(kind, ToolFailureKind::UnknownTool);
                assert!(detail.contains("frob"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn malformed_arguments_become_invalid_args() {
        let result = invoker().invoke(&ToolCallRequest::new("c1", "echo", "{broken"));
        match result.outcome {
            taskloop_core::ToolOutcome::Failure { kind, .. } => {
                assert_eq!(kind, ToolFailureKind::InvalidArgs)
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn handler_error_is_contained() {
        let result = invoker().invoke(&ToolCallRequest::new("c1", "failing", "{}"));
        assert!(!result.is_success());
        assert_eq!(result.request_id, "c1");
    }

    #[test]
    fn batch_results_keep_request_order() {
        // Reverse the completion order: the first request sleeps longest.
        let requests: Vec<ToolCallRequest> = (0..3)
            .map(|i| {
                ToolCallRequest::new(
                    format!("c{i}"),
                    "sleepy",
                    format!(r#"{{"idx":{i},"ms":{}}}"#, (2 - i) * 40),
                )
            })
            .collect();

        let results = invoker().invoke_all(&requests);
        assert_eq!(results.len(), 3);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.request_id, format!("c{i}"));
            match &result.outcome {
                taskloop_core::ToolOutcome::Success { payload } => {
                    assert_eq!(payload["idx"], i)
                }
                other => panic!("expected success, got {other:?}"),
            }
        }
    }

    #[test]
    fn single_request_batch_runs_inline() {
        let results = invoker().invoke_all(&[ToolCallRequest::new("c0", "echo", r#"{"a":1}"#)]);
        assert_eq!(results.len(), 1);
        assert!(results[0].is_success());
    }
}
