//! The run loop: drives turns under the recovery manager until the run
//! is terminal, then assembles the outcome.
//!
//! Turns execute on a worker thread so the loop can enforce wall-clock
//! and grace-period deadlines and react to cancellation while a model
//! invocation or tool batch is still in flight. A turn that outlives
//! its deadline is abandoned; its eventual result is dropped.

use crate::executor::{TurnExecutor, TurnMode, TurnReport};
use crate::recovery::{NextStep, RecoveryManager};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use taskloop_core::{
    ChatMessage, LoopConfig, Result, RunOutcome, COMPLETION_PROTOCOL_PROMPT,
};
use taskloop_hooks::HookPipeline;
use taskloop_observe::{Observer, RunEvent};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an autonomous agent. Use the available tools to accomplish the user's task.";

/// Cooperative cancellation flag, shared between the loop and callers.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum TurnWait {
    Completed(Result<(Vec<ChatMessage>, TurnReport)>),
    TimedOut,
    Cancelled,
}

pub struct AgentRunner {
    executor: TurnExecutor,
    cfg: LoopConfig,
    hooks: Arc<HookPipeline>,
    observer: Arc<Observer>,
    cancel: CancellationToken,
    system_prompt: String,
}

impl AgentRunner {
    pub fn new(
        executor: TurnExecutor,
        cfg: LoopConfig,
        hooks: Arc<HookPipeline>,
        observer: Arc<Observer>,
    ) -> Self {
        Self {
            executor,
            cfg,
            hooks,
            observer,
            cancel: CancellationToken::new(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// A handle callers can trip from another thread to stop the run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run to completion. Always returns an outcome; model and tool
    /// failures surface as `Error` terminations, not panics.
    pub fn run(&self, query: &str) -> RunOutcome {
        let started = Instant::now();
        let run_id = uuid::Uuid::new_v4();
        self.observer.record(&RunEvent::RunStarted {
            query: query.to_string(),
        });

        let mut conversation = vec![
            ChatMessage::System {
                content: format!("{}\n\n{}", self.system_prompt, COMPLETION_PROTOCOL_PROMPT),
            },
            ChatMessage::User {
                content: query.to_string(),
            },
        ];
        let mut manager = RecoveryManager::new(self.cfg.clone());
        let mut payload: Option<String> = None;

        let reason = loop {
            if self.cancel.is_cancelled() {
                manager.cancel();
            }
            match manager.next_step(started.elapsed()) {
                NextStep::Finished(reason) => break reason,
                NextStep::RunTurn => {
                    let turn = manager.state().turns + 1;
                    self.observer.record(&RunEvent::TurnStarted { turn });
                    let remaining = self
                        .cfg
                        .max_wall_clock()
                        .saturating_sub(started.elapsed());
                    match self.timed_turn(&conversation, TurnMode::Normal, remaining) {
                        TurnWait::Completed(Ok((updated, report))) => {
                            conversation = updated;
                            self.note_turn(turn, &report);
                            if report.completion_accepted {
                                payload = Some(report.payload.unwrap_or_default());
                            }
                            manager.on_turn(report.classification, report.completion_accepted);
                        }
                        TurnWait::Completed(Err(e)) => {
                            self.observer.warn(&format!("turn {turn} failed: {e:#}"));
                            manager.fail(format!("{e:#}"));
                        }
                        // The deadline was the wall-clock budget, so the
                        // next step resolves to the timeout path.
                        TurnWait::TimedOut => {}
                        TurnWait::Cancelled => manager.cancel(),
                    }
                }
                NextStep::RunWarningTurn { pending, message } => {
                    self.observer.record(&RunEvent::WarningIssued {
                        pending: pending.clone(),
                    });
                    conversation.push(ChatMessage::User { content: message });
                    let turn = manager.state().turns + 1;
                    match self.timed_turn(&conversation, TurnMode::Warning, self.cfg.grace_period())
                    {
                        TurnWait::Completed(Ok((updated, report))) => {
                            conversation = updated;
                            self.note_turn(turn, &report);
                            if report.completion_accepted {
                                payload = Some(report.payload.unwrap_or_default());
                            }
                            manager.resolve_warning(true, report.completion_accepted);
                        }
                        TurnWait::Completed(Err(e)) => {
                            self.observer
                                .warn(&format!("warning turn failed: {e:#}"));
                            manager.fail(format!("{e:#}"));
                        }
                        TurnWait::TimedOut => manager.resolve_warning(false, false),
                        TurnWait::Cancelled => manager.cancel(),
                    }
                }
            }
        };

        let outcome = RunOutcome {
            run_id,
            payload: if reason.is_goal() {
                Some(payload.unwrap_or_default())
            } else {
                None
            },
            turns_executed: manager.state().turns,
            elapsed_ms: started.elapsed().as_millis() as u64,
            reason,
        };
        self.observer.record(&RunEvent::RunFinished {
            reason: outcome.reason.clone(),
            turns: outcome.turns_executed,
        });
        self.hooks.run_after_agent(outcome)
    }

    fn note_turn(&self, turn: usize, report: &TurnReport) {
        self.observer.record(&RunEvent::TurnClassified {
            turn,
            classification: report.classification,
        });
        for (tool, success) in &report.tool_runs {
            self.observer.record(&RunEvent::ToolDispatched {
                turn,
                tool: tool.clone(),
                success: *success,
            });
        }
        if report.completion_accepted {
            self.observer.record(&RunEvent::CompletionIntercepted {
                turn,
                suppressed_calls: report.suppressed_calls,
            });
        }
    }

    /// Run one turn on a worker thread, polling for the deadline and
    /// cancellation. On timeout or cancel the worker keeps running
    /// detached and its result is discarded.
    fn timed_turn(
        &self,
        conversation: &[ChatMessage],
        mode: TurnMode,
        budget: Duration,
    ) -> TurnWait {
        let (tx, rx) = mpsc::channel();
        let executor = self.executor.clone();
        let snapshot = conversation.to_vec();
        thread::spawn(move || {
            let _ = tx.send(executor.run_turn(snapshot, mode));
        });

        let deadline = Instant::now() + budget;
        loop {
            if self.cancel.is_cancelled() {
                return TurnWait::Cancelled;
            }
            let now = Instant::now();
            if now >= deadline {
                return TurnWait::TimedOut;
            }
            let tick = (deadline - now).min(POLL_INTERVAL);
            match rx.recv_timeout(tick) {
                Ok(result) => return TurnWait::Completed(result),
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return TurnWait::Completed(Err(anyhow::anyhow!(
                        "turn worker exited without producing a result"
                    )));
                }
            }
        }
    }
}
