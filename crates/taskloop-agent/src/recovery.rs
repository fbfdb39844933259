//! Recovery state machine: Running → Warning → Terminal.
//!
//! Tracks consecutive protocol violations and the turn/time budgets.
//! Every recoverable termination cause goes through the same mechanism:
//! one warning injection, one bounded extra turn, then terminal. The
//! manager is a pure state machine over `RunState`; the loop driver
//! supplies elapsed time and turn outcomes.

use std::time::Duration;
use taskloop_core::{Classification, LoopConfig, RunState, TerminationReason};

/// What the loop driver should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum NextStep {
    RunTurn,
    /// Inject `message` and run exactly one more turn under the grace
    /// period. If it does not complete the task, the run ends with
    /// `pending`.
    RunWarningTurn {
        pending: TerminationReason,
        message: String,
    },
    Finished(TerminationReason),
}

#[derive(Debug, Clone, PartialEq)]
enum Phase {
    Running,
    Warning(TerminationReason),
    Terminal,
}

pub struct RecoveryManager {
    cfg: LoopConfig,
    state: RunState,
    phase: Phase,
    warning_used: bool,
}

impl RecoveryManager {
    pub fn new(cfg: LoopConfig) -> Self {
        Self {
            cfg,
            state: RunState::default(),
            phase: Phase::Running,
            warning_used: false,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Decide the next step given the run's elapsed wall-clock time.
    pub fn next_step(&mut self, elapsed: Duration) -> NextStep {
        self.state.elapsed = elapsed;
        match &self.phase {
            Phase::Terminal => NextStep::Finished(self.reason()),
            Phase::Warning(pending) => NextStep::RunWarningTurn {
                pending: pending.clone(),
                message: warning_message(pending),
            },
            Phase::Running => {
                if self.state.turns >= self.cfg.max_turns {
                    self.trigger(TerminationReason::MaxTurns)
                } else if elapsed >= self.cfg.max_wall_clock() {
                    self.trigger(TerminationReason::Timeout)
                } else {
                    NextStep::RunTurn
                }
            }
        }
    }

    /// Record the outcome of a normal turn.
    pub fn on_turn(&mut self, classification: Classification, completion_accepted: bool) {
        self.state.turns += 1;
        if completion_accepted {
            self.finish(TerminationReason::Goal);
            return;
        }
        if classification == Classification::Empty {
            self.state.consecutive_violations += 1;
            if self.state.consecutive_violations >= self.cfg.violation_threshold {
                self.trigger(TerminationReason::NoCompleteTaskCall);
            }
        } else {
            self.state.consecutive_violations = 0;
        }
    }

    /// Resolve the warning turn. `turn_ran` is false when the grace
    /// period expired before the turn produced anything; that counts as
    /// a timeout regardless of what originally triggered the warning.
    pub fn resolve_warning(&mut self, turn_ran: bool, completion_accepted: bool) {
        if turn_ran {
            self.state.turns += 1;
        }
        let pending = match &self.phase {
            Phase::Warning(pending) => pending.clone(),
            // Resolution without an active warning only happens if the
            // run was already finished (e.g. cancelled mid-grace).
            _ => return,
        };
        if completion_accepted {
            self.finish(TerminationReason::Goal);
        } else if turn_ran {
            self.finish(pending);
        } else {
            self.finish(TerminationReason::Timeout);
        }
    }

    /// External cancellation: immediately terminal, bypassing any
    /// further warning turns.
    pub fn cancel(&mut self) {
        self.finish(TerminationReason::Error("cancelled".to_string()));
    }

    /// Unrecoverable failure (model invocation error and the like).
    pub fn fail(&mut self, detail: String) {
        self.finish(TerminationReason::Error(detail));
    }

    fn trigger(&mut self, pending: TerminationReason) -> NextStep {
        if self.warning_used {
            self.finish(pending);
            return NextStep::Finished(self.reason());
        }
        self.warning_used = true;
        self.phase = Phase::Warning(pending.clone());
        NextStep::RunWarningTurn {
            message: warning_message(&pending),
            pending,
        }
    }

    fn finish(&mut self, reason: TerminationReason) {
        self.state.finish(reason);
        self.phase = Phase::Terminal;
    }

    fn reason(&self) -> TerminationReason {
        self.state
            .reason
            .clone()
            .unwrap_or_else(|| TerminationReason::Error("terminal without reason".to_string()))
    }
}

/// The synthetic message injected before the final warning turn.
pub fn warning_message(pending: &TerminationReason) -> String {
    let cause = match pending {
        TerminationReason::NoCompleteTaskCall => "You have stopped calling tools without finishing.",
        TerminationReason::MaxTurns => "You have reached the maximum number of turns.",
        TerminationReason::Timeout => "You have run out of time.",
        _ => "The run is about to end.",
    };
    format!(
        "{cause} You have one final chance. You MUST call `complete_task` \
         immediately with your best answer. Do not call any other tools."
    )
}
