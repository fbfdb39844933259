//! The taskloop turn-execution and recovery state machine.
//!
//! A run is a sequence of turns: one model invocation plus its tool-call
//! processing. The loop continues until the model calls the reserved
//! `complete_task` tool, a budget runs out, or the model repeatedly
//! violates the protocol by emitting no tool calls. Violations and
//! budget overruns get exactly one recovery attempt: a warning message
//! and a single time-boxed final turn.

mod dispatcher;
mod executor;
mod recovery;
mod runner;

pub use dispatcher::{DispatchOutcome, ToolCallDispatcher};
pub use executor::{TurnExecutor, TurnMode, TurnReport};
pub use recovery::{NextStep, RecoveryManager, warning_message};
pub use runner::{AgentRunner, CancellationToken};
