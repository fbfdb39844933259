//! Run observability: an append-only log file plus optional stderr echo.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use taskloop_core::{Classification, TerminationReason};

/// One loggable event in a run's lifecycle.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted { query: String },
    TurnStarted { turn: usize },
    TurnClassified { turn: usize, classification: Classification },
    ToolDispatched { turn: usize, tool: String, success: bool },
    CompletionIntercepted { turn: usize, suppressed_calls: usize },
    WarningIssued { pending: TerminationReason },
    RunFinished { reason: TerminationReason, turns: usize },
}

/// Writes timestamped JSON event lines. `Observer::disabled()` is a
/// no-op sink for tests and embedded use.
pub struct Observer {
    log_path: Option<PathBuf>,
    verbose: bool,
}

impl Observer {
    pub fn new(log_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        Ok(Self {
            log_path: Some(log_dir.join("taskloop.log")),
            verbose: false,
        })
    }

    pub fn disabled() -> Self {
        Self {
            log_path: None,
            verbose: false,
        }
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn record(&self, event: &RunEvent) {
        let line = match serde_json::to_string(event) {
            Ok(json) => format!("{} EVENT {json}", Utc::now().to_rfc3339()),
            Err(e) => format!("{} EVENT_ERROR {e}", Utc::now().to_rfc3339()),
        };
        if self.verbose {
            eprintln!("[taskloop] {line}");
        }
        let _ = self.append(&line);
    }

    /// Warnings go to stderr unconditionally and to the log file.
    pub fn warn(&self, msg: &str) {
        eprintln!("[taskloop WARN] {msg}");
        let _ = self.append(&format!("{} WARN {msg}", Utc::now().to_rfc3339()));
    }

    fn append(&self, line: &str) -> Result<()> {
        let Some(path) = &self.log_path else {
            return Ok(());
        };
        let mut f = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}
