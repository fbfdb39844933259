//! Configuration surface, loaded from a TOML file with serde defaults.

use crate::Result;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub agent_loop: LoopConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: Self =
            toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }
}

/// Model provider settings (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub timeout_seconds: u64,
    pub max_retries: u8,
    pub retry_base_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key_env: "TASKLOOP_API_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 4096,
            temperature: None,
            timeout_seconds: 120,
            max_retries: 2,
            retry_base_ms: 1000,
        }
    }
}

/// Turn-loop and recovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Maximum model invocations before the turn budget triggers recovery.
    pub max_turns: usize,
    /// Wall-clock budget for the whole run, in seconds.
    pub max_wall_clock_secs: u64,
    /// Consecutive no-tool-call turns tolerated before the warning turn.
    pub violation_threshold: usize,
    /// Bound on the single final warning turn, in seconds.
    pub grace_period_secs: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_turns: 50,
            max_wall_clock_secs: 600,
            violation_threshold: 1,
            grace_period_secs: 60,
        }
    }
}

impl LoopConfig {
    pub fn max_wall_clock(&self) -> Duration {
        Duration::from_secs(self.max_wall_clock_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_apply_for_missing_sections() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[agent_loop]\nmax_turns = 3").unwrap();
        let cfg = AppConfig::load(f.path()).unwrap();
        assert_eq!(cfg.agent_loop.max_turns, 3);
        assert_eq!(cfg.agent_loop.violation_threshold, 1);
        assert_eq!(cfg.agent_loop.grace_period_secs, 60);
        assert_eq!(cfg.llm.max_retries, 2);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = AppConfig::load(Path::new("/nonexistent/taskloop.toml")).unwrap_err();
        assert!(err.to_string().contains("reading config"));
    }
}
