//! Built-in before-model hook: context compaction.
//!
//! Triggers once estimated tokens exceed a threshold ratio of the
//! context window, truncates tool outputs to their last lines, and keeps
//! the system message plus the newest slice of history behind a marker
//! message.

use crate::{BeforeModelAction, BeforeModelHook};
use taskloop_core::{ChatMessage, estimate_tokens};

#[derive(Debug, Clone)]
pub struct CompactContextConfig {
    pub max_context_tokens: u64,
    /// Trigger compaction at this fraction of `max_context_tokens`.
    pub compression_threshold: f64,
    /// Fraction of recent history preserved verbatim.
    pub preserve_ratio: f64,
    /// Tool outputs are truncated to their last N lines.
    pub truncate_lines: usize,
}

impl Default for CompactContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 200_000,
            compression_threshold: 0.5,
            preserve_ratio: 0.3,
            truncate_lines: 30,
        }
    }
}

pub struct CompactContext {
    cfg: CompactContextConfig,
}

impl CompactContext {
    pub fn new(cfg: CompactContextConfig) -> Self {
        Self { cfg }
    }

    fn threshold(&self) -> u64 {
        (self.cfg.max_context_tokens as f64 * self.cfg.compression_threshold) as u64
    }

    fn compact(&self, conversation: &[ChatMessage]) -> Vec<ChatMessage> {
        let truncated: Vec<ChatMessage> = conversation
            .iter()
            .map(|m| match m {
                ChatMessage::Tool {
                    tool_call_id,
                    content,
                } => ChatMessage::Tool {
                    tool_call_id: tool_call_id.clone(),
                    content: truncate_to_last_lines(content, self.cfg.truncate_lines),
                },
                other => other.clone(),
            })
            .collect();

        // Keep the system message and the newest preserve_ratio slice;
        // everything between is collapsed into a single marker.
        let preserve = ((truncated.len() as f64) * self.cfg.preserve_ratio).ceil() as usize;
        let preserve = preserve.max(1).min(truncated.len().saturating_sub(1));
        let recent_start = truncated.len() - preserve;
        if recent_start <= 1 {
            return truncated;
        }

        let mut compacted = Vec::with_capacity(preserve + 2);
        compacted.push(truncated[0].clone());
        compacted.push(ChatMessage::User {
            content: format!(
                "[Context compacted: {} earlier messages were summarized. \
                 Continue from the recent context below.]",
                recent_start - 1
            ),
        });
        compacted.extend_from_slice(&truncated[recent_start..]);
        compacted
    }
}

impl BeforeModelHook for CompactContext {
    fn on_before_model(&self, conversation: &[ChatMessage]) -> BeforeModelAction {
        if estimate_tokens(conversation) <= self.threshold() {
            return BeforeModelAction::Pass;
        }
        BeforeModelAction::Modify(self.compact(conversation))
    }
}

fn truncate_to_last_lines(content: &str, keep: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() <= keep {
        return content.to_string();
    }
    let dropped = lines.len() - keep;
    let mut out = format!("[... {dropped} lines truncated ...]\n");
    out.push_str(&lines[dropped..].join("\n"));
    out
}
