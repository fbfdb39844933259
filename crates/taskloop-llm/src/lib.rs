//! Model invocation boundary.
//!
//! `ModelClient` is the opaque function from conversation state to a
//! `ModelResponse`. The loop performs no retries at this boundary beyond
//! the transport-level backoff inside `HttpModelClient`; a final failure
//! surfaces as an error the loop maps to `TerminationReason::Error`.

use anyhow::{Result, anyhow};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use std::thread;
use std::time::Duration;
use taskloop_core::{ChatMessage, LlmConfig, ModelResponse, ToolCallRequest, ToolDefinition};

pub trait ModelClient: Send + Sync {
    /// One model invocation over the full prior conversation.
    fn invoke(
        &self,
        conversation: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ModelResponse>;
}

/// Blocking client for OpenAI-compatible chat-completions endpoints.
#[derive(Debug, Clone)]
pub struct HttpModelClient {
    cfg: LlmConfig,
    client: Client,
}

impl HttpModelClient {
    pub fn new(cfg: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()?;
        Ok(Self { cfg, client })
    }

    fn api_key(&self) -> Result<String> {
        std::env::var(&self.cfg.api_key_env)
            .map_err(|_| anyhow!("API key not set: export {}", self.cfg.api_key_env))
    }

    fn build_payload(&self, conversation: &[ChatMessage], tools: &[ToolDefinition]) -> Value {
        let mut payload = json!({
            "model": self.cfg.model,
            "messages": conversation,
            "max_tokens": self.cfg.max_tokens,
        });
        if !tools.is_empty() {
            payload["tools"] = json!(tools);
            payload["tool_choice"] = json!("auto");
        }
        if let Some(t) = self.cfg.temperature {
            payload["temperature"] = json!(t);
        }
        payload
    }
}

impl ModelClient for HttpModelClient {
    fn invoke(
        &self,
        conversation: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ModelResponse> {
        let api_key = self.api_key()?;
        let payload = self.build_payload(conversation, tools);

        let mut last_err: Option<anyhow::Error> = None;
        let mut attempt: u8 = 0;
        while attempt <= self.cfg.max_retries {
            let response = self
                .client
                .post(&self.cfg.endpoint)
                .bearer_auth(&api_key)
                .json(&payload)
                .send();

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text()?;
                    if status.is_success() {
                        return parse_response_body(&body);
                    }
                    last_err = Some(anyhow!(
                        "model request failed with {status} (attempt {}/{}): {}",
                        attempt + 1,
                        self.cfg.max_retries + 1,
                        truncate(&body, 400)
                    ));
                    if !should_retry_status(status) {
                        break;
                    }
                }
                Err(e) => {
                    last_err = Some(anyhow!("model transport error: {e}"));
                    if !e.is_timeout() && !e.is_connect() {
                        break;
                    }
                }
            }

            if attempt < self.cfg.max_retries {
                thread::sleep(backoff_delay(self.cfg.retry_base_ms, attempt));
            }
            attempt = attempt.saturating_add(1);
        }

        Err(last_err.unwrap_or_else(|| anyhow!("model request failed without detailed error")))
    }
}

/// Exponential backoff with the exponent capped so absurd retry
/// configurations can never overflow the shift.
fn backoff_delay(base_ms: u64, attempt: u8) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(1u64 << u32::from(attempt.min(20))))
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Parse an OpenAI-style chat-completions body into a `ModelResponse`.
fn parse_response_body(body: &str) -> Result<ModelResponse> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| anyhow!("malformed model response: {e}: {}", truncate(body, 200)))?;
    let message = value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| anyhow!("model response missing choices[0].message"))?;

    let text = message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();

    let tool_calls = message
        .get("tool_calls")
        .and_then(|tc| tc.as_array())
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let id = call.get("id").and_then(|v| v.as_str())?;
                    let function = call.get("function")?;
                    let name = function.get("name").and_then(|v| v.as_str())?;
                    let arguments = function
                        .get("arguments")
                        .and_then(|v| v.as_str())
                        .unwrap_or("{}");
                    Some(ToolCallRequest::new(id, name, arguments))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ModelResponse { text, tool_calls })
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskloop_core::COMPLETE_TASK_TOOL_NAME;

    #[test]
    fn parse_text_only_response() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}]}"#;
        let resp = parse_response_body(body).unwrap();
        assert_eq!(resp.text, "hello");
        assert!(resp.tool_calls.is_empty());
    }

    #[test]
    fn parse_tool_call_response() {
        let body = r#"{
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "complete_task", "arguments": "{\"result\":\"42\"}"}
                }]
            }}]
        }"#;
        let resp = parse_response_body(body).unwrap();
        assert_eq!(resp.text, "");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, COMPLETE_TASK_TOOL_NAME);
        assert_eq!(resp.tool_calls[0].arguments, r#"{"result":"42"}"#);
    }

    #[test]
    fn parse_rejects_missing_choices() {
        let err = parse_response_body(r#"{"error":"nope"}"#).unwrap_err();
        assert!(err.to_string().contains("choices"));
    }

    #[test]
    fn backoff_doubles_then_saturates() {
        assert_eq!(backoff_delay(1000, 0), Duration::from_millis(1000));
        assert_eq!(backoff_delay(1000, 1), Duration::from_millis(2000));
        assert_eq!(backoff_delay(1000, 2), Duration::from_millis(4000));
        // Extreme attempt counts must not overflow the shift.
        assert_eq!(
            backoff_delay(u64::MAX, u8::MAX),
            Duration::from_millis(u64::MAX)
        );
    }

    #[test]
    fn payload_includes_tools_only_when_present() {
        let client = HttpModelClient::new(LlmConfig::default()).unwrap();
        let messages = vec![ChatMessage::User {
            content: "hi".to_string(),
        }];
        let bare = client.build_payload(&messages, &[]);
        assert!(bare.get("tools").is_none());

        let with_tools = client.build_payload(&messages, &[taskloop_core::complete_task_definition()]);
        assert_eq!(with_tools["tool_choice"], "auto");
        assert_eq!(
            with_tools["tools"][0]["function"]["name"],
            COMPLETE_TASK_TOOL_NAME
        );
    }
}
