//! OpenAI chat completions connector

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::prompt::{self, COLLABORATION_MAX_TOKENS, REQUEST_TIMEOUT, SINGLE_MAX_TOKENS, TEMPERATURE};
use super::reply;
use crate::agent::{AgentConnector, AgentId, AgentResponse};
use crate::session::SessionContext;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Speaks for `gpt` through the chat completions API
pub struct OpenAiConnector {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for OpenAiConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConnector")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key_configured", &self.has_key())
            .finish()
    }
}

impl OpenAiConnector {
    pub fn new(api_key: Option<String>, model: String, base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    pub fn has_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request<'a>(&'a self, system: &'a str, user: &'a str, max_tokens: u32) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            max_tokens,
            temperature: TEMPERATURE,
            messages: vec![
                WireMessage {
                    role: "system",
                    content: system,
                },
                WireMessage {
                    role: "user",
                    content: user,
                },
            ],
        }
    }

    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<(String, u64)> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("OpenAI API key not configured"))?;

        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.request(system, user, max_tokens);

        debug!("OpenAI request: model={}, max_tokens={}", self.model, max_tokens);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Failed to send request to OpenAI API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "OpenAI API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI API response")?;

        debug!(
            "OpenAI response: choices={}, finish_reason={:?}",
            api_response.choices.len(),
            api_response.choices.first().map(|c| &c.finish_reason)
        );

        Self::read_response(api_response)
    }

    fn read_response(resp: ChatResponse) -> Result<(String, u64)> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("OpenAI response had no choices"))?;
        let text = choice
            .message
            .content
            .ok_or_else(|| anyhow!("OpenAI response had no message content"))?;
        let tokens = resp
            .usage
            .map_or(0, |u| u.prompt_tokens + u.completion_tokens);
        Ok((text.trim().to_string(), tokens))
    }
}

#[async_trait]
impl AgentConnector for OpenAiConnector {
    fn agent(&self) -> AgentId {
        AgentId::Gpt
    }

    async fn send_single(&self, text: &str) -> Result<AgentResponse> {
        let system = prompt::single_system_prompt(AgentId::Gpt);
        let (content, tokens) = self.complete(&system, text, SINGLE_MAX_TOKENS).await?;
        Ok(AgentResponse::new(reply::parse_single(&content), tokens))
    }

    async fn send_in_collaboration(
        &self,
        text: &str,
        context: &SessionContext,
    ) -> Result<AgentResponse> {
        let system = prompt::collaboration_system_prompt(AgentId::Gpt);
        let user = prompt::collaboration_user_prompt(text, context);
        let (content, tokens) = self
            .complete(&system, &user, COLLABORATION_MAX_TOKENS)
            .await?;
        Ok(AgentResponse::new(reply::parse_collaboration(&content), tokens))
    }
}

// ── OpenAI wire types ──

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector(key: Option<&str>) -> OpenAiConnector {
        OpenAiConnector::new(
            key.map(str::to_string),
            DEFAULT_MODEL.to_string(),
            DEFAULT_BASE_URL.to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_request_has_system_then_user() {
        let c = connector(Some("sk-test"));
        let json = serde_json::to_value(c.request("be brief", "hello", COLLABORATION_MAX_TOKENS)).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["max_tokens"], 800);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][0]["content"], "be brief");
        assert_eq!(json["messages"][1]["role"], "user");
    }

    #[test]
    fn test_read_response() {
        let resp: ChatResponse = serde_json::from_value(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": " Sure. "}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }))
        .unwrap();
        let (text, tokens) = OpenAiConnector::read_response(resp).unwrap();
        assert_eq!(text, "Sure.");
        assert_eq!(tokens, 15);
    }

    #[test]
    fn test_read_response_without_choices() {
        let resp: ChatResponse = serde_json::from_value(serde_json::json!({"choices": []})).unwrap();
        let err = OpenAiConnector::read_response(resp).unwrap_err();
        assert!(err.to_string().contains("no choices"));
    }

    #[test]
    fn test_debug_hides_key() {
        let debug = format!("{:?}", connector(Some("sk-very-secret")));
        assert!(!debug.contains("sk-very-secret"));
    }

    #[tokio::test]
    async fn test_missing_key_fails_at_call_time() {
        let c = connector(None);
        assert_eq!(c.agent(), AgentId::Gpt);
        let err = c.send_single("hello").await.unwrap_err();
        assert_eq!(err.to_string(), "OpenAI API key not configured");
    }
}
