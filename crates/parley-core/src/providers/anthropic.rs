//! Anthropic Claude connector

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::prompt::{self, COLLABORATION_MAX_TOKENS, REQUEST_TIMEOUT, SINGLE_MAX_TOKENS, TEMPERATURE};
use super::reply;
use crate::agent::{AgentConnector, AgentId, AgentResponse};
use crate::session::SessionContext;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const API_VERSION: &str = "2023-06-01";

/// Speaks for `claude` through the Messages API
pub struct AnthropicConnector {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for AnthropicConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConnector")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key_configured", &self.has_key())
            .finish()
    }
}

impl AnthropicConnector {
    /// A missing key is allowed here; calls fail until one is configured.
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

    /// One system + user exchange; returns the reply text and tokens used
    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<(String, u64)> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("Anthropic API key not configured"))?;

        let url = format!("{}/v1/messages", self.base_url);
        let body = MessagesRequest {
            model: &self.model,
            max_tokens,
            temperature: TEMPERATURE,
            system,
            messages: vec![WireMessage {
                role: "user",
                content: user,
            }],
        };

        debug!("Anthropic request: model={}, max_tokens={}", self.model, max_tokens);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Failed to send request to Anthropic API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Anthropic API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: MessagesResponse = response
            .json()
            .await
            .context("Failed to parse Anthropic API response")?;

        debug!(
            "Anthropic response: blocks={}, stop_reason={:?}",
            api_response.content.len(),
            api_response.stop_reason
        );

        Self::read_response(api_response)
    }

    fn read_response(resp: MessagesResponse) -> Result<(String, u64)> {
        let text = resp
            .content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .ok_or_else(|| anyhow!("Anthropic response had no text content"))?;
        let tokens = resp.usage.map_or(0, |u| u.input_tokens + u.output_tokens);
        Ok((text.trim().to_string(), tokens))
    }
}

#[async_trait]
impl AgentConnector for AnthropicConnector {
    fn agent(&self) -> AgentId {
        AgentId::Claude
    }

    async fn send_single(&self, text: &str) -> Result<AgentResponse> {
        let system = prompt::single_system_prompt(AgentId::Claude);
        let (content, tokens) = self.complete(&system, text, SINGLE_MAX_TOKENS).await?;
        Ok(AgentResponse::new(reply::parse_single(&content), tokens))
    }

    async fn send_in_collaboration(
        &self,
        text: &str,
        context: &SessionContext,
    ) -> Result<AgentResponse> {
        let system = prompt::collaboration_system_prompt(AgentId::Claude);
        let user = prompt::collaboration_user_prompt(text, context);
        let (content, tokens) = self
            .complete(&system, &user, COLLABORATION_MAX_TOKENS)
            .await?;
        Ok(AgentResponse::new(reply::parse_collaboration(&content), tokens))
    }
}

// ── Anthropic wire types ──

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}
