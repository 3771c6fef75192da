use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use flowbot_core::config::ModelConfig;
use flowbot_core::error::{FlowbotError, Result};

use super::request_error;
use crate::client::{ChatClient, ChatMessage, Role};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API client.
pub struct AnthropicClient {
    http: Client,
}

impl AnthropicClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize, Debug)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

/// System messages go in the top-level `system` field; the rest stay in order.
fn convert_messages(messages: Vec<ChatMessage>) -> (Option<String>, Vec<ApiMessage>) {
    let mut system_parts = Vec::new();
    let mut api_messages = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => system_parts.push(msg.content),
            Role::User => api_messages.push(ApiMessage {
                role: "user",
                content: msg.content,
            }),
            Role::Assistant => api_messages.push(ApiMessage {
                role: "assistant",
                content: msg.content,
            }),
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, api_messages)
}

fn parse_response(body: &str) -> Result<String> {
    let response: AnthropicResponse =
        serde_json::from_str(body).map_err(|e| FlowbotError::LlmParse(e.to_string()))?;
    let text: Vec<String> = response
        .content
        .into_iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Other => None,
        })
        .collect();
    if text.is_empty() {
        return Err(FlowbotError::LlmParse("response has no text blocks".into()));
    }
    Ok(text.concat())
}

impl ChatClient for AnthropicClient {
    fn complete(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<String>> {
        let config = config.clone();

        Box::pin(async move {
            let api_key = config
                .api_key
                .as_deref()
                .ok_or_else(|| FlowbotError::Config("Anthropic API key not set".into()))?;

            let base_url = config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL);

            let (system, api_messages) = convert_messages(messages);
            let body = AnthropicRequest {
                model: config.model_id.clone(),
                max_tokens: config.max_tokens,
                temperature: if config.temperature > 0.0 {
                    Some(config.temperature)
                } else {
                    None
                },
                system,
                messages: api_messages,
            };

            let response = self
                .http
                .post(base_url)
                .timeout(Duration::from_secs(config.timeout_secs))
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
                .map_err(request_error)?;

            let status = response.status();
            let text = response.text().await.map_err(request_error)?;
            if !status.is_success() {
                return Err(FlowbotError::LlmRequest(format!("HTTP {}: {}", status, text)));
            }

            debug!(model = %config.model_id, bytes = text.len(), "Anthropic completion received");
            parse_response(&text)
        })
    }
}
