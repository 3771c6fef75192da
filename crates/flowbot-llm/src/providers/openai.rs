use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use flowbot_core::config::ModelConfig;
use flowbot_core::error::{FlowbotError, Result};

use super::request_error;
use crate::client::{ChatClient, ChatMessage, Role};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize)]
struct OaiMessage {
    role: &'static str,
    content: String,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn convert_messages(messages: Vec<ChatMessage>) -> Vec<OaiMessage> {
    messages
        .into_iter()
        .map(|m| OaiMessage {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: m.content,
        })
        .collect()
}

fn build_request(config: &ModelConfig, messages: Vec<ChatMessage>) -> ChatRequest {
    ChatRequest {
        model: config.model_id.clone(),
        messages: convert_messages(messages),
        max_tokens: config.max_tokens,
        temperature: if config.temperature > 0.0 {
            Some(config.temperature)
        } else {
            None
        },
        stream: false,
    }
}

/// Pull the assistant text out of a `/chat/completions` response body.
fn parse_response(body: &str) -> Result<String> {
    let response: ChatResponse =
        serde_json::from_str(body).map_err(|e| FlowbotError::LlmParse(e.to_string()))?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| FlowbotError::LlmParse("response has no message content".into()))
}

impl ChatClient for OpenAiClient {
    fn complete(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<String>> {
        let config = config.clone();

        Box::pin(async move {
            let base_url = config.base_url.as_deref().unwrap_or(OPENAI_API_URL);
            let body = build_request(&config, messages);

            let mut req = self
                .http
                .post(base_url)
                .timeout(Duration::from_secs(config.timeout_secs))
                .json(&body);

            if let Some(api_key) = &config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            let response = req.send().await.map_err(request_error)?;

            let status = response.status();
            let text = response.text().await.map_err(request_error)?;
            if !status.is_success() {
                return Err(FlowbotError::LlmRequest(format!("HTTP {}: {}", status, text)));
            }

            debug!(model = %config.model_id, bytes = text.len(), "OpenAI-compatible completion received");
            parse_response(&text)
        })
    }
}
