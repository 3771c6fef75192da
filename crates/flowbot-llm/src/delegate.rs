use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::{debug, warn};

use flowbot_core::config::ModelConfig;
use flowbot_core::traits::AiDelegate;
use flowbot_core::AiReply;

use crate::client::{ChatClient, ChatMessage};

const REPLY_FORMAT: &str = "Answer with a single JSON object and nothing else: \
{\"reply\": \"<message shown to the user>\", \"route\": \"<label of the next step, or empty>\"}";

/// AI delegate backed by a chat model.
///
/// Provider errors and unusable output never reach the flow: they are logged
/// and answered with the configured fallback reply.
pub struct LlmDelegate {
    client: Box<dyn ChatClient>,
    config: ModelConfig,
}

impl LlmDelegate {
    pub fn new(client: Box<dyn ChatClient>, config: ModelConfig) -> Self {
        Self { client, config }
    }

    fn fallback(&self) -> AiReply {
        AiReply::text(self.config.fallback_reply.clone())
    }
}

impl AiDelegate for LlmDelegate {
    fn generate_reply(&self, prompt: &str, user_text: &str) -> BoxFuture<'_, AiReply> {
        let system = if prompt.trim().is_empty() {
            REPLY_FORMAT.to_string()
        } else {
            format!("{}\n\n{}", prompt.trim(), REPLY_FORMAT)
        };
        let messages = vec![ChatMessage::system(system), ChatMessage::user(user_text)];

        Box::pin(async move {
            match self.client.complete(&self.config, messages).await {
                Ok(raw) => match parse_ai_reply(&raw) {
                    Some(reply) => {
                        debug!(route = %reply.route, "AI reply parsed");
                        reply
                    }
                    None => {
                        warn!(model = %self.config.model_id, "AI returned an empty reply, using fallback");
                        self.fallback()
                    }
                },
                Err(e) => {
                    warn!(model = %self.config.model_id, error = %e, "AI request failed, using fallback");
                    self.fallback()
                }
            }
        })
    }
}

/// Answers every ai node with the same text. Used when no model is configured.
pub struct FallbackDelegate {
    reply: String,
}

impl FallbackDelegate {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

impl AiDelegate for FallbackDelegate {
    fn generate_reply(&self, _prompt: &str, _user_text: &str) -> BoxFuture<'_, AiReply> {
        let reply = AiReply::text(self.reply.clone());
        Box::pin(async move { reply })
    }
}

#[derive(Deserialize)]
struct RawReply {
    #[serde(default, alias = "message", alias = "text")]
    reply: Option<String>,
    #[serde(default, alias = "label", alias = "next")]
    route: Option<String>,
}

/// Read `{"reply", "route"}` out of model output.
///
/// Accepts bare JSON, JSON inside a code fence, or JSON embedded in prose.
/// Anything else is taken as the reply text with no route. Returns `None`
/// when there is nothing to say.
pub fn parse_ai_reply(raw: &str) -> Option<AiReply> {
    let trimmed = strip_fence(raw.trim());
    if trimmed.is_empty() {
        return None;
    }

    let candidates = [Some(trimmed), embedded_object(trimmed)];
    for candidate in candidates.into_iter().flatten() {
        if let Ok(parsed) = serde_json::from_str::<RawReply>(candidate) {
            let reply = parsed.reply.unwrap_or_default().trim().to_string();
            let route = parsed.route.unwrap_or_default().trim().to_string();
            if reply.is_empty() && route.is_empty() {
                return None;
            }
            return Some(AiReply { reply, route });
        }
    }

    Some(AiReply::text(trimmed))
}

fn strip_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // Drop an info string such as ```json
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn embedded_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    (end > start).then(|| &s[start..=end])
}
