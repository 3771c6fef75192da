pub mod client;
pub mod delegate;
pub mod providers;
pub mod retry;

use std::sync::Arc;

use tracing::info;

use flowbot_core::config::{AppConfig, ModelConfig};
use flowbot_core::traits::AiDelegate;

pub use client::{ChatClient, ChatMessage, Role};
pub use delegate::{FallbackDelegate, LlmDelegate};
pub use providers::anthropic::AnthropicClient;
pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create a chat client based on the provider name.
pub fn create_client(config: &ModelConfig) -> Box<dyn ChatClient> {
    match config.provider.as_str() {
        "anthropic" | "claude" => Box::new(AnthropicClient::new()),
        // Everything else uses the OpenAI-compatible client
        _ => Box::new(OpenAiClient::new()),
    }
}

/// Build the delegate that answers `ai` nodes.
///
/// Without a `[model]` section every ai node gets the engine's fallback reply.
pub fn create_delegate(config: &AppConfig) -> Arc<dyn AiDelegate> {
    let Some(model) = &config.model else {
        info!("No model configured, ai nodes will use the fallback reply");
        return Arc::new(FallbackDelegate::new(config.engine.fallback_reply.clone()));
    };

    let fallbacks = config
        .fallback_models
        .iter()
        .map(|fb| (fb.clone(), create_client(fb)))
        .collect();
    let client = RetryingClient::new(
        create_client(model),
        fallbacks,
        model.retry.clone().unwrap_or_default(),
    );

    info!(provider = %model.provider, model = %model.model_id, "AI delegate ready");
    Arc::new(LlmDelegate::new(Box::new(client), model.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_model_uses_engine_fallback() {
        let config = AppConfig::default();
        let reply = create_delegate(&config).generate_reply("p", "hi").await;
        assert_eq!(reply.reply, config.engine.fallback_reply);
        assert!(reply.route.is_empty());
    }
}
