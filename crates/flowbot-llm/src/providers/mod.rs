pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;

use flowbot_core::error::FlowbotError;

/// Map a transport failure, tagging the kinds the retry layer cares about.
pub(crate) fn request_error(e: reqwest::Error) -> FlowbotError {
    if e.is_timeout() {
        FlowbotError::LlmRequest(format!("timeout: {}", e))
    } else if e.is_connect() {
        FlowbotError::LlmRequest(format!("connection failed: {}", e))
    } else {
        FlowbotError::LlmRequest(e.to_string())
    }
}
