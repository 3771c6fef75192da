use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowbotError {
    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Flow graph errors
    #[error("Flow not found: {flow_id} (owner {owner})")]
    FlowNotFound { flow_id: String, owner: String },

    #[error("Invalid node {node_id}: {message}")]
    InvalidNode { node_id: String, message: String },

    #[error("Invalid flow graph: {0}")]
    InvalidGraph(String),

    // Session errors
    #[error("Session {session_key} in flow {flow_id} changed concurrently after {attempts} attempts")]
    SessionConflict {
        flow_id: String,
        session_key: String,
        attempts: usize,
    },

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // AI delegate errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FlowbotError>;
