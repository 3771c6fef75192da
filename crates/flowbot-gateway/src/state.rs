use flowbot_engine::ConversationService;

/// Shared application state for axum handlers.
pub struct AppState {
    pub service: ConversationService,
}

impl AppState {
    pub fn new(service: ConversationService) -> Self {
        Self { service }
    }
}
