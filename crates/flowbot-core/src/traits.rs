use futures::future::BoxFuture;

use crate::error::Result;
use crate::graph::FlowGraph;
use crate::types::*;

/// Flow repository: where published graphs live.
pub trait FlowRepository: Send + Sync + 'static {
    /// Load the graph for a flow owned by `owner`. `None` if it does not exist.
    fn load_flow(&self, flow_id: &str, owner: &str) -> BoxFuture<'_, Result<Option<FlowGraph>>>;

    /// Insert or replace a graph.
    fn save_flow(&self, flow_id: &str, owner: &str, graph: &FlowGraph) -> BoxFuture<'_, Result<()>>;
}

/// Session store: per-user conversation state.
pub trait SessionStore: Send + Sync + 'static {
    /// Fetch the session row, creating a fresh one on first contact.
    fn load_or_create(&self, flow_id: &str, session_key: &str) -> BoxFuture<'_, Result<Session>>;

    fn get(&self, flow_id: &str, session_key: &str) -> BoxFuture<'_, Result<Option<Session>>>;

    /// Write `update` only if the stored version still equals `current.version`.
    /// Returns false when another writer got there first.
    fn compare_and_swap(
        &self,
        current: &Session,
        update: &SessionUpdate,
    ) -> BoxFuture<'_, Result<bool>>;

    /// Put the session back to a fresh state. Returns false if it did not exist.
    fn reset(&self, flow_id: &str, session_key: &str) -> BoxFuture<'_, Result<bool>>;
}

/// AI delegate: answers `ai` nodes.
///
/// Infallible by contract: provider failures must come back as a fallback reply.
pub trait AiDelegate: Send + Sync + 'static {
    fn generate_reply(&self, prompt: &str, user_text: &str) -> BoxFuture<'_, AiReply>;
}
