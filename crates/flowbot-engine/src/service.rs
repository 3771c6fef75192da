use std::sync::Arc;

use tracing::{debug, warn};

use flowbot_core::error::{FlowbotError, Result};
use flowbot_core::traits::{FlowRepository, SessionStore};
use flowbot_core::Session;

use crate::interpreter::{Interpreter, RunOutcome, SessionWrite};

/// Loads a flow and session, runs the interpreter and saves the session,
/// retrying when another request for the same session wins the write.
pub struct ConversationService {
    flows: Arc<dyn FlowRepository>,
    sessions: Arc<dyn SessionStore>,
    interpreter: Interpreter,
    max_attempts: usize,
}

impl ConversationService {
    pub fn new(
        flows: Arc<dyn FlowRepository>,
        sessions: Arc<dyn SessionStore>,
        interpreter: Interpreter,
        session_retries: usize,
    ) -> Self {
        Self {
            flows,
            sessions,
            interpreter,
            max_attempts: session_retries.max(1),
        }
    }

    pub async fn handle_message(
        &self,
        owner: &str,
        flow_id: &str,
        session_key: &str,
        text: &str,
    ) -> Result<RunOutcome> {
        let graph = self
            .flows
            .load_flow(flow_id, owner)
            .await?
            .ok_or_else(|| FlowbotError::FlowNotFound {
                flow_id: flow_id.to_string(),
                owner: owner.to_string(),
            })?;

        let mut session = self.sessions.load_or_create(flow_id, session_key).await?;
        let mut outcome = self.interpreter.run(&graph, &session, text).await;

        for attempt in 1..=self.max_attempts {
            if let SessionWrite::Write(update) = &outcome.session_write {
                if self.sessions.compare_and_swap(&session, update).await? {
                    return Ok(outcome);
                }
            } else {
                return Ok(outcome);
            }

            debug!(
                flow_id = %flow_id,
                session_key = %session_key,
                attempt,
                "Session changed during run, retrying"
            );
            if attempt == self.max_attempts {
                break;
            }

            // A run is only replayed when the resume point moved; otherwise its
            // update is written against the new version as is.
            let latest = self.sessions.load_or_create(flow_id, session_key).await?;
            if latest.resume != session.resume {
                debug!(
                    flow_id = %flow_id,
                    session_key = %session_key,
                    resume = ?latest.resume,
                    "Resume point moved, running again"
                );
                outcome = self.interpreter.run(&graph, &latest, text).await;
            }
            session = latest;
        }

        warn!(
            flow_id = %flow_id,
            session_key = %session_key,
            attempts = self.max_attempts,
            "Giving up on contended session"
        );
        Err(FlowbotError::SessionConflict {
            flow_id: flow_id.to_string(),
            session_key: session_key.to_string(),
            attempts: self.max_attempts,
        })
    }

    /// Look up a session of an existing flow.
    pub async fn session(&self, owner: &str, flow_id: &str, session_key: &str) -> Result<Option<Session>> {
        self.require_flow(owner, flow_id).await?;
        self.sessions.get(flow_id, session_key).await
    }

    /// Reset a session of an existing flow to a fresh state.
    pub async fn reset_session(&self, owner: &str, flow_id: &str, session_key: &str) -> Result<bool> {
        self.require_flow(owner, flow_id).await?;
        self.sessions.reset(flow_id, session_key).await
    }

    async fn require_flow(&self, owner: &str, flow_id: &str) -> Result<()> {
        match self.flows.load_flow(flow_id, owner).await? {
            Some(_) => Ok(()),
            None => Err(FlowbotError::FlowNotFound {
                flow_id: flow_id.to_string(),
                owner: owner.to_string(),
            }),
        }
    }
}
