use std::sync::Arc;

use tracing::{debug, info, warn};

use flowbot_core::config::EngineConfig;
use flowbot_core::traits::AiDelegate;
use flowbot_core::{EventBus, FlowEvent, FlowGraph, ResumePoint, Session, SessionUpdate};

use crate::context::{ExecutionContext, RecordedAction};
use crate::dispatch::{Dispatcher, Transition};
use crate::response::Reply;

/// Whether a run wants the session row changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionWrite {
    Keep,
    Write(SessionUpdate),
}

/// Result of running the step loop for one inbound message.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub reply: Reply,
    pub session_write: SessionWrite,
    /// Nodes visited.
    pub steps: usize,
    pub actions: Vec<RecordedAction>,
    /// The step limit cut the run short.
    pub truncated: bool,
}

/// Walks a flow graph for one message, starting at the trigger or at the
/// node the session is paused on.
///
/// Never fails: in-graph problems end the run early and still produce a reply.
pub struct Interpreter {
    dispatcher: Dispatcher,
    events: Option<Arc<EventBus>>,
    max_steps: usize,
    fallback_reply: String,
    not_configured_reply: String,
}

impl Interpreter {
    pub fn new(delegate: Arc<dyn AiDelegate>, config: &EngineConfig) -> Self {
        Self {
            dispatcher: Dispatcher::new(delegate, config.invalid_selection_reply.clone()),
            events: None,
            max_steps: config.max_steps,
            fallback_reply: config.fallback_reply.clone(),
            not_configured_reply: config.not_configured_reply.clone(),
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.dispatcher = self.dispatcher.with_events(events.clone());
        self.events = Some(events);
        self
    }

    fn publish(&self, event: FlowEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    pub async fn run(&self, graph: &FlowGraph, session: &Session, text: &str) -> RunOutcome {
        self.publish(FlowEvent::RunStarted {
            flow_id: session.flow_id.clone(),
            session_key: session.session_key.clone(),
            resume: session.resume.clone(),
        });

        let start = match &session.resume {
            ResumePoint::Fresh => match graph.trigger() {
                Some(trigger) => {
                    let count = graph.triggers().count();
                    if count > 1 {
                        warn!(
                            trigger_id = %trigger.id,
                            count,
                            "Graph has several trigger nodes, using the first"
                        );
                    }
                    trigger.id.clone()
                }
                None => {
                    warn!(flow_id = %session.flow_id, "Graph has no trigger node");
                    return self.finish(
                        session,
                        RunOutcome {
                            reply: Reply::Text(self.not_configured_reply.clone()),
                            session_write: SessionWrite::Keep,
                            steps: 0,
                            actions: vec![],
                            truncated: false,
                        },
                    );
                }
            },
            ResumePoint::AwaitingNode(id) => {
                if graph.node(id).is_none() {
                    // The paused node was removed from the flow. Drop the pointer so the
                    // next message starts over instead of hitting this forever.
                    warn!(node_id = %id, "Session paused on a node that no longer exists");
                    self.publish(FlowEvent::BrokenReference { node_id: id.clone() });
                    return self.finish(
                        session,
                        RunOutcome {
                            reply: Reply::Text(self.fallback_reply.clone()),
                            session_write: SessionWrite::Write(SessionUpdate {
                                resume: ResumePoint::Fresh,
                                last_message: text.to_string(),
                            }),
                            steps: 0,
                            actions: vec![],
                            truncated: false,
                        },
                    );
                }
                id.clone()
            }
        };

        let mut ctx = ExecutionContext::new(text, &session.resume);
        let mut current = start;
        let mut session_write = SessionWrite::Keep;
        let mut truncated = false;

        loop {
            if ctx.step >= self.max_steps {
                warn!(
                    node_id = %current,
                    max_steps = self.max_steps,
                    "Step limit reached, returning partial output"
                );
                self.publish(FlowEvent::StepLimitReached {
                    node_id: current.clone(),
                    max_steps: self.max_steps,
                });
                truncated = true;
                break;
            }

            let Some(node) = graph.node(&current) else {
                warn!(node_id = %current, "Edge points at a missing node, stopping");
                self.publish(FlowEvent::BrokenReference {
                    node_id: current.clone(),
                });
                break;
            };

            ctx.step += 1;
            debug!(node_id = %node.id, node_type = %node.kind.type_name(), step = ctx.step, "Entering node");
            self.publish(FlowEvent::NodeEntered {
                node_id: node.id.clone(),
                node_type: node.kind.type_name().to_string(),
                step: ctx.step,
            });

            let transition = self.dispatcher.dispatch(graph, node, &mut ctx).await;

            self.publish(FlowEvent::NodeExited {
                node_id: node.id.clone(),
                transition: transition.name().to_string(),
            });

            match transition {
                Transition::Continue(next) => current = next,
                Transition::Pause => {
                    session_write = SessionWrite::Write(SessionUpdate {
                        resume: ResumePoint::AwaitingNode(node.id.clone()),
                        last_message: text.to_string(),
                    });
                    break;
                }
                Transition::Terminate => {
                    session_write = SessionWrite::Write(SessionUpdate {
                        resume: ResumePoint::Fresh,
                        last_message: text.to_string(),
                    });
                    break;
                }
                Transition::Halt => break,
            }
        }

        let reply = Reply::assemble(&ctx.messages, ctx.media, ctx.buttons, &self.fallback_reply);

        self.finish(
            session,
            RunOutcome {
                reply,
                session_write,
                steps: ctx.step,
                actions: ctx.actions,
                truncated,
            },
        )
    }

    fn finish(&self, session: &Session, outcome: RunOutcome) -> RunOutcome {
        let resume = match &outcome.session_write {
            SessionWrite::Write(update) => update.resume.clone(),
            SessionWrite::Keep => session.resume.clone(),
        };
        info!(
            flow_id = %session.flow_id,
            session_key = %session.session_key,
            steps = outcome.steps,
            paused_at = ?resume.awaiting(),
            truncated = outcome.truncated,
            "Flow run finished"
        );
        self.publish(FlowEvent::RunFinished {
            flow_id: session.flow_id.clone(),
            session_key: session.session_key.clone(),
            steps: outcome.steps,
            resume,
        });
        outcome
    }
}
