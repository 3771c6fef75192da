use std::sync::Arc;

use tracing::{debug, info, warn};

use flowbot_core::traits::AiDelegate;
use flowbot_core::{Edge, EventBus, FlowEvent, FlowGraph, Node, NodeKind};

use crate::buttons;
use crate::condition;
use crate::context::{ExecutionContext, RecordedAction};
use crate::response::ButtonPayload;

/// What a node handler tells the step loop to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Move on to this node within the same request.
    Continue(String),
    /// Wait for the next message at the current node.
    Pause,
    /// The conversation is over; the next message starts fresh.
    Terminate,
    /// Stop here without touching the session.
    Halt,
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Continue(_) => "continue",
            Self::Pause => "pause",
            Self::Terminate => "terminate",
            Self::Halt => "halt",
        }
    }
}

/// Per-type node handlers.
pub struct Dispatcher {
    delegate: Arc<dyn AiDelegate>,
    events: Option<Arc<EventBus>>,
    invalid_selection_reply: String,
}

impl Dispatcher {
    pub fn new(delegate: Arc<dyn AiDelegate>, invalid_selection_reply: impl Into<String>) -> Self {
        Self {
            delegate,
            events: None,
            invalid_selection_reply: invalid_selection_reply.into(),
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    fn publish(&self, event: FlowEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    pub async fn dispatch(
        &self,
        graph: &FlowGraph,
        node: &Node,
        ctx: &mut ExecutionContext<'_>,
    ) -> Transition {
        let outgoing = graph.outgoing(&node.id);

        match &node.kind {
            NodeKind::Trigger(data) => {
                if ctx.started_fresh {
                    ctx.push_text(&data.text);
                }
                follow_first(&outgoing)
            }

            NodeKind::Message(data) => {
                ctx.push_text(&data.text);
                ctx.media.extend(data.media.iter().cloned());
                follow_first(&outgoing)
            }

            NodeKind::Image(data) => {
                ctx.media.extend(data.media.iter().cloned());
                follow_first(&outgoing)
            }

            NodeKind::ButtonMessage(data) => {
                if !ctx.take_resume(&node.id) {
                    ctx.buttons = Some(ButtonPayload {
                        text: data.text.clone(),
                        buttons: data.buttons.clone(),
                    });
                    return Transition::Pause;
                }

                match buttons::resolve(&outgoing, ctx.user_text) {
                    Some(edge) => {
                        debug!(node_id = %node.id, label = %edge.label(), "Button selected");
                        Transition::Continue(edge.target.clone())
                    }
                    None => {
                        debug!(node_id = %node.id, "Reply matched no button, asking again");
                        let text = if data.text.is_empty() {
                            self.invalid_selection_reply.clone()
                        } else {
                            format!("{}\n{}", self.invalid_selection_reply, data.text)
                        };
                        ctx.buttons = Some(ButtonPayload {
                            text,
                            buttons: data.buttons.clone(),
                        });
                        Transition::Pause
                    }
                }
            }

            NodeKind::Condition(data) => {
                if outgoing.is_empty() {
                    debug!(node_id = %node.id, "Condition node has no outgoing edges");
                    return Transition::Halt;
                }
                let result = self.evaluate_condition(&node.id, &data.expression, ctx.user_text);
                debug!(node_id = %node.id, result, "Condition evaluated");
                match outgoing.iter().find(|e| e.data.branch == Some(result)) {
                    Some(edge) => Transition::Continue(edge.target.clone()),
                    None => follow_first(&outgoing),
                }
            }

            NodeKind::Ai(data) => {
                let reply = self.delegate.generate_reply(&data.prompt, ctx.user_text).await;
                ctx.push_text(&reply.reply);
                let routed = if reply.route.trim().is_empty() {
                    None
                } else {
                    buttons::resolve(&outgoing, &reply.route)
                };
                match routed {
                    Some(edge) => {
                        debug!(node_id = %node.id, route = %reply.route, "AI route matched");
                        Transition::Continue(edge.target.clone())
                    }
                    None => follow_first(&outgoing),
                }
            }

            NodeKind::Action(data) => {
                let method = data.method.to_uppercase();
                info!(node_id = %node.id, method = %method, url = %data.url, "Action recorded");
                let confirmation = data
                    .confirmation
                    .clone()
                    .unwrap_or_else(|| format!("{} {} recorded", method, data.url));
                ctx.push_text(&confirmation);
                ctx.actions.push(RecordedAction {
                    node_id: node.id.clone(),
                    method: method.clone(),
                    url: data.url.clone(),
                });
                self.publish(FlowEvent::ActionRecorded {
                    node_id: node.id.clone(),
                    method,
                    url: data.url.clone(),
                });
                follow_first(&outgoing)
            }

            NodeKind::Unknown { kind, .. } => {
                warn!(node_id = %node.id, node_type = %kind, "Unknown node type, stopping");
                Transition::Halt
            }
        }
    }

    /// Evaluate a condition node's expression. Broken expressions are false.
    fn evaluate_condition(&self, node_id: &str, expression: &str, text: &str) -> bool {
        match condition::evaluate(expression, text) {
            Ok(result) => result,
            Err(e) => {
                warn!(node_id = %node_id, expression = %expression, error = %e, "Condition rejected");
                self.publish(FlowEvent::ExpressionRejected {
                    node_id: node_id.to_string(),
                    expression: expression.to_string(),
                    error: e.to_string(),
                });
                false
            }
        }
    }
}

fn follow_first(outgoing: &[&Edge]) -> Transition {
    match outgoing.first() {
        Some(edge) => Transition::Continue(edge.target.clone()),
        None => Transition::Terminate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowbot_core::{AiReply, ResumePoint};
    use futures::future::BoxFuture;

    struct Fixed(AiReply);

    impl AiDelegate for Fixed {
        fn generate_reply(&self, _prompt: &str, _user_text: &str) -> BoxFuture<'_, AiReply> {
            let reply = self.0.clone();
            Box::pin(async move { reply })
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(Fixed(AiReply::text("ok"))), "Please pick one.")
    }

    #[tokio::test]
    async fn test_trigger_text_only_on_fresh_start() {
        let graph = FlowGraph::new(
            vec![Node::trigger("t", "Hello!"), Node::message("m", "x")],
            vec![Edge::new("e", "t", "m")],
        );
        let node = graph.node("t").unwrap();

        let mut ctx = ExecutionContext::new("hi", &ResumePoint::Fresh);
        let t = dispatcher().dispatch(&graph, node, &mut ctx).await;
        assert_eq!(t, Transition::Continue("m".into()));
        assert_eq!(ctx.messages, vec!["Hello!"]);

        let mut ctx = ExecutionContext::new("hi", &ResumePoint::AwaitingNode("b".into()));
        dispatcher().dispatch(&graph, node, &mut ctx).await;
        assert!(ctx.messages.is_empty());
    }

    #[tokio::test]
    async fn test_message_without_edges_terminates() {
        let graph = FlowGraph::new(
            vec![Node::message("m", "bye").with_media(vec![flowbot_core::MediaItem::new("u", "c")])],
            vec![],
        );
        let mut ctx = ExecutionContext::new("", &ResumePoint::Fresh);
        let t = dispatcher().dispatch(&graph, &graph.nodes[0], &mut ctx).await;
        assert_eq!(t, Transition::Terminate);
        assert_eq!(ctx.media.len(), 1);
    }

    #[tokio::test]
    async fn test_condition_falls_back_to_first_edge() {
        let graph = FlowGraph::new(
            vec![Node::condition("c", r#"includes("x")"#)],
            vec![
                Edge::new("e1", "c", "first"),
                Edge::new("e2", "c", "yes").with_branch(true),
            ],
        );
        let mut ctx = ExecutionContext::new("nothing", &ResumePoint::Fresh);
        let t = dispatcher().dispatch(&graph, &graph.nodes[0], &mut ctx).await;
        assert_eq!(t, Transition::Continue("first".into()));

        let mut ctx = ExecutionContext::new("x marks", &ResumePoint::Fresh);
        let t = dispatcher().dispatch(&graph, &graph.nodes[0], &mut ctx).await;
        assert_eq!(t, Transition::Continue("yes".into()));
    }

    #[tokio::test]
    async fn test_condition_without_edges_halts() {
        let graph = FlowGraph::new(vec![Node::condition("c", "true")], vec![]);
        let mut ctx = ExecutionContext::new("", &ResumePoint::Fresh);
        let t = dispatcher().dispatch(&graph, &graph.nodes[0], &mut ctx).await;
        assert_eq!(t, Transition::Halt);
    }

    #[tokio::test]
    async fn test_broken_expression_publishes_event() {
        let bus = Arc::new(EventBus::new(8));
        let mut rx = bus.subscribe();
        let d = dispatcher().with_events(bus);
        let graph = FlowGraph::new(
            vec![Node::condition("c", "require('fs')")],
            vec![
                Edge::new("t", "c", "yes").with_branch(true),
                Edge::new("f", "c", "no").with_branch(false),
            ],
        );
        let mut ctx = ExecutionContext::new("", &ResumePoint::Fresh);
        let t = d.dispatch(&graph, &graph.nodes[0], &mut ctx).await;
        assert_eq!(t, Transition::Continue("no".into()));
        assert!(matches!(rx.recv().await.unwrap(), FlowEvent::ExpressionRejected { .. }));
    }

    #[tokio::test]
    async fn test_action_records_and_confirms() {
        let graph = FlowGraph::new(
            vec![Node::action("a", "post", "https://hooks.example/lead")],
            vec![],
        );
        let mut ctx = ExecutionContext::new("", &ResumePoint::Fresh);
        let t = dispatcher().dispatch(&graph, &graph.nodes[0], &mut ctx).await;
        assert_eq!(t, Transition::Terminate);
        assert_eq!(ctx.messages, vec!["POST https://hooks.example/lead recorded"]);
        assert_eq!(ctx.actions.len(), 1);
        assert_eq!(ctx.actions[0].method, "POST");
    }

    #[tokio::test]
    async fn test_unknown_node_halts() {
        let graph = FlowGraph::new(
            vec![Node::new(
                "x",
                NodeKind::Unknown {
                    kind: "carousel".into(),
                    data: serde_json::Value::Null,
                },
            )],
            vec![Edge::new("e", "x", "y")],
        );
        let mut ctx = ExecutionContext::new("", &ResumePoint::Fresh);
        let t = dispatcher().dispatch(&graph, &graph.nodes[0], &mut ctx).await;
        assert_eq!(t, Transition::Halt);
    }
}
