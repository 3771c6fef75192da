use flowbot_core::{Edge, FlowGraph, MediaItem, Node};

/// trigger → "Welcome" → buttons "Pick one" [Yes, No], each option leading to a message.
pub fn welcome_buttons_graph() -> FlowGraph {
    FlowGraph::new(
        vec![
            Node::trigger("start", ""),
            Node::message("welcome", "Welcome"),
            Node::buttons("pick", "Pick one", ["Yes", "No"]),
            Node::message("chose_yes", "Great, let's go!"),
            Node::message("chose_no", "Maybe next time."),
        ],
        vec![
            Edge::new("e1", "start", "welcome"),
            Edge::new("e2", "welcome", "pick"),
            Edge::new("e3", "pick", "chose_yes").with_label("Yes"),
            Edge::new("e4", "pick", "chose_no").with_label("No"),
        ],
    )
}

/// trigger → condition `includes("refund")` with true/false branches.
pub fn refund_graph() -> FlowGraph {
    FlowGraph::new(
        vec![
            Node::trigger("start", ""),
            Node::condition("check", r#"includes("refund")"#),
            Node::message("refund", "Let me help with your refund."),
            Node::message("other", "How else can I help?"),
        ],
        vec![
            Edge::new("e1", "start", "check"),
            Edge::new("e2", "check", "other").with_branch(false),
            Edge::new("e3", "check", "refund").with_branch(true),
        ],
    )
}

/// trigger → condition on a PIN.
pub fn pin_graph(pin: &str) -> FlowGraph {
    FlowGraph::new(
        vec![
            Node::trigger("start", ""),
            Node::condition("pin", pin),
            Node::message("granted", "Access granted."),
            Node::message("denied", "Wrong code."),
        ],
        vec![
            Edge::new("e1", "start", "pin"),
            Edge::new("e2", "pin", "granted").with_branch(true),
            Edge::new("e3", "pin", "denied").with_branch(false),
        ],
    )
}

/// trigger → ai node that routes to "Sales" or "Support".
pub fn ai_routing_graph() -> FlowGraph {
    FlowGraph::new(
        vec![
            Node::trigger("start", ""),
            Node::ai("assistant", "You are a helpful front desk."),
            Node::message("sales", "Routing you to sales."),
            Node::message("support", "Connecting you to support."),
        ],
        vec![
            Edge::new("e1", "start", "assistant"),
            Edge::new("e2", "assistant", "sales").with_label("Sales"),
            Edge::new("e3", "assistant", "support").with_label("Support"),
        ],
    )
}

/// trigger → message with an image → image node.
pub fn media_graph() -> FlowGraph {
    FlowGraph::new(
        vec![
            Node::trigger("start", ""),
            Node::message("menu", "Here is our menu")
                .with_media(vec![MediaItem::new("https://cdn.example/menu.png", "Menu")]),
            Node::image("map", vec![MediaItem::new("https://cdn.example/map.png", "")]),
        ],
        vec![
            Edge::new("e1", "start", "menu"),
            Edge::new("e2", "menu", "map"),
        ],
    )
}

/// Two messages pointing at each other forever.
pub fn cyclic_graph() -> FlowGraph {
    FlowGraph::new(
        vec![
            Node::trigger("start", ""),
            Node::message("ping", "ping"),
            Node::message("pong", "pong"),
        ],
        vec![
            Edge::new("e1", "start", "ping"),
            Edge::new("e2", "ping", "pong"),
            Edge::new("e3", "pong", "ping"),
        ],
    )
}

/// The welcome/buttons flow as the builder exports it.
pub const WELCOME_BUTTONS_JSON: &str = r#"{
  "nodes": [
    {"id": "start", "type": "trigger", "data": {"text": ""}, "position": {"x": 0, "y": 0}},
    {"id": "welcome", "type": "message", "data": {"text": "Welcome"}, "position": {"x": 0, "y": 120}},
    {"id": "pick", "type": "buttonMessage", "data": {"text": "Pick one", "buttons": [{"label": "Yes"}, {"label": "No"}]}},
    {"id": "chose_yes", "type": "message", "data": {"text": "Great, let's go!"}},
    {"id": "chose_no", "type": "message", "data": {"text": "Maybe next time."}}
  ],
  "edges": [
    {"id": "e1", "source": "start", "target": "welcome"},
    {"id": "e2", "source": "welcome", "target": "pick"},
    {"id": "e3", "source": "pick", "target": "chose_yes", "label": "Yes"},
    {"id": "e4", "source": "pick", "target": "chose_no", "label": "No"}
  ]
}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_fixture_matches_typed_fixture() {
        let parsed = FlowGraph::from_json(WELCOME_BUTTONS_JSON).unwrap();
        let typed = welcome_buttons_graph();
        assert_eq!(parsed.nodes, typed.nodes);
        assert_eq!(parsed.edges, typed.edges);
    }
}
