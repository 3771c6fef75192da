use flowbot_core::{FlowGraph, GraphDiagnostic, NodeKind};

use crate::condition;

/// Everything worth warning about before a graph goes live: the structural
/// findings plus condition expressions that will never parse.
pub fn diagnose(graph: &FlowGraph) -> Vec<GraphDiagnostic> {
    let mut out = graph.diagnostics();

    for node in &graph.nodes {
        if let NodeKind::Condition(data) = &node.kind {
            if let Err(e) = condition::compile(&data.expression) {
                out.push(GraphDiagnostic {
                    node_id: Some(node.id.clone()),
                    message: format!("condition '{}' will always be false: {}", data.expression, e),
                });
            }
            if graph.outgoing(&node.id).is_empty() {
                out.push(GraphDiagnostic {
                    node_id: Some(node.id.clone()),
                    message: "condition has no outgoing edges".into(),
                });
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowbot_core::{Edge, Node};

    #[test]
    fn test_clean_graph_has_no_findings() {
        let graph = FlowGraph::new(
            vec![Node::trigger("t", ""), Node::condition("c", r#"includes("a")"#), Node::message("m", "")],
            vec![Edge::new("e1", "t", "c"), Edge::new("e2", "c", "m")],
        );
        assert!(diagnose(&graph).is_empty());
    }

    #[test]
    fn test_bad_expression_reported() {
        let graph = FlowGraph::new(
            vec![Node::trigger("t", ""), Node::condition("c", "text ==")],
            vec![Edge::new("e1", "t", "c")],
        );
        let found = diagnose(&graph);
        assert!(found.iter().any(|d| d.message.contains("always be false")));
        assert!(found.iter().any(|d| d.message.contains("no outgoing edges")));
    }
}
