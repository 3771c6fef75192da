use flowbot_core::Edge;

/// Trim and case-fold for label comparison.
pub fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Find the outgoing edge whose label matches the user's reply.
///
/// First exact match after normalization wins. Unlabeled edges never match,
/// so an empty reply cannot slip through an edge the author left blank.
pub fn resolve<'a>(edges: &[&'a Edge], reply: &str) -> Option<&'a Edge> {
    let wanted = normalize(reply);
    if wanted.is_empty() {
        return None;
    }
    edges
        .iter()
        .copied()
        .find(|e| !e.label().trim().is_empty() && normalize(e.label()) == wanted)
}
