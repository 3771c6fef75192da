use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where the next inbound message picks up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum ResumePoint {
    /// Start over from the trigger node.
    #[default]
    Fresh,
    /// A button node is waiting for the user's pick.
    AwaitingNode(String),
}

impl ResumePoint {
    pub fn awaiting(&self) -> Option<&str> {
        match self {
            Self::Fresh => None,
            Self::AwaitingNode(id) => Some(id),
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }
}

impl From<Option<String>> for ResumePoint {
    fn from(last_node_id: Option<String>) -> Self {
        match last_node_id {
            Some(id) if !id.is_empty() => Self::AwaitingNode(id),
            _ => Self::Fresh,
        }
    }
}

impl From<ResumePoint> for Option<String> {
    fn from(resume: ResumePoint) -> Self {
        match resume {
            ResumePoint::Fresh => None,
            ResumePoint::AwaitingNode(id) => Some(id),
        }
    }
}

/// Per-user conversation state, keyed by (flow_id, session_key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub flow_id: String,
    pub session_key: String,
    pub resume: ResumePoint,
    pub last_message: Option<String>,
    /// Bumped on every write; used for compare-and-swap.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(flow_id: impl Into<String>, session_key: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            flow_id: flow_id.into(),
            session_key: session_key.into(),
            resume: ResumePoint::Fresh,
            last_message: None,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn with_resume(mut self, resume: ResumePoint) -> Self {
        self.resume = resume;
        self
    }

    /// Apply a write as the store would, bumping the version.
    pub fn apply(&mut self, update: &SessionUpdate) {
        self.resume = update.resume.clone();
        self.last_message = Some(update.last_message.clone());
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

/// The session write a run asks for at a pause or terminate boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub resume: ResumePoint,
    pub last_message: String,
}

/// What the AI delegate hands back to an `ai` node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiReply {
    pub reply: String,
    /// Edge label to follow. Empty means "first outgoing edge".
    #[serde(default)]
    pub route: String,
}

impl AiReply {
    pub fn new(reply: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            route: route.into(),
        }
    }

    pub fn text(reply: impl Into<String>) -> Self {
        Self::new(reply, "")
    }
}

/// Step-trace telemetry published while a flow runs.
#[derive(Debug, Clone)]
pub enum FlowEvent {
    RunStarted {
        flow_id: String,
        session_key: String,
        resume: ResumePoint,
    },
    NodeEntered {
        node_id: String,
        node_type: String,
        step: usize,
    },
    NodeExited {
        node_id: String,
        transition: String,
    },
    /// A condition expression failed to parse; it evaluated to false.
    ExpressionRejected {
        node_id: String,
        expression: String,
        error: String,
    },
    ActionRecorded {
        node_id: String,
        method: String,
        url: String,
    },
    /// An edge pointed at a node id that is not in the graph.
    BrokenReference {
        node_id: String,
    },
    StepLimitReached {
        node_id: String,
        max_steps: usize,
    },
    RunFinished {
        flow_id: String,
        session_key: String,
        steps: usize,
        resume: ResumePoint,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_point_serializes_as_nullable_id() {
        assert_eq!(serde_json::to_value(ResumePoint::Fresh).unwrap(), serde_json::Value::Null);
        assert_eq!(
            serde_json::to_value(ResumePoint::AwaitingNode("b".into())).unwrap(),
            serde_json::json!("b")
        );
        let parsed: ResumePoint = serde_json::from_str("\"b\"").unwrap();
        assert_eq!(parsed.awaiting(), Some("b"));
    }

    #[test]
    fn test_empty_id_is_fresh() {
        assert!(ResumePoint::from(Some(String::new())).is_fresh());
    }

    #[test]
    fn test_apply_bumps_version() {
        let mut session = Session::new("flow", "key");
        session.apply(&SessionUpdate {
            resume: ResumePoint::AwaitingNode("b".into()),
            last_message: "hi".into(),
        });
        assert_eq!(session.version, 1);
        assert_eq!(session.resume.awaiting(), Some("b"));
        assert_eq!(session.last_message.as_deref(), Some("hi"));
    }
}
