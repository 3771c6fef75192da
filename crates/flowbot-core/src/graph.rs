use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{FlowbotError, Result};

/// A chatbot conversation graph as exported by the flow builder.
///
/// The engine treats it as read-only input. Node payloads are validated when
/// the graph is deserialized, so handlers never probe an untyped data bag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowGraph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// A node in the flow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
}

/// Typed node payload, keyed by the builder's `type` string.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Trigger(TriggerData),
    Message(MessageData),
    Image(ImageData),
    ButtonMessage(ButtonMessageData),
    Condition(ConditionData),
    Ai(AiData),
    Action(ActionData),
    /// A `type` this engine does not know. Kept so the run can stop on it.
    Unknown {
        kind: String,
        data: serde_json::Value,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerData {
    #[serde(default, alias = "message", deserialize_with = "null_as_default")]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    #[serde(default, alias = "message", deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(default, alias = "images", deserialize_with = "null_as_default")]
    pub media: Vec<MediaItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageData {
    #[serde(default, alias = "images", deserialize_with = "null_as_default")]
    pub media: Vec<MediaItem>,
}

/// One image attached to a message or image node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub caption: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonMessageData {
    #[serde(default, alias = "prompt", deserialize_with = "null_as_default")]
    pub text: String,
    /// Option labels, in display order. The builder stores either plain
    /// strings or `{label}` objects.
    #[serde(default, deserialize_with = "deserialize_button_labels")]
    pub buttons: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionData {
    #[serde(default, alias = "condition", deserialize_with = "null_as_default")]
    pub expression: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiData {
    #[serde(default, alias = "systemPrompt", deserialize_with = "null_as_default")]
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionData {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<String>,
}

fn default_method() -> String {
    "POST".to_string()
}

/// A directed connection between two nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: EdgeData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeData {
    /// Which condition outcome this edge belongs to.
    #[serde(
        default,
        deserialize_with = "deserialize_branch",
        skip_serializing_if = "Option::is_none"
    )]
    pub branch: Option<bool>,
}

/// A load-time finding about a graph. None of these stop a run; they flag
/// graphs that will behave surprisingly.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphDiagnostic {
    pub node_id: Option<String>,
    pub message: String,
}

impl fmt::Display for GraphDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            Some(id) => write!(f, "[{}] {}", id, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl FlowGraph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    /// Parse a graph from the builder's JSON export.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| FlowbotError::InvalidGraph(e.to_string()))
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges leaving `id`, in graph order.
    pub fn outgoing(&self, id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.source == id).collect()
    }

    pub fn triggers(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Trigger(_)))
    }

    /// The entry point. With several triggers the first one wins.
    pub fn trigger(&self) -> Option<&Node> {
        self.triggers().next()
    }

    /// Structural findings: missing or duplicate triggers, dangling edges,
    /// duplicate ids and unknown node types.
    pub fn diagnostics(&self) -> Vec<GraphDiagnostic> {
        let mut out = Vec::new();

        match self.triggers().count() {
            0 => out.push(GraphDiagnostic {
                node_id: None,
                message: "graph has no trigger node".into(),
            }),
            1 => {}
            n => out.push(GraphDiagnostic {
                node_id: self.trigger().map(|t| t.id.clone()),
                message: format!("graph has {} trigger nodes, only the first is used", n),
            }),
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                out.push(GraphDiagnostic {
                    node_id: Some(node.id.clone()),
                    message: "duplicate node id".into(),
                });
            }
            if let NodeKind::Unknown { kind, .. } = &node.kind {
                out.push(GraphDiagnostic {
                    node_id: Some(node.id.clone()),
                    message: format!("unknown node type '{}'", kind),
                });
            }
        }

        for edge in &self.edges {
            for end in [&edge.source, &edge.target] {
                if !seen.contains(end.as_str()) {
                    out.push(GraphDiagnostic {
                        node_id: Some(end.clone()),
                        message: format!("edge '{}' references a missing node", edge.id),
                    });
                }
            }
        }

        out
    }
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }

    pub fn trigger(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Trigger(TriggerData { text: text.into() }))
    }

    pub fn message(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeKind::Message(MessageData {
                text: text.into(),
                media: vec![],
            }),
        )
    }

    pub fn image(id: impl Into<String>, media: Vec<MediaItem>) -> Self {
        Self::new(id, NodeKind::Image(ImageData { media }))
    }

    pub fn buttons<S: Into<String>>(
        id: impl Into<String>,
        text: impl Into<String>,
        buttons: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::new(
            id,
            NodeKind::ButtonMessage(ButtonMessageData {
                text: text.into(),
                buttons: buttons.into_iter().map(Into::into).collect(),
            }),
        )
    }

    pub fn condition(id: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeKind::Condition(ConditionData {
                expression: expression.into(),
            }),
        )
    }

    pub fn ai(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeKind::Ai(AiData {
                prompt: prompt.into(),
            }),
        )
    }

    pub fn action(id: impl Into<String>, method: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeKind::Action(ActionData {
                method: method.into(),
                url: url.into(),
                confirmation: None,
            }),
        )
    }

    /// Attach media to a message node. Other kinds are returned unchanged.
    pub fn with_media(mut self, items: Vec<MediaItem>) -> Self {
        if let NodeKind::Message(data) = &mut self.kind {
            data.media = items;
        }
        self
    }
}

impl NodeKind {
    /// The builder's `type` string.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Trigger(_) => "trigger",
            Self::Message(_) => "message",
            Self::Image(_) => "image",
            Self::ButtonMessage(_) => "buttonMessage",
            Self::Condition(_) => "condition",
            Self::Ai(_) => "ai",
            Self::Action(_) => "action",
            Self::Unknown { kind, .. } => kind,
        }
    }
}

impl MediaItem {
    pub fn new(url: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            caption: caption.into(),
        }
    }
}

impl Edge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            label: None,
            data: EdgeData::default(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_branch(mut self, branch: bool) -> Self {
        self.data.branch = Some(branch);
        self
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("")
    }
}

/// The node shape on the wire: `{id, type, data}` plus builder-only fields we ignore.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawNode {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl TryFrom<RawNode> for Node {
    type Error = FlowbotError;

    fn try_from(raw: RawNode) -> Result<Self> {
        let data = match raw.data {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other,
        };

        fn payload<T: serde::de::DeserializeOwned>(
            id: &str,
            data: serde_json::Value,
        ) -> Result<T> {
            serde_json::from_value(data).map_err(|e| FlowbotError::InvalidNode {
                node_id: id.to_string(),
                message: e.to_string(),
            })
        }

        let kind = match raw.kind.as_str() {
            "trigger" => NodeKind::Trigger(payload(&raw.id, data)?),
            "message" => NodeKind::Message(payload(&raw.id, data)?),
            "image" => NodeKind::Image(payload(&raw.id, data)?),
            "buttonMessage" => NodeKind::ButtonMessage(payload(&raw.id, data)?),
            "condition" => NodeKind::Condition(payload(&raw.id, data)?),
            "ai" => NodeKind::Ai(payload(&raw.id, data)?),
            "action" => NodeKind::Action(payload(&raw.id, data)?),
            _ => NodeKind::Unknown {
                kind: raw.kind,
                data,
            },
        };

        Ok(Node { id: raw.id, kind })
    }
}

impl From<Node> for RawNode {
    fn from(node: Node) -> Self {
        let kind = node.kind.type_name().to_string();
        let data = match node.kind {
            NodeKind::Trigger(d) => serde_json::to_value(d),
            NodeKind::Message(d) => serde_json::to_value(d),
            NodeKind::Image(d) => serde_json::to_value(d),
            NodeKind::ButtonMessage(d) => serde_json::to_value(d),
            NodeKind::Condition(d) => serde_json::to_value(d),
            NodeKind::Ai(d) => serde_json::to_value(d),
            NodeKind::Action(d) => serde_json::to_value(d),
            NodeKind::Unknown { data, .. } => Ok(data),
        };
        RawNode {
            id: node.id,
            kind,
            data: data.unwrap_or_default(),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn deserialize_button_labels<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ButtonLabel {
        Plain(String),
        Labeled { label: String },
    }

    let labels: Option<Vec<ButtonLabel>> = Option::deserialize(deserializer)?;
    Ok(labels
        .unwrap_or_default()
        .into_iter()
        .map(|b| match b {
            ButtonLabel::Plain(s) => s,
            ButtonLabel::Labeled { label } => label,
        })
        .collect())
}

fn deserialize_branch<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Branch {
        Flag(bool),
        Text(String),
    }

    Ok(match Option::<Branch>::deserialize(deserializer)? {
        Some(Branch::Flag(b)) => Some(b),
        Some(Branch::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        None => None,
    })
}
