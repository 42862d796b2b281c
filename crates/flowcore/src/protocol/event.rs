use crate::error::ProtocolError;
use crate::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Node id used by the engine to address every node at once.
pub const WILDCARD_NODE: &str = "*";

/// Input-schema tab that asks for a form rather than free text.
pub const FORM_INPUT_TAB: &str = "form_input";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    NodeRun,
    UserInput,
    GuideQuestion,
    Error,
    OutputMsg,
    StreamMsg,
    OutputWithChooseMsg,
    OutputWithInputMsg,
    Processing,
}

impl EventCategory {
    /// Categories whose frames carry bot output into the timeline.
    pub fn is_output(self) -> bool {
        matches!(
            self,
            EventCategory::OutputMsg
                | EventCategory::StreamMsg
                | EventCategory::OutputWithChooseMsg
                | EventCategory::OutputWithInputMsg
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    #[serde(alias = "end")]
    Over,
    Stream,
    Close,
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        f.write_str(&name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Start => "start",
            EventKind::Over => "over",
            EventKind::Stream => "stream",
            EventKind::Close => "close",
        };
        f.write_str(name)
    }
}

/// Engine → client frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventFrame {
    pub category: EventCategory,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<EventMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum EventMessage {
    Text(String),
    Node(NodeMessage),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<ChoiceOption>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<InputSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guide_question: Option<Vec<String>>,
}

impl NodeMessage {
    pub fn for_node(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: Some(node_id.into()),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_output(mut self, unique_id: impl Into<String>, output_key: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self.output_key = Some(output_key.into());
        self
    }

    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(JsonValue::String(msg.into()));
        self
    }

    pub fn with_options(mut self, options: Vec<ChoiceOption>) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_input_msg(mut self, input_msg: impl Into<String>) -> Self {
        self.input_msg = Some(input_msg.into());
        self
    }

    pub fn with_input_schema(mut self, schema: InputSchema) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_guide_questions(mut self, questions: Vec<String>) -> Self {
        self.guide_question = Some(questions);
        self
    }

    /// `msg` as text; structured payloads are rendered as JSON.
    pub fn msg_text(&self) -> Option<String> {
        match self.msg.as_ref()? {
            JsonValue::Null => None,
            JsonValue::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChoiceOption {
    pub id: String,
    pub label: String,
}

impl ChoiceOption {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InputSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab: Option<String>,
    #[serde(default)]
    pub value: Vec<FormField>,
}

impl InputSchema {
    pub fn is_form(&self) -> bool {
        self.tab.as_deref() == Some(FORM_INPUT_TAB)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormField {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub required: bool,
}

impl EventFrame {
    pub fn new(category: EventCategory, kind: EventKind) -> Self {
        Self {
            category,
            kind,
            chat_id: None,
            message_id: None,
            message: None,
        }
    }

    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_node(mut self, message: NodeMessage) -> Self {
        self.message = Some(EventMessage::Node(message));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.message = Some(EventMessage::Text(text.into()));
        self
    }

    /// Parse and check one inbound frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let frame: EventFrame =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        frame.check()?;
        Ok(frame)
    }

    fn check(&self) -> Result<(), ProtocolError> {
        let missing = |field| ProtocolError::MissingField {
            category: self.category.to_string(),
            kind: self.kind.to_string(),
            field,
        };
        match self.category {
            EventCategory::NodeRun | EventCategory::UserInput if self.node_id().is_none() => {
                return Err(missing("message.node_id"));
            }
            _ => {}
        }
        if self.kind == EventKind::Stream && self.text().is_none() {
            return Err(missing("message.msg"));
        }
        Ok(())
    }

    pub fn node(&self) -> Option<&NodeMessage> {
        match self.message.as_ref()? {
            EventMessage::Node(node) => Some(node),
            EventMessage::Text(_) => None,
        }
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node()?.node_id.as_deref()
    }

    /// Text carried by the frame, whichever message shape it uses.
    pub fn text(&self) -> Option<String> {
        match self.message.as_ref()? {
            EventMessage::Text(text) => Some(text.clone()),
            EventMessage::Node(node) => node.msg_text(),
        }
    }

    /// Timeline key of an output message: `unique_id-output_key`, falling
    /// back to the frame's `message_id`.
    pub fn output_key(&self) -> Option<String> {
        if let Some(node) = self.node() {
            if let Some(unique_id) = node.unique_id.as_deref() {
                return Some(match node.output_key.as_deref() {
                    Some(key) => format!("{}-{}", unique_id, key),
                    None => unique_id.to_string(),
                });
            }
        }
        self.message_id.clone()
    }

    /// Failure text on a terminal node-run frame.
    pub fn failure_reason(&self) -> Option<&str> {
        self.node()?
            .reason
            .as_deref()
            .filter(|reason| !reason.trim().is_empty())
    }

    pub fn is_wildcard(&self) -> bool {
        self.node_id() == Some(WILDCARD_NODE)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
