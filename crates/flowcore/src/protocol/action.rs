use crate::graph::GraphDocument;
use crate::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Input,
    InitData,
    Stop,
}

/// Client → engine frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionFrame {
    pub action: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub data: JsonValue,
}

impl ActionFrame {
    /// Hand the engine the graph to run.
    pub fn init_data(document: &GraphDocument) -> Self {
        Self {
            action: ActionKind::InitData,
            chat_id: None,
            data: serde_json::to_value(document).unwrap_or(JsonValue::Null),
        }
    }

    /// Submit values for one node: `data: {node_id: {key: value, ...}}`.
    pub fn input(node_id: &str, values: Map<String, JsonValue>) -> Self {
        let mut data = Map::new();
        data.insert(node_id.to_string(), JsonValue::Object(values));
        Self {
            action: ActionKind::Input,
            chat_id: None,
            data: JsonValue::Object(data),
        }
    }

    pub fn input_value(node_id: &str, key: &str, value: impl Into<JsonValue>) -> Self {
        let mut values = Map::new();
        values.insert(key.to_string(), value.into());
        Self::input(node_id, values)
    }

    pub fn stop() -> Self {
        Self {
            action: ActionKind::Stop,
            chat_id: None,
            data: json!({}),
        }
    }

    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    /// Per-node values of an `input` action.
    pub fn node_inputs(&self) -> impl Iterator<Item = (&NodeId, &Map<String, JsonValue>)> {
        self.data
            .as_object()
            .into_iter()
            .flat_map(|data| data.iter())
            .filter_map(|(node_id, values)| values.as_object().map(|v| (node_id, v)))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
