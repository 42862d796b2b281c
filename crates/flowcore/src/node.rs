use crate::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub type NodeId = String;

/// Node type of the graph's designated entry node.
pub const ENTRY_NODE_TYPE: &str = "start";

/// A typed unit of work in the graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab: Option<TabSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl Node {
    /// Create a node with a freshly generated id (`<type>_<5 hex chars>`).
    pub fn new(node_type: impl Into<String>, name: impl Into<String>) -> Self {
        let node_type = node_type.into();
        Self {
            id: generate_node_id(&node_type),
            node_type,
            name: name.into(),
            description: None,
            parameters: Vec::new(),
            tab: None,
            position: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<NodeId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_tab(mut self, value: impl Into<String>, options: &[&str]) -> Self {
        self.tab = Some(TabSelector {
            value: value.into(),
            options: options.iter().map(|o| o.to_string()).collect(),
        });
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    pub fn is_entry(&self) -> bool {
        self.node_type == ENTRY_NODE_TYPE
    }

    pub fn parameter(&self, key: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.key == key)
    }

    pub fn parameter_mut(&mut self, key: &str) -> Option<&mut Parameter> {
        self.parameters.iter_mut().find(|p| p.key == key)
    }

    /// Name of the active tab, for tab-scoped nodes.
    pub fn active_tab(&self) -> Option<&str> {
        self.tab.as_ref().map(|t| t.value.as_str())
    }

    /// A parameter bound to a tab other than the active one is hidden: it is
    /// neither exported nor validated nor submitted.
    pub fn is_active(&self, parameter: &Parameter) -> bool {
        match (&parameter.tab, self.active_tab()) {
            (Some(tab), Some(active)) => tab == active,
            _ => true,
        }
    }

    pub fn active_parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(move |p| self.is_active(p))
    }
}

/// One entry of a node's parameter schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Parameter {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab: Option<String>,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<Export>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    /// Label last shown for each reference token (`nodeId.key`) in this field.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub var_labels: BTreeMap<String, String>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Parameter {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            label: None,
            tab: None,
            value: value.into(),
            global: None,
            required: false,
            var_labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_tab(mut self, tab: impl Into<String>) -> Self {
        self.tab = Some(tab.into());
        self
    }

    /// Export the parameter itself as `nodeId.key`.
    pub fn exported(mut self) -> Self {
        self.global = Some(Export::Key);
        self
    }

    /// Export every `{key, label}` item of a list value as `nodeId.itemKey`.
    pub fn exported_items(mut self) -> Self {
        self.global = Some(Export::Items);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.key)
    }
}

/// How a parameter exposes itself to references from other nodes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Export {
    Key,
    Items,
}

/// Active tab of a tab-scoped node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TabSelector {
    pub value: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// Node position in the visual editor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

pub fn generate_node_id(node_type: &str) -> NodeId {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", node_type, &suffix[..5])
}

/// First free name in the sequence `name, name(2), name(3), ...`.
///
/// An existing `(n)` suffix is stripped first, so copying `LLM(2)` yields
/// `LLM(3)` rather than `LLM(2)(2)`.
pub fn unique_name<'a>(name: &str, taken: impl IntoIterator<Item = &'a str> + Clone) -> String {
    let base = strip_copy_suffix(name);
    let is_taken = |candidate: &str| taken.clone().into_iter().any(|t| t == candidate);

    if !is_taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}({})", base, n))
        .find(|candidate| !is_taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

fn strip_copy_suffix(name: &str) -> &str {
    if let Some(open) = name.rfind('(') {
        let tail = &name[open + 1..];
        if let Some(digits) = tail.strip_suffix(')') {
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                return &name[..open];
            }
        }
    }
    name
}
