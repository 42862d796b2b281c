//! Development execution engine
//!
//! `EngineRun` replays a graph as the frame sequence a real engine would
//! produce. It is a plain state machine: every action in, a batch of frames
//! out. Timing (stream pacing) belongs to the socket layer.

use flowcore::variables::token;
use flowcore::{
    ActionFrame, ActionKind, ChoiceOption, EventCategory, EventFrame, EventKind, FormField, Graph,
    GraphDocument, InputSchema, Node, NodeId, NodeMessage, Value, FORM_INPUT_TAB, WILDCARD_NODE,
};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use uuid::Uuid;

/// Output key of interactive output nodes.
pub const OUTPUT_RESULT_KEY: &str = "output_result";

/// What the run is paused on.
#[derive(Debug, Clone, PartialEq)]
enum Waiting {
    Input(NodeId),
    Output(NodeId),
}

impl Waiting {
    fn node_id(&self) -> &str {
        match self {
            Waiting::Input(id) | Waiting::Output(id) => id,
        }
    }
}

pub struct EngineRun {
    chat_id: String,
    graph: Option<Graph>,
    order: Vec<NodeId>,
    cursor: usize,
    waiting: Option<Waiting>,
    values: HashMap<String, String>,
}

impl EngineRun {
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            graph: None,
            order: Vec::new(),
            cursor: 0,
            waiting: None,
            values: HashMap::new(),
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting.is_some()
    }

    /// Value a node produced or was given, by `nodeId.key`.
    pub fn value(&self, node_id: &str, key: &str) -> Option<&str> {
        self.values
            .get(&format!("{}.{}", node_id, key))
            .map(String::as_str)
    }

    pub fn handle(&mut self, action: &ActionFrame) -> Vec<EventFrame> {
        tracing::debug!(chat_id = %self.chat_id, action = ?action.action, "engine action");
        match action.action {
            ActionKind::InitData => self.init(&action.data),
            ActionKind::Input => self.input(action),
            ActionKind::Stop => self.stop(),
        }
    }

    /// Frame for an action that could not be processed at all.
    pub fn rejection(&self, reason: impl Into<String>) -> EventFrame {
        self.frame(EventCategory::Error, EventKind::Over)
            .with_text(reason)
    }

    fn init(&mut self, data: &JsonValue) -> Vec<EventFrame> {
        let document: GraphDocument = match serde_json::from_value(data.clone()) {
            Ok(document) => document,
            Err(e) => return vec![self.rejection(format!("Invalid graph: {}", e))],
        };
        let graph = Graph::from_document(document);
        let order = match graph.execution_order() {
            Ok(order) => order,
            Err(e) => {
                return vec![
                    self.rejection(format!("Cannot run graph: {}", e)),
                    self.frame(EventCategory::Processing, EventKind::Close),
                ]
            }
        };

        tracing::info!(chat_id = %self.chat_id, nodes = order.len(), "run loaded");
        self.graph = Some(graph);
        self.order = order;
        self.cursor = 0;
        self.waiting = None;
        self.values.clear();
        self.advance()
    }

    fn input(&mut self, action: &ActionFrame) -> Vec<EventFrame> {
        if self.graph.is_none() {
            return vec![self.rejection("No graph loaded; send init_data first")];
        }
        for (node_id, submitted) in action.node_inputs() {
            self.store(node_id, submitted);
        }

        let mut frames = Vec::new();
        match self.waiting.take() {
            Some(waiting) => {
                let resumed = waiting.node_id().to_string();
                if action.node_inputs().all(|(node_id, _)| node_id != &resumed) {
                    tracing::warn!(chat_id = %self.chat_id, node_id = %resumed, "input for a node that is not waiting");
                    self.waiting = Some(waiting);
                    return vec![self.rejection(format!("Waiting for input on node {}", resumed))];
                }
                frames.push(self.node_over(&resumed, None));
            }
            None => {
                // A new round starts at the first input node.
                let first_input = self.order.iter().position(|id| {
                    self.node(id).map(|n| n.node_type == "input").unwrap_or(false)
                });
                match first_input {
                    Some(index) => self.cursor = index + 1,
                    None => return vec![self.rejection("This graph takes no input")],
                }
            }
        }
        frames.extend(self.advance());
        frames
    }

    fn stop(&mut self) -> Vec<EventFrame> {
        tracing::info!(chat_id = %self.chat_id, "run stopped");
        self.waiting = None;
        self.cursor = self.order.len();
        vec![
            self.frame(EventCategory::NodeRun, EventKind::Over)
                .with_node(NodeMessage::for_node(WILDCARD_NODE)),
            self.frame(EventCategory::Processing, EventKind::Close),
        ]
    }

    /// Run nodes until one waits for the user or the graph is exhausted.
    fn advance(&mut self) -> Vec<EventFrame> {
        let mut frames = Vec::new();
        while self.cursor < self.order.len() {
            let node_id = self.order[self.cursor].clone();
            self.cursor += 1;
            let Some(node) = self.node(&node_id).cloned() else {
                continue;
            };

            frames.push(
                self.frame(EventCategory::NodeRun, EventKind::Start)
                    .with_node(NodeMessage::for_node(&node.id).with_name(&node.name)),
            );
            match node.node_type.as_str() {
                "start" => frames.extend(self.run_start(&node)),
                "input" => {
                    frames.push(self.run_input(&node));
                    self.waiting = Some(Waiting::Input(node.id.clone()));
                    return frames;
                }
                "llm" => frames.extend(self.run_llm(&node)),
                "output" => {
                    let (output, waits) = self.run_output(&node);
                    frames.push(output);
                    if waits {
                        self.waiting = Some(Waiting::Output(node.id.clone()));
                        return frames;
                    }
                }
                "end" => {
                    frames.push(self.node_over(&node.id, None));
                    self.cursor = self.order.len();
                    break;
                }
                other => {
                    tracing::warn!(node_id = %node.id, node_type = other, "unsupported node type");
                    frames.push(self.rejection(format!(
                        "Node '{}' has unsupported type '{}'",
                        node.name, other
                    )));
                    frames.push(self.node_over(&node.id, Some("unsupported node type")));
                    continue;
                }
            }
            frames.push(self.node_over(&node.id, None));
        }
        frames.push(self.frame(EventCategory::Processing, EventKind::Close));
        frames
    }

    fn run_start(&self, node: &Node) -> Vec<EventFrame> {
        let mut frames = Vec::new();
        let questions: Vec<String> = node
            .parameter("guide_question")
            .and_then(|p| p.value.as_array())
            .map(|items| items.iter().filter_map(|q| q.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        if !questions.is_empty() {
            frames.push(
                self.frame(EventCategory::GuideQuestion, EventKind::Over)
                    .with_node(NodeMessage::for_node(&node.id).with_guide_questions(questions)),
            );
        }
        if let Some(word) = self.text_parameter(node, "guide_word") {
            frames.push(
                self.frame(EventCategory::OutputMsg, EventKind::Over)
                    .with_message_id(Uuid::new_v4().to_string())
                    .with_node(NodeMessage::for_node(&node.id).with_msg(word)),
            );
        }
        frames
    }

    fn run_input(&self, node: &Node) -> EventFrame {
        let mut message = NodeMessage::for_node(&node.id).with_name(&node.name);
        if node.active_tab() == Some(FORM_INPUT_TAB) {
            let fields = node
                .parameter(FORM_INPUT_TAB)
                .and_then(|p| p.value.as_array())
                .unwrap_or_default()
                .iter()
                .filter_map(form_field)
                .collect();
            message = message.with_input_schema(InputSchema {
                tab: Some(FORM_INPUT_TAB.to_string()),
                value: fields,
            });
        } else if let Some(prompt) = self.text_parameter(node, "input_msg") {
            message = message.with_msg(prompt);
        }
        self.frame(EventCategory::UserInput, EventKind::Over)
            .with_node(message)
    }

    /// Echo the rendered prompt back, one word per stream frame.
    fn run_llm(&mut self, node: &Node) -> Vec<EventFrame> {
        let reply = self.text_parameter(node, "user_prompt").unwrap_or_default();
        let unique_id = Uuid::new_v4().simple().to_string();
        let chunk = |text: &str| {
            NodeMessage::for_node(&node.id)
                .with_output(unique_id.clone(), "output")
                .with_msg(text)
        };

        let mut frames: Vec<EventFrame> = reply
            .split_inclusive(' ')
            .map(|word| {
                self.frame(EventCategory::StreamMsg, EventKind::Stream)
                    .with_node(chunk(word))
            })
            .collect();
        frames.push(
            self.frame(EventCategory::StreamMsg, EventKind::Over)
                .with_node(chunk("")),
        );
        self.values.insert(format!("{}.output", node.id), reply);
        frames
    }

    /// Returns the output frame and whether the node now waits for the user.
    fn run_output(&mut self, node: &Node) -> (EventFrame, bool) {
        let text = self.text_parameter(node, "message").unwrap_or_default();
        let unique_id = Uuid::new_v4().simple().to_string();
        let message = NodeMessage::for_node(&node.id)
            .with_output(unique_id, OUTPUT_RESULT_KEY)
            .with_msg(text);

        match self.text_parameter(node, "output_type").as_deref() {
            Some("choice") => {
                let options = node
                    .parameter("options")
                    .and_then(|p| p.value.as_array())
                    .unwrap_or_default()
                    .iter()
                    .filter_map(choice_option)
                    .collect();
                let frame = self
                    .frame(EventCategory::OutputWithChooseMsg, EventKind::Over)
                    .with_node(message.with_options(options));
                (frame, true)
            }
            Some("input") => {
                let default = self.text_parameter(node, "default").unwrap_or_default();
                let frame = self
                    .frame(EventCategory::OutputWithInputMsg, EventKind::Over)
                    .with_node(message.with_input_msg(default));
                (frame, true)
            }
            _ => (
                self.frame(EventCategory::OutputMsg, EventKind::Over)
                    .with_node(message),
                false,
            ),
        }
    }

    fn node(&self, node_id: &str) -> Option<&Node> {
        self.graph.as_ref()?.node(node_id)
    }

    /// A string parameter with references replaced by run values. Unknown
    /// references render as empty text.
    fn text_parameter(&self, node: &Node, key: &str) -> Option<String> {
        let raw = node.parameter(key)?.value.as_str()?;
        Some(token::substitute(raw, |reference| {
            if let Some(value) = self.values.get(&reference.to_string()) {
                return Some(value.clone());
            }
            self.node(&reference.node_id)?
                .parameter(&reference.key)?
                .value
                .as_str()
                .map(str::to_string)
        }))
    }

    fn store(&mut self, node_id: &str, submitted: &Map<String, JsonValue>) {
        for (key, value) in submitted {
            let text = match value {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            self.values.insert(format!("{}.{}", node_id, key), text);
        }
    }

    fn node_over(&self, node_id: &str, reason: Option<&str>) -> EventFrame {
        let mut message = NodeMessage::for_node(node_id);
        if let Some(reason) = reason {
            message = message.with_reason(reason);
        }
        self.frame(EventCategory::NodeRun, EventKind::Over)
            .with_node(message)
    }

    fn frame(&self, category: EventCategory, kind: EventKind) -> EventFrame {
        EventFrame::new(category, kind).with_chat_id(&self.chat_id)
    }
}

fn form_field(item: &Value) -> Option<FormField> {
    let key = item.get("key")?.as_str()?.to_string();
    Some(FormField {
        key,
        label: item.get("label").and_then(Value::as_str).map(str::to_string),
        required: item.get("required").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn choice_option(item: &Value) -> Option<ChoiceOption> {
    let id = item.get("id")?.as_str()?;
    let label = item.get("label").and_then(Value::as_str).unwrap_or(id);
    Some(ChoiceOption::new(id, label))
}
