//! Timeline reconciler
//!
//! Turns the engine's frame stream into an ordered transcript. Entries are
//! never reordered: bot output is merged in place while streaming and frozen
//! once complete, and the transient "node running" entries are removed when
//! their node finishes.

use crate::interaction::{PendingInteraction, DEFAULT_INPUT_VARIABLE};
use chrono::{DateTime, Utc};
use flowcore::{ChoiceOption, EventCategory, EventFrame, EventKind, NodeId};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Variable an interactive output node stores its answer under by default.
const DEFAULT_OUTPUT_VARIABLE: &str = "output";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageCategory {
    User,
    BotOutput,
    Separator,
    NodeRun,
    ChoiceInteraction,
    TextInteraction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    User,
    Bot,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Text {
        text: String,
    },
    NodeRun {
        node_id: NodeId,
        name: Option<String>,
    },
    Choice {
        text: String,
        options: Vec<ChoiceOption>,
    },
    TextPrompt {
        text: String,
        default: Option<String>,
    },
    Separator {
        reason: Option<String>,
    },
}

impl Payload {
    pub fn text(&self) -> Option<&str> {
        match self {
            Payload::Text { text }
            | Payload::Choice { text, .. }
            | Payload::TextPrompt { text, .. } => Some(text),
            Payload::NodeRun { .. } | Payload::Separator { .. } => None,
        }
    }

    fn text_mut(&mut self) -> Option<&mut String> {
        match self {
            Payload::Text { text }
            | Payload::Choice { text, .. }
            | Payload::TextPrompt { text, .. } => Some(text),
            Payload::NodeRun { .. } | Payload::Separator { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: String,
    pub category: MessageCategory,
    pub sender: SenderRole,
    pub payload: Payload,
    pub complete: bool,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(id: String, category: MessageCategory, sender: SenderRole, payload: Payload) -> Self {
        Self {
            id,
            category,
            sender,
            payload,
            complete: true,
            timestamp: Utc::now(),
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.payload.text()
    }
}

/// Incremental change for renderers.
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineChange {
    Appended(String),
    Updated(String),
    Completed(String),
    Removed(String),
    InteractionRequested(PendingInteraction),
    InteractionCleared,
    GuideQuestions(Vec<String>),
}

#[derive(Debug, Default)]
pub struct Timeline {
    entries: BTreeMap<u64, Message>,
    index: HashMap<String, u64>,
    next_seq: u64,
    pending: Option<PendingInteraction>,
    guide_questions: Vec<String>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages in display order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.values()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.index.get(id).and_then(|seq| self.entries.get(seq))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending(&self) -> Option<&PendingInteraction> {
        self.pending.as_ref()
    }

    pub fn guide_questions(&self) -> &[String] {
        &self.guide_questions
    }

    pub fn clear_pending(&mut self) -> Option<TimelineChange> {
        self.pending.take().map(|_| TimelineChange::InteractionCleared)
    }

    pub fn push_user(&mut self, text: impl Into<String>) -> TimelineChange {
        let message = Message::new(
            Uuid::new_v4().to_string(),
            MessageCategory::User,
            SenderRole::User,
            Payload::Text { text: text.into() },
        );
        self.append(message)
    }

    /// End of a round: a separator, no lingering node-run entries and
    /// nothing left to answer.
    pub fn round_over(&mut self, reason: Option<String>) -> Vec<TimelineChange> {
        let mut changes = self.remove_node_runs();
        let separator = Message::new(
            Uuid::new_v4().to_string(),
            MessageCategory::Separator,
            SenderRole::System,
            Payload::Separator { reason },
        );
        changes.push(self.append(separator));
        changes.extend(self.clear_pending());
        changes
    }

    /// The connection went away mid-round: drop what only a live run can
    /// finish, without marking the round as over.
    pub fn interrupt(&mut self) -> Vec<TimelineChange> {
        let mut changes = self.remove_node_runs();
        changes.extend(self.clear_pending());
        changes
    }

    /// Fold one frame into the timeline.
    pub fn apply(&mut self, frame: &EventFrame) -> Vec<TimelineChange> {
        if frame.category == EventCategory::Error {
            return Vec::new();
        }
        if frame.kind == EventKind::Close {
            return self.round_over(frame.text().filter(|t| !t.is_empty()));
        }

        match frame.category {
            EventCategory::NodeRun => self.node_run(frame),
            EventCategory::UserInput => self.user_input(frame),
            EventCategory::GuideQuestion => {
                let questions = frame
                    .node()
                    .and_then(|n| n.guide_question.clone())
                    .unwrap_or_default();
                self.guide_questions = questions.clone();
                vec![TimelineChange::GuideQuestions(questions)]
            }
            category if category.is_output() => match frame.kind {
                EventKind::Stream | EventKind::Start => self.delta(frame),
                _ => self.finalize(frame),
            },
            _ => {
                tracing::debug!(category = %frame.category, kind = %frame.kind, "frame ignored by timeline");
                Vec::new()
            }
        }
    }

    fn delta(&mut self, frame: &EventFrame) -> Vec<TimelineChange> {
        let Some(id) = frame.output_key() else {
            tracing::warn!(category = %frame.category, "streamed output without a message id");
            return Vec::new();
        };
        let delta = frame.text().unwrap_or_default();

        let Some(seq) = self.index.get(&id).copied() else {
            let mut message = Message::new(
                id,
                MessageCategory::BotOutput,
                SenderRole::Bot,
                Payload::Text { text: delta },
            );
            message.complete = false;
            return vec![self.append(message)];
        };
        let Some(message) = self.entries.get_mut(&seq) else {
            return Vec::new();
        };

        if message.complete {
            tracing::warn!(message_id = %id, "delta for a completed message dropped");
            return Vec::new();
        }
        if delta.is_empty() {
            return Vec::new();
        }
        if let Some(text) = message.payload.text_mut() {
            text.push_str(&delta);
        }
        vec![TimelineChange::Updated(id)]
    }

    fn finalize(&mut self, frame: &EventFrame) -> Vec<TimelineChange> {
        let id = frame
            .output_key()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let final_text = frame.text().filter(|t| !t.is_empty());
        let node = frame.node();

        let existing = self.index.get(&id).copied();
        let mut changes = match existing.and_then(|seq| self.entries.get_mut(&seq)) {
            Some(message) if message.complete => {
                tracing::warn!(message_id = %id, "repeated terminal frame ignored");
                return Vec::new();
            }
            Some(message) => {
                let text = final_text
                    .or_else(|| message.text().map(str::to_string))
                    .unwrap_or_default();
                let (category, payload) = output_payload(frame, text);
                message.category = category;
                message.payload = payload;
                message.complete = true;
                vec![TimelineChange::Completed(id.clone())]
            }
            None => {
                let (category, payload) = output_payload(frame, final_text.unwrap_or_default());
                let message = Message::new(id.clone(), category, SenderRole::Bot, payload);
                vec![self.append(message)]
            }
        };

        let node_id = node.and_then(|n| n.node_id.clone()).unwrap_or_default();
        let variable = node
            .and_then(|n| n.output_key.clone())
            .unwrap_or_else(|| DEFAULT_OUTPUT_VARIABLE.to_string());
        let pending = match frame.category {
            EventCategory::OutputWithChooseMsg => Some(PendingInteraction::Choice {
                node_id,
                message_id: id,
                variable,
                options: node.and_then(|n| n.options.clone()).unwrap_or_default(),
            }),
            EventCategory::OutputWithInputMsg => Some(PendingInteraction::Text {
                node_id,
                variable,
                prompt: None,
                default: node.and_then(|n| n.input_msg.clone()),
            }),
            _ => None,
        };
        if let Some(pending) = pending {
            changes.push(self.request(pending));
        }
        changes
    }

    fn node_run(&mut self, frame: &EventFrame) -> Vec<TimelineChange> {
        if frame.is_wildcard() {
            return self.remove_node_runs();
        }
        let Some(node_id) = frame.node_id() else {
            return Vec::new();
        };
        let id = node_run_id(node_id);

        match frame.kind {
            EventKind::Start => {
                let mut changes: Vec<_> = self.remove(&id).into_iter().collect();
                let name = frame.node().and_then(|n| n.name.clone());
                let message = Message::new(
                    id,
                    MessageCategory::NodeRun,
                    SenderRole::System,
                    Payload::NodeRun {
                        node_id: node_id.to_string(),
                        name,
                    },
                );
                changes.push(self.append(message));
                changes
            }
            EventKind::Over => self.remove(&id).into_iter().collect(),
            other => {
                tracing::debug!(node_id, kind = %other, "node_run frame ignored by timeline");
                Vec::new()
            }
        }
    }

    fn user_input(&mut self, frame: &EventFrame) -> Vec<TimelineChange> {
        let Some(node) = frame.node() else {
            return Vec::new();
        };
        let node_id = node.node_id.clone().unwrap_or_default();
        let schema = node.input_schema.clone().unwrap_or_default();

        let pending = if schema.is_form() {
            PendingInteraction::Form {
                node_id,
                fields: schema.value,
            }
        } else {
            let variable = schema
                .value
                .first()
                .map(|field| field.key.clone())
                .unwrap_or_else(|| DEFAULT_INPUT_VARIABLE.to_string());
            PendingInteraction::Text {
                node_id,
                variable,
                prompt: node.msg_text().filter(|t| !t.is_empty()),
                default: node.input_msg.clone(),
            }
        };
        vec![self.request(pending)]
    }

    fn request(&mut self, pending: PendingInteraction) -> TimelineChange {
        tracing::debug!(node_id = %pending.node_id(), shape = pending.shape(), "interaction requested");
        self.pending = Some(pending.clone());
        TimelineChange::InteractionRequested(pending)
    }

    fn append(&mut self, message: Message) -> TimelineChange {
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = message.id.clone();
        self.index.insert(id.clone(), seq);
        self.entries.insert(seq, message);
        TimelineChange::Appended(id)
    }

    fn remove(&mut self, id: &str) -> Option<TimelineChange> {
        let seq = self.index.remove(id)?;
        self.entries.remove(&seq);
        Some(TimelineChange::Removed(id.to_string()))
    }

    fn remove_node_runs(&mut self) -> Vec<TimelineChange> {
        let ids: Vec<String> = self
            .entries
            .values()
            .filter(|m| m.category == MessageCategory::NodeRun)
            .map(|m| m.id.clone())
            .collect();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }
}

fn node_run_id(node_id: &str) -> String {
    format!("node-run:{}", node_id)
}

fn output_payload(frame: &EventFrame, text: String) -> (MessageCategory, Payload) {
    let node = frame.node();
    match frame.category {
        EventCategory::OutputWithChooseMsg => (
            MessageCategory::ChoiceInteraction,
            Payload::Choice {
                text,
                options: node.and_then(|n| n.options.clone()).unwrap_or_default(),
            },
        ),
        EventCategory::OutputWithInputMsg => (
            MessageCategory::TextInteraction,
            Payload::TextPrompt {
                text,
                default: node.and_then(|n| n.input_msg.clone()),
            },
        ),
        _ => (MessageCategory::BotOutput, Payload::Text { text }),
    }
}
