use crate::error::InteractionError;
use flowcore::{ActionFrame, ChoiceOption, FormField, NodeId};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

/// Variable used for free-text answers when the engine names none.
pub const DEFAULT_INPUT_VARIABLE: &str = "user_input";

/// What the engine is waiting for before the run can continue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingInteraction {
    Choice {
        node_id: NodeId,
        message_id: String,
        variable: String,
        options: Vec<ChoiceOption>,
    },
    Text {
        node_id: NodeId,
        variable: String,
        prompt: Option<String>,
        default: Option<String>,
    },
    Form {
        node_id: NodeId,
        fields: Vec<FormField>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InteractionResponse {
    /// Id of the chosen option.
    Choice(String),
    Text(String),
    Form(BTreeMap<String, String>),
}

/// A validated response: the action to send and the line to show as the
/// user's message.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub action: ActionFrame,
    pub transcript: String,
}

impl PendingInteraction {
    pub fn node_id(&self) -> &str {
        match self {
            PendingInteraction::Choice { node_id, .. }
            | PendingInteraction::Text { node_id, .. }
            | PendingInteraction::Form { node_id, .. } => node_id,
        }
    }

    pub fn shape(&self) -> &'static str {
        match self {
            PendingInteraction::Choice { .. } => "choice",
            PendingInteraction::Text { .. } => "text",
            PendingInteraction::Form { .. } => "form",
        }
    }

    /// Check `response` against the requested shape and build the input action.
    pub fn answer(&self, response: &InteractionResponse) -> Result<Answer, InteractionError> {
        match (self, response) {
            (
                PendingInteraction::Choice {
                    node_id,
                    variable,
                    options,
                    ..
                },
                InteractionResponse::Choice(choice),
            ) => {
                let option = options
                    .iter()
                    .find(|o| &o.id == choice)
                    .ok_or_else(|| InteractionError::UnknownOption(choice.clone()))?;
                Ok(Answer {
                    action: ActionFrame::input_value(node_id, variable, option.id.clone()),
                    transcript: option.label.clone(),
                })
            }
            (PendingInteraction::Text { node_id, variable, .. }, InteractionResponse::Text(text)) => {
                Ok(Answer {
                    action: ActionFrame::input_value(node_id, variable, text.clone()),
                    transcript: text.clone(),
                })
            }
            (PendingInteraction::Form { node_id, fields }, InteractionResponse::Form(values)) => {
                let mut submitted = Map::new();
                let mut transcript = Vec::new();
                for field in fields {
                    let value = values.get(&field.key).map(|v| v.trim()).unwrap_or_default();
                    if value.is_empty() {
                        if field.required {
                            return Err(InteractionError::MissingField(field.key.clone()));
                        }
                        continue;
                    }
                    submitted.insert(field.key.clone(), JsonValue::String(value.to_string()));
                    let label = field.label.as_deref().unwrap_or(&field.key);
                    transcript.push(format!("{}: {}", label, value));
                }
                Ok(Answer {
                    action: ActionFrame::input(node_id, submitted),
                    transcript: transcript.join("\n"),
                })
            }
            (pending, _) => Err(InteractionError::WrongShape {
                expected: pending.shape(),
            }),
        }
    }
}
