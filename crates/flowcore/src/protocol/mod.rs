// crates/flowcore/src/protocol/mod.rs

mod action;
mod event;

pub use action::{ActionFrame, ActionKind};
pub use event::{
    ChoiceOption, EventCategory, EventFrame, EventKind, EventMessage, FormField, InputSchema,
    NodeMessage, FORM_INPUT_TAB, WILDCARD_NODE,
};
