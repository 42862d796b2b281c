use flowcore::{FlowError, ValidationError};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{} field(s) failed validation", .0.len())]
    Validation(Vec<ValidationError>),

    #[error("An interaction is pending; answer it or stop the run first")]
    InteractionPending,

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Interaction error: {0}")]
    Interaction(#[from] InteractionError),

    #[error(transparent)]
    Flow(#[from] FlowError),
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Channel is closed")]
    Closed,

    #[error("Failed to encode action: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure of the underlying connection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Connecting to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("Gave up connecting to {url} after {attempts} attempt(s): {last}")]
    GaveUp {
        url: String,
        attempts: u32,
        last: String,
    },

    #[error("Connection lost: {0}")]
    Io(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InteractionError {
    #[error("No interaction is pending")]
    NothingPending,

    #[error("'{0}' is not one of the offered options")]
    UnknownOption(String),

    #[error("Required field '{0}' is missing")]
    MissingField(String),

    #[error("Expected a {expected} response")]
    WrongShape { expected: &'static str },
}
