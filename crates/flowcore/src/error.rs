use crate::NodeId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(NodeId),

    #[error("Parameter '{key}' not found on node {node_id}")]
    ParameterNotFound { node_id: NodeId, key: String },

    #[error("The entry node {0} cannot be deleted or copied")]
    EntryNodeProtected(NodeId),

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    #[error("Edge not found: {0}")]
    EdgeNotFound(String),

    #[error("Cyclic dependency detected")]
    CyclicDependency,
}

/// A field that must not be submitted to the engine.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} (node '{node_id}', field '{field}')")]
pub struct ValidationError {
    pub node_id: NodeId,
    pub field: String,
    pub kind: ValidationErrorKind,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationErrorKind {
    #[error("references missing variable(s): {}", .labels.join(", "))]
    DanglingReference { labels: Vec<String> },

    #[error("required parameter is empty")]
    MissingParameter,

    #[error("no such field")]
    UnknownField,
}

impl ValidationError {
    pub fn dangling(node_id: impl Into<NodeId>, field: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            node_id: node_id.into(),
            field: field.into(),
            kind: ValidationErrorKind::DanglingReference { labels },
        }
    }

    pub fn missing(node_id: impl Into<NodeId>, field: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            field: field.into(),
            kind: ValidationErrorKind::MissingParameter,
        }
    }

    pub fn unknown(node_id: impl Into<NodeId>, field: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            field: field.into(),
            kind: ValidationErrorKind::UnknownField,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("Label '{label}' is ambiguous in this field: {}", .candidates.join(", "))]
    AmbiguousLabel {
        label: String,
        candidates: Vec<String>,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Frame '{category}/{kind}' is missing '{field}'")]
    MissingField {
        category: String,
        kind: String,
        field: &'static str,
    },
}
