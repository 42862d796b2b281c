//! Core abstractions for the workflow builder
//!
//! This crate holds the graph model, the variable reference machinery and the
//! wire protocol spoken with the execution engine. It performs no I/O.

mod error;
pub mod graph;
pub mod node;
pub mod protocol;
mod value;
pub mod variables;

pub use error::{
    FlowError, GraphError, ProtocolError, ResolveError, ValidationError, ValidationErrorKind,
};
pub use graph::{Edge, Graph, GraphDocument, Viewport};
pub use node::{Export, Node, NodeId, Parameter, Position, TabSelector, ENTRY_NODE_TYPE};
pub use protocol::*;
pub use value::Value;
pub use variables::{
    EncodedReference, EncodedText, LabelDictionary, ReferenceStatus, VariableRef,
    VariableRegistry, VariableResolver,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
