//! Variable references between nodes.

mod registry;
mod resolver;
pub mod token;

pub use registry::{ExportedVariable, VariableRegistry};
pub use resolver::{EncodedReference, EncodedText, LabelDictionary, ReferenceStatus, VariableResolver};
pub use token::VariableRef;
