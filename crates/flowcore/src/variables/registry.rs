use crate::node::{Export, Node};
use crate::variables::VariableRef;
use crate::NodeId;
use std::collections::{BTreeMap, HashMap};

/// A variable another node may reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedVariable {
    pub reference: VariableRef,
    pub label: String,
    /// Parameter the variable comes from (differs from the key for item exports).
    pub parameter: String,
}

/// Live set of reference targets.
///
/// The graph refreshes a node's entry on every mutation touching it, so
/// checking a reference is a map lookup instead of a graph walk.
#[derive(Debug, Clone, Default)]
pub struct VariableRegistry {
    exported: HashMap<NodeId, BTreeMap<String, ExportedVariable>>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rebuild<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> Self {
        let mut registry = Self::new();
        for node in nodes {
            registry.register_node(node);
        }
        registry
    }

    /// Replace everything `node` exports.
    pub fn register_node(&mut self, node: &Node) {
        let mut variables = BTreeMap::new();

        for parameter in node.active_parameters() {
            match parameter.global {
                Some(Export::Key) => {
                    let var = ExportedVariable {
                        reference: VariableRef::new(node.id.clone(), parameter.key.clone()),
                        label: label_for(&node.name, parameter.display_name()),
                        parameter: parameter.key.clone(),
                    };
                    variables.insert(parameter.key.clone(), var);
                }
                Some(Export::Items) => {
                    for item in parameter.value.as_array().unwrap_or_default() {
                        let Some(key) = item.get("key").and_then(|k| k.as_str()) else {
                            continue;
                        };
                        let item_label = item.get("label").and_then(|l| l.as_str()).unwrap_or(key);
                        let var = ExportedVariable {
                            reference: VariableRef::new(node.id.clone(), key),
                            label: label_for(&node.name, item_label),
                            parameter: parameter.key.clone(),
                        };
                        variables.insert(key.to_string(), var);
                    }
                }
                None => {}
            }
        }

        tracing::debug!(node_id = %node.id, count = variables.len(), "registered node variables");
        self.exported.insert(node.id.clone(), variables);
    }

    pub fn unregister_node(&mut self, node_id: &str) {
        self.exported.remove(node_id);
    }

    pub fn is_valid(&self, reference: &VariableRef) -> bool {
        self.get(reference).is_some()
    }

    pub fn get(&self, reference: &VariableRef) -> Option<&ExportedVariable> {
        self.exported
            .get(&reference.node_id)
            .and_then(|vars| vars.get(&reference.key))
    }

    pub fn label(&self, reference: &VariableRef) -> Option<&str> {
        self.get(reference).map(|v| v.label.as_str())
    }

    /// Variables exported by one node, ordered by key.
    pub fn node_variables(&self, node_id: &str) -> impl Iterator<Item = &ExportedVariable> {
        self.exported.get(node_id).into_iter().flat_map(|vars| vars.values())
    }

    /// Every currently valid reference target, for variable pickers.
    pub fn variables(&self) -> impl Iterator<Item = &ExportedVariable> {
        self.exported.values().flat_map(|vars| vars.values())
    }

    pub fn len(&self) -> usize {
        self.exported.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn label_for(node_name: &str, variable: &str) -> String {
    format!("{}/{}", node_name, variable)
}
