use crate::error::{FlowError, GraphError};
use crate::node::{generate_node_id, unique_name, Node, NodeId, TabSelector};
use crate::variables::token;
use crate::variables::{EncodedText, LabelDictionary, VariableRegistry, VariableResolver};
use crate::Value;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Offset applied to copies in the editor.
const COPY_OFFSET: f32 = 50.0;

/// Directed edge between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Edge {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self::with_handles(source, None, target, None)
    }

    pub fn with_handles(
        source: impl Into<NodeId>,
        source_handle: Option<String>,
        target: impl Into<NodeId>,
        target_handle: Option<String>,
    ) -> Self {
        let source = source.into();
        let target = target.into();
        let id = format!(
            "edge_{}{}-{}{}",
            source,
            source_handle.as_deref().unwrap_or_default(),
            target,
            target_handle.as_deref().unwrap_or_default(),
        );
        Self {
            id,
            source,
            target,
            source_handle,
            target_handle,
        }
    }
}

/// Editor viewport.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub zoom: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, zoom: 1.0 }
    }
}

/// Interchange form of a graph: the only document format the core owns.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GraphDocument {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub viewport: Viewport,
}

/// Mutable workflow graph.
///
/// Every mutation keeps the variable registry current, so readers borrowing
/// the graph always see live reference validity.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    viewport: Viewport,
    registry: VariableRegistry,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_document(document: GraphDocument) -> Self {
        let mut graph = Self::new();
        graph.viewport = document.viewport;
        graph.import(document);
        graph
    }

    pub fn from_json(json: &str) -> Result<Self, FlowError> {
        let document: GraphDocument = serde_json::from_str(json)?;
        Ok(Self::from_document(document))
    }

    pub fn to_json(&self) -> Result<String, FlowError> {
        Ok(serde_json::to_string_pretty(&self.export())?)
    }

    pub fn export(&self) -> GraphDocument {
        GraphDocument {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            viewport: self.viewport,
        }
    }

    /// Replace nodes and edges wholesale. The viewport is left alone.
    pub fn import(&mut self, document: GraphDocument) {
        tracing::info!(
            nodes = document.nodes.len(),
            edges = document.edges.len(),
            "importing graph"
        );
        self.nodes = document.nodes;
        self.edges = document.edges;
        self.registry = VariableRegistry::rebuild(&self.nodes);
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> VariableResolver<'_> {
        VariableResolver::new(self)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    pub fn entry_node(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.is_entry())
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut Node, GraphError> {
        self.nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))
    }

    fn refresh(&mut self, id: &str) {
        if let Some(node) = self.nodes.iter().find(|n| n.id == id) {
            self.registry.register_node(node);
        }
    }

    pub fn add_node(&mut self, node: Node) -> Result<NodeId, GraphError> {
        if self.contains(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        let id = node.id.clone();
        self.registry.register_node(&node);
        self.nodes.push(node);
        Ok(id)
    }

    /// Remove a node and its incident edges. References to it elsewhere
    /// become dangling.
    pub fn remove_node(&mut self, id: &str) -> Result<Node, GraphError> {
        let index = self
            .nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
        if self.nodes[index].is_entry() {
            return Err(GraphError::EntryNodeProtected(id.to_string()));
        }

        let node = self.nodes.remove(index);
        self.edges.retain(|e| e.source != id && e.target != id);
        self.registry.unregister_node(id);
        tracing::debug!(node_id = %id, "removed node");
        Ok(node)
    }

    pub fn connect(&mut self, source: &str, target: &str) -> Result<String, GraphError> {
        self.add_edge(Edge::new(source, target))
    }

    pub fn add_edge(&mut self, edge: Edge) -> Result<String, GraphError> {
        for endpoint in [&edge.source, &edge.target] {
            if !self.contains(endpoint) {
                return Err(GraphError::NodeNotFound(endpoint.clone()));
            }
        }
        if edge.source == edge.target {
            return Err(GraphError::InvalidConnection(format!(
                "node {} cannot connect to itself",
                edge.source
            )));
        }
        if self.edges.iter().any(|e| e.id == edge.id) {
            return Err(GraphError::InvalidConnection(format!(
                "{} is already connected to {}",
                edge.source, edge.target
            )));
        }
        let id = edge.id.clone();
        self.edges.push(edge);
        Ok(id)
    }

    pub fn disconnect(&mut self, edge_id: &str) -> Result<Edge, GraphError> {
        let index = self
            .edges
            .iter()
            .position(|e| e.id == edge_id)
            .ok_or_else(|| GraphError::EdgeNotFound(edge_id.to_string()))?;
        Ok(self.edges.remove(index))
    }

    pub fn update_parameter(
        &mut self,
        node_id: &str,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<(), GraphError> {
        let node = self.node_mut(node_id)?;
        let parameter = node
            .parameter_mut(key)
            .ok_or_else(|| GraphError::ParameterNotFound {
                node_id: node_id.to_string(),
                key: key.to_string(),
            })?;
        parameter.value = value.into();
        self.refresh(node_id);
        Ok(())
    }

    pub fn rename_node(&mut self, node_id: &str, name: impl Into<String>) -> Result<(), GraphError> {
        self.node_mut(node_id)?.name = name.into();
        self.refresh(node_id);
        Ok(())
    }

    /// Switch a tab-scoped node's active tab; variables bound to the old tab
    /// stop being valid targets.
    pub fn set_tab(&mut self, node_id: &str, tab: impl Into<String>) -> Result<(), GraphError> {
        let node = self.node_mut(node_id)?;
        let tab = tab.into();
        match node.tab.as_mut() {
            Some(selector) => selector.value = tab,
            None => {
                node.tab = Some(TabSelector {
                    value: tab,
                    options: Vec::new(),
                })
            }
        }
        self.refresh(node_id);
        Ok(())
    }

    /// Encode a stored field for display.
    pub fn encode_field(&self, node_id: &str, key: &str) -> Result<EncodedText, GraphError> {
        let node = self
            .node(node_id)
            .ok_or_else(|| GraphError::NodeNotFound(node_id.to_string()))?;
        let parameter = node.parameter(key).ok_or_else(|| GraphError::ParameterNotFound {
            node_id: node_id.to_string(),
            key: key.to_string(),
        })?;
        let text = parameter.value.as_str().unwrap_or_default();
        Ok(self.resolver().encode(text, &parameter.var_labels))
    }

    /// Store edited display text: decode it and refresh the field's label cache.
    pub fn write_field(
        &mut self,
        node_id: &str,
        key: &str,
        display: &str,
        dictionary: &LabelDictionary,
    ) -> Result<(), FlowError> {
        let stored = self.resolver().decode(display, dictionary)?;
        let fresh = self.resolver().encode(&stored, &Default::default()).label_cache();
        let present: HashSet<String> = token::references(&stored)
            .iter()
            .map(ToString::to_string)
            .collect();

        let node = self.node_mut(node_id)?;
        let parameter = node
            .parameter_mut(key)
            .ok_or_else(|| GraphError::ParameterNotFound {
                node_id: node_id.to_string(),
                key: key.to_string(),
            })?;
        // Keep cached labels only for references still in the text.
        parameter.var_labels.retain(|cached, _| present.contains(cached));
        parameter.var_labels.extend(fresh);
        parameter.value = Value::String(stored);
        self.refresh(node_id);
        Ok(())
    }

    /// Copy nodes with fresh ids and collision-free names.
    ///
    /// Edges among the copied nodes are copied too, and references between
    /// copies are re-pointed at the new ids. Returns the new ids in input order;
    /// an id listed twice is copied once.
    pub fn duplicate_nodes(&mut self, ids: &[&str]) -> Result<Vec<NodeId>, GraphError> {
        let mut originals: Vec<Node> = Vec::with_capacity(ids.len());
        for id in ids {
            if originals.iter().any(|n| n.id == *id) {
                continue;
            }
            let node = self
                .node(id)
                .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
            if node.is_entry() {
                return Err(GraphError::EntryNodeProtected(node.id.clone()));
            }
            originals.push(node.clone());
        }

        let mut mapping: HashMap<NodeId, NodeId> = HashMap::with_capacity(originals.len());
        for node in &originals {
            let mut new_id = generate_node_id(&node.node_type);
            while self.contains(&new_id) || mapping.values().any(|id| *id == new_id) {
                new_id = generate_node_id(&node.node_type);
            }
            mapping.insert(node.id.clone(), new_id);
        }
        let mut taken: HashSet<String> = self.nodes.iter().map(|n| n.name.clone()).collect();

        let mut created = Vec::with_capacity(originals.len());
        for mut node in originals {
            node.id = mapping[&node.id].clone();
            node.name = unique_name(&node.name, taken.iter().map(String::as_str));
            taken.insert(node.name.clone());
            if let Some(position) = node.position.as_mut() {
                position.x += COPY_OFFSET;
                position.y += COPY_OFFSET;
            }
            for parameter in &mut node.parameters {
                parameter.value = parameter.value.map_strings(&mut |text| {
                    token::rewrite_references(text, |reference| {
                        mapping.get(&reference.node_id).map(|new_id| {
                            let mut moved = reference.clone();
                            moved.node_id = new_id.clone();
                            moved
                        })
                    })
                });
                parameter.var_labels = parameter
                    .var_labels
                    .iter()
                    .map(|(token, label)| (remap_token(token, &mapping), label.clone()))
                    .collect();
            }
            created.push(node.id.clone());
            self.registry.register_node(&node);
            self.nodes.push(node);
        }

        let copied_edges: Vec<Edge> = self
            .edges
            .iter()
            .filter_map(|e| {
                let source = mapping.get(&e.source)?;
                let target = mapping.get(&e.target)?;
                Some(Edge::with_handles(
                    source.clone(),
                    e.source_handle.clone(),
                    target.clone(),
                    e.target_handle.clone(),
                ))
            })
            .collect();
        self.edges.extend(copied_edges);

        tracing::debug!(count = created.len(), "duplicated nodes");
        Ok(created)
    }

    /// Topological order of node ids.
    pub fn execution_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut graph = DiGraph::<&str, ()>::new();
        let mut index = HashMap::new();

        for node in &self.nodes {
            index.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
        }
        for edge in &self.edges {
            let from = index
                .get(edge.source.as_str())
                .ok_or_else(|| GraphError::NodeNotFound(edge.source.clone()))?;
            let to = index
                .get(edge.target.as_str())
                .ok_or_else(|| GraphError::NodeNotFound(edge.target.clone()))?;
            graph.add_edge(*from, *to, ());
        }

        let order = toposort(&graph, None).map_err(|_| GraphError::CyclicDependency)?;
        Ok(order.into_iter().map(|idx| graph[idx].to_string()).collect())
    }
}

fn remap_token(token: &str, mapping: &HashMap<NodeId, NodeId>) -> String {
    match token::VariableRef::parse(token) {
        Some(mut reference) => {
            if let Some(new_id) = mapping.get(&reference.node_id) {
                reference.node_id = new_id.clone();
            }
            reference.to_string()
        }
        None => token.to_string(),
    }
}
