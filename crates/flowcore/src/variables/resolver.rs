use crate::error::{ResolveError, ValidationError};
use crate::graph::Graph;
use crate::variables::token::{self, VariableRef};
use crate::NodeId;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceStatus {
    Valid,
    /// Source node or variable is gone, or hidden by a tab switch.
    Dangling,
    /// Another reference in the same field would display the same label.
    Ambiguous,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodedReference {
    pub reference: VariableRef,
    pub label: String,
    pub status: ReferenceStatus,
}

/// Display form of one field.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedText {
    pub display: String,
    pub references: Vec<EncodedReference>,
    pub dictionary: LabelDictionary,
}

impl EncodedText {
    pub fn has_problems(&self) -> bool {
        self.references
            .iter()
            .any(|r| r.status != ReferenceStatus::Valid)
    }

    /// Labels to cache alongside the field: token → label, valid references only.
    pub fn label_cache(&self) -> BTreeMap<String, String> {
        self.references
            .iter()
            .filter(|r| r.status == ReferenceStatus::Valid)
            .map(|r| (r.reference.to_string(), r.label.clone()))
            .collect()
    }
}

/// Per-field label → reference dictionary.
///
/// Labels are only unique within one field; a label mapped to more than one
/// reference is ambiguous and never resolved by guessing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelDictionary {
    entries: BTreeMap<String, BTreeSet<VariableRef>>,
}

impl LabelDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the label is now ambiguous.
    pub fn insert(&mut self, label: impl Into<String>, reference: VariableRef) -> bool {
        let targets = self.entries.entry(label.into()).or_default();
        targets.insert(reference);
        targets.len() > 1
    }

    pub fn is_ambiguous(&self, label: &str) -> bool {
        self.entries.get(label).is_some_and(|t| t.len() > 1)
    }

    pub fn lookup(&self, label: &str) -> Result<Option<&VariableRef>, ResolveError> {
        match self.entries.get(label) {
            None => Ok(None),
            Some(targets) if targets.len() == 1 => Ok(targets.iter().next()),
            Some(targets) => Err(ResolveError::AmbiguousLabel {
                label: label.to_string(),
                candidates: targets.iter().map(ToString::to_string).collect(),
            }),
        }
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Encodes, decodes and validates reference-bearing fields against the
/// current state of a graph.
pub struct VariableResolver<'g> {
    graph: &'g Graph,
}

impl<'g> VariableResolver<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        Self { graph }
    }

    /// Replace every `{{#nodeId.key#}}` with `{{#label#}}`.
    ///
    /// Never fails: references that no longer resolve fall back to the label
    /// cached in `cache`, then to the raw `nodeId.key`, and are flagged.
    pub fn encode(&self, text: &str, cache: &BTreeMap<String, String>) -> EncodedText {
        let registry = self.graph.registry();
        let mut resolved: BTreeMap<VariableRef, (String, ReferenceStatus)> = BTreeMap::new();

        for reference in token::references(text) {
            if resolved.contains_key(&reference) {
                continue;
            }
            let entry = match registry.label(&reference) {
                Some(label) => (label.to_string(), ReferenceStatus::Valid),
                None => {
                    let label = cache
                        .get(&reference.to_string())
                        .cloned()
                        .unwrap_or_else(|| reference.to_string());
                    (label, ReferenceStatus::Dangling)
                }
            };
            resolved.insert(reference, entry);
        }

        let mut dictionary = LabelDictionary::new();
        for (reference, (label, _)) in &resolved {
            if dictionary.insert(label.clone(), reference.clone()) {
                tracing::warn!(label = %label, "ambiguous variable label in field");
            }
        }

        let mut references = Vec::new();
        let display = token::rewrite(text, |content| {
            let reference = VariableRef::parse(content)?;
            let (label, status) = resolved.get(&reference)?;
            let (shown, status) = if dictionary.is_ambiguous(label) {
                (reference.to_string(), ReferenceStatus::Ambiguous)
            } else {
                (label.clone(), *status)
            };
            references.push(EncodedReference {
                reference: reference.clone(),
                label: label.clone(),
                status,
            });
            Some(token::wrap(&shown))
        });

        EncodedText {
            display,
            references,
            dictionary,
        }
    }

    /// Map display labels back to stored tokens.
    ///
    /// Raw `{{#nodeId.key#}}` tokens and text the dictionary does not know
    /// are kept as typed; an ambiguous label is an error.
    pub fn decode(&self, display: &str, dictionary: &LabelDictionary) -> Result<String, ResolveError> {
        let mut failure = None;
        let stored = token::rewrite(display, |content| match dictionary.lookup(content) {
            Ok(found) => found.map(VariableRef::token),
            Err(e) => {
                failure.get_or_insert(e);
                None
            }
        });
        match failure {
            Some(e) => Err(e),
            None => Ok(stored),
        }
    }

    /// Re-check one field before submission.
    pub fn validate(&self, node_id: &str, key: &str) -> Result<(), ValidationError> {
        let node = self
            .graph
            .node(node_id)
            .ok_or_else(|| ValidationError::unknown(node_id, key))?;
        let parameter = node
            .parameter(key)
            .ok_or_else(|| ValidationError::unknown(node_id, key))?;

        if !node.is_active(parameter) {
            return Ok(());
        }
        if parameter.required && parameter.value.is_empty() {
            return Err(ValidationError::missing(node_id, key));
        }

        let registry = self.graph.registry();
        let mut seen = BTreeSet::new();
        let mut labels = Vec::new();
        parameter.value.for_each_str(&mut |text| {
            for reference in token::references(text) {
                if registry.is_valid(&reference) || !seen.insert(reference.clone()) {
                    continue;
                }
                let label = parameter
                    .var_labels
                    .get(&reference.to_string())
                    .cloned()
                    .unwrap_or_else(|| reference.to_string());
                labels.push(label);
            }
        });

        if labels.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::dangling(node_id, key, labels))
        }
    }

    /// Validate every active field of every node.
    pub fn validate_graph(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for node in self.graph.nodes() {
            for parameter in node.active_parameters() {
                if let Err(e) = self.validate(&node.id, &parameter.key) {
                    errors.push(e);
                }
            }
        }
        errors
    }

    /// Fields (node id, parameter key) that reference `node_id`.
    pub fn dependents(&self, node_id: &str) -> Vec<(NodeId, String)> {
        let mut fields = Vec::new();
        for node in self.graph.nodes() {
            for parameter in &node.parameters {
                let mut hit = false;
                parameter.value.for_each_str(&mut |text| {
                    hit |= token::references(text).iter().any(|r| r.node_id == node_id);
                });
                if hit {
                    fields.push((node.id.clone(), parameter.key.clone()));
                }
            }
        }
        fields
    }
}
