use flowcore::{EventCategory, EventFrame, EventKind, NodeId};
use std::collections::HashMap;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeRunState {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl NodeRunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeRunState::Succeeded | NodeRunState::Failed)
    }
}

/// Per-node run state driven by `node_run` frames.
///
/// Each node gets a watch channel so observers only wake on real changes.
#[derive(Debug, Default)]
pub struct RunStatusTracker {
    nodes: HashMap<NodeId, watch::Sender<NodeRunState>>,
}

impl RunStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, node_id: &str) -> watch::Receiver<NodeRunState> {
        self.nodes
            .entry(node_id.to_string())
            .or_insert_with(|| watch::channel(NodeRunState::Idle).0)
            .subscribe()
    }

    pub fn state(&self, node_id: &str) -> NodeRunState {
        self.nodes
            .get(node_id)
            .map(|tx| *tx.borrow())
            .unwrap_or_default()
    }

    /// Every tracked node with its current state.
    pub fn snapshot(&self) -> Vec<(NodeId, NodeRunState)> {
        let mut states: Vec<_> = self
            .nodes
            .iter()
            .map(|(id, tx)| (id.clone(), *tx.borrow()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Apply one frame; returns the nodes whose state changed.
    pub fn apply(&mut self, frame: &EventFrame) -> Vec<(NodeId, NodeRunState)> {
        if frame.category != EventCategory::NodeRun {
            return Vec::new();
        }
        if frame.is_wildcard() {
            return self.reset_all();
        }
        let Some(node_id) = frame.node_id() else {
            return Vec::new();
        };
        let next = match frame.kind {
            EventKind::Start => NodeRunState::Running,
            EventKind::Over if frame.failure_reason().is_some() => NodeRunState::Failed,
            EventKind::Over => NodeRunState::Succeeded,
            EventKind::Stream | EventKind::Close => return Vec::new(),
        };
        if self.set(node_id, next) {
            tracing::debug!(node_id, state = ?next, "node state changed");
            vec![(node_id.to_string(), next)]
        } else {
            Vec::new()
        }
    }

    /// Return every tracked node to idle.
    pub fn reset_all(&mut self) -> Vec<(NodeId, NodeRunState)> {
        let mut changed = Vec::new();
        for (node_id, tx) in &self.nodes {
            if tx.send_if_modified(|state| replace(state, NodeRunState::Idle)) {
                changed.push((node_id.clone(), NodeRunState::Idle));
            }
        }
        changed.sort_by(|a, b| a.0.cmp(&b.0));
        changed
    }

    /// A new run starts from a clean slate.
    pub fn begin_run(&mut self) -> Vec<(NodeId, NodeRunState)> {
        self.reset_all()
    }

    fn set(&mut self, node_id: &str, next: NodeRunState) -> bool {
        let tx = self
            .nodes
            .entry(node_id.to_string())
            .or_insert_with(|| watch::channel(NodeRunState::Idle).0);
        tx.send_if_modified(|state| replace(state, next))
    }
}

fn replace(state: &mut NodeRunState, next: NodeRunState) -> bool {
    if *state == next {
        false
    } else {
        *state = next;
        true
    }
}
