use crate::channel::{ChannelEvent, ChannelState, ExecutionChannel};
use crate::config::ClientConfig;
use crate::error::{ClientError, InteractionError};
use crate::interaction::{InteractionResponse, PendingInteraction};
use crate::status::{NodeRunState, RunStatusTracker};
use crate::timeline::{Timeline, TimelineChange};
use crate::transport::{Connector, WebSocketConnector};
use chrono::{DateTime, Utc};
use flowcore::{ActionFrame, EventCategory, EventFrame, Graph, NodeId};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeSource {
    Engine,
    Transport,
}

/// A user-visible, non-fatal report.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub source: NoticeSource,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Notice {
    fn new(level: NoticeLevel, source: NoticeSource, text: impl Into<String>) -> Self {
        Self {
            level,
            source,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Channel(ChannelState),
    Timeline(TimelineChange),
    NodeState { node_id: NodeId, state: NodeRunState },
    Notice(Notice),
}

/// One run/preview of a graph against an engine.
///
/// Owns exactly one channel, the transcript, the per-node run states and the
/// notices raised along the way. All state changes happen synchronously in
/// `handle`; nothing that arrives on the channel can make it fail.
pub struct Session {
    id: String,
    channel: ExecutionChannel,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    timeline: Timeline,
    tracker: RunStatusTracker,
    notices: Vec<Notice>,
}

impl Session {
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), config, connector)
    }

    pub fn with_id(id: impl Into<String>, config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let id = id.into();
        let url = config.session_url(&id);
        let (channel, events) = ExecutionChannel::new(url, connector, config);
        Self {
            id,
            channel,
            events,
            timeline: Timeline::new(),
            tracker: RunStatusTracker::new(),
            notices: Vec::new(),
        }
    }

    /// Session over the WebSocket transport.
    pub fn websocket(config: ClientConfig) -> Self {
        Self::new(config, Arc::new(WebSocketConnector))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn pending(&self) -> Option<&PendingInteraction> {
        self.timeline.pending()
    }

    pub fn node_state(&self, node_id: &str) -> NodeRunState {
        self.tracker.state(node_id)
    }

    pub fn subscribe_node(&mut self, node_id: &str) -> watch::Receiver<NodeRunState> {
        self.tracker.subscribe(node_id)
    }

    pub fn tracker(&self) -> &RunStatusTracker {
        &self.tracker
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    /// Open the channel ahead of the first run.
    pub fn open(&mut self) {
        self.channel.open();
    }

    /// Validate `graph` and hand it to the engine.
    ///
    /// Nothing is sent when any field fails validation.
    pub fn start_run(&mut self, graph: &Graph) -> Result<Vec<SessionUpdate>, ClientError> {
        if self.timeline.pending().is_some() {
            return Err(ClientError::InteractionPending);
        }
        let errors = graph.resolver().validate_graph();
        if !errors.is_empty() {
            tracing::warn!(session = %self.id, errors = errors.len(), "run blocked by validation");
            return Err(ClientError::Validation(errors));
        }

        let updates: Vec<_> = self
            .tracker
            .begin_run()
            .into_iter()
            .map(|(node_id, state)| SessionUpdate::NodeState { node_id, state })
            .collect();

        self.channel.open();
        self.channel
            .send(&ActionFrame::init_data(&graph.export()).with_chat_id(&self.id))?;
        tracing::info!(session = %self.id, nodes = graph.nodes().len(), "run started");
        Ok(updates)
    }

    /// Answer the pending interaction with exactly one input action.
    pub fn submit(&mut self, response: &InteractionResponse) -> Result<Vec<SessionUpdate>, ClientError> {
        let pending = self
            .timeline
            .pending()
            .ok_or(InteractionError::NothingPending)?;
        let answer = pending.answer(response)?;

        self.channel.open();
        self.channel.send(&answer.action.with_chat_id(&self.id))?;

        let mut updates = vec![SessionUpdate::Timeline(self.timeline.push_user(answer.transcript))];
        updates.extend(self.timeline.clear_pending().map(SessionUpdate::Timeline));
        Ok(updates)
    }

    /// Ask the engine to abort the run. Local state is only reset once the
    /// engine acknowledges with a round-over frame.
    pub fn stop(&mut self) -> Result<(), ClientError> {
        if self.channel.state() == ChannelState::Closed {
            tracing::debug!(session = %self.id, "stop on a closed channel ignored");
            return Ok(());
        }
        self.channel.send(&ActionFrame::stop().with_chat_id(&self.id))?;
        tracing::info!(session = %self.id, "stop requested");
        Ok(())
    }

    /// Tear down the channel; queued sends and in-flight frames are dropped.
    pub fn close(&mut self) -> Vec<SessionUpdate> {
        self.channel.close();
        let mut updates = vec![SessionUpdate::Channel(ChannelState::Closed)];
        updates.extend(self.timeline.clear_pending().map(SessionUpdate::Timeline));
        updates
    }

    /// Wait for the next channel event and apply it.
    pub async fn next_update(&mut self) -> Option<Vec<SessionUpdate>> {
        let event = self.events.recv().await?;
        Some(self.handle(event))
    }

    /// Apply one channel event. Never fails.
    pub fn handle(&mut self, event: ChannelEvent) -> Vec<SessionUpdate> {
        if !self.channel.accept(&event) {
            return Vec::new();
        }
        match event {
            ChannelEvent::Opened { .. } => vec![SessionUpdate::Channel(ChannelState::Open)],
            ChannelEvent::Closed { reason, error, .. } => {
                let mut updates = vec![SessionUpdate::Channel(ChannelState::Closed)];
                let orderly = error.is_none() && reason.is_some();
                if let Some(error) = error {
                    updates.push(self.notice(NoticeLevel::Error, NoticeSource::Transport, error.to_string()));
                }
                if orderly {
                    updates.extend(
                        self.timeline
                            .round_over(reason)
                            .into_iter()
                            .map(SessionUpdate::Timeline),
                    );
                    return updates;
                }

                // Nothing can answer or finish the current run any more.
                tracing::warn!(session = %self.id, "channel dropped mid-run; clearing run state");
                updates.extend(
                    self.tracker
                        .reset_all()
                        .into_iter()
                        .map(|(node_id, state)| SessionUpdate::NodeState { node_id, state }),
                );
                updates.extend(self.timeline.interrupt().into_iter().map(SessionUpdate::Timeline));
                updates
            }
            ChannelEvent::Frame { frame: Err(error), .. } => {
                tracing::warn!(session = %self.id, error = %error, "dropping malformed frame");
                Vec::new()
            }
            ChannelEvent::Frame { frame: Ok(frame), .. } => self.apply_frame(&frame),
        }
    }

    fn apply_frame(&mut self, frame: &EventFrame) -> Vec<SessionUpdate> {
        if let Some(chat_id) = frame.chat_id.as_deref() {
            if chat_id != self.id {
                tracing::warn!(session = %self.id, chat_id, "dropping frame for another session");
                return Vec::new();
            }
        }
        tracing::debug!(category = %frame.category, kind = %frame.kind, node_id = ?frame.node_id(), "frame");

        let mut updates = Vec::new();
        if frame.category == EventCategory::Error {
            let text = frame
                .text()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "The engine reported an error".to_string());
            updates.push(self.notice(NoticeLevel::Error, NoticeSource::Engine, text));
        }
        updates.extend(
            self.tracker
                .apply(frame)
                .into_iter()
                .map(|(node_id, state)| SessionUpdate::NodeState { node_id, state }),
        );
        updates.extend(self.timeline.apply(frame).into_iter().map(SessionUpdate::Timeline));
        updates
    }

    fn notice(&mut self, level: NoticeLevel, source: NoticeSource, text: String) -> SessionUpdate {
        let notice = Notice::new(level, source, text);
        self.notices.push(notice.clone());
        SessionUpdate::Notice(notice)
    }
}
