//! Execution channel
//!
//! One persistent connection per session. The connection itself lives in a
//! background task; the channel only keeps the handles needed to feed it
//! outbound text and to tear it down. Every event the task reports is tagged
//! with the epoch of the `open()` that started it, so events from a torn-down
//! connection can be recognised and discarded after a reopen.

use crate::config::ClientConfig;
use crate::error::{ChannelError, TransportError};
use crate::transport::{Connection, Connector, Inbound};
use flowcore::{ActionFrame, EventFrame, ProtocolError};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Connecting,
    Open,
}

/// Report from the connection task.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Opened {
        epoch: u64,
    },
    Frame {
        epoch: u64,
        frame: Result<EventFrame, ProtocolError>,
    },
    /// The connection ended. `reason` is the peer's close reason; `error` is
    /// set when the connection failed or was lost.
    Closed {
        epoch: u64,
        reason: Option<String>,
        error: Option<TransportError>,
    },
}

impl ChannelEvent {
    pub fn epoch(&self) -> u64 {
        match self {
            ChannelEvent::Opened { epoch }
            | ChannelEvent::Frame { epoch, .. }
            | ChannelEvent::Closed { epoch, .. } => *epoch,
        }
    }
}

pub struct ExecutionChannel {
    url: String,
    connector: Arc<dyn Connector>,
    config: ClientConfig,
    state: ChannelState,
    epoch: u64,
    live_epoch: Option<u64>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    cancel: Option<CancellationToken>,
}

impl ExecutionChannel {
    /// Create a closed channel and the receiver its events are delivered on.
    pub fn new(
        url: impl Into<String>,
        connector: Arc<dyn Connector>,
        config: ClientConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let channel = Self {
            url: url.into(),
            connector,
            config,
            state: ChannelState::Closed,
            epoch: 0,
            live_epoch: None,
            outbound: None,
            events,
            cancel: None,
        };
        (channel, events_rx)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Start connecting. A pending or live connection is reused.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(&mut self) -> u64 {
        if self.state != ChannelState::Closed {
            tracing::debug!(url = %self.url, state = ?self.state, "channel already open");
            return self.epoch;
        }

        self.epoch += 1;
        self.live_epoch = Some(self.epoch);
        self.state = ChannelState::Connecting;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        self.outbound = Some(outbound_tx);
        self.cancel = Some(cancel.clone());

        tracing::info!(url = %self.url, epoch = self.epoch, "opening execution channel");
        let task = ConnectionTask {
            epoch: self.epoch,
            url: self.url.clone(),
            connector: Arc::clone(&self.connector),
            config: self.config.clone(),
            outbound: outbound_rx,
            events: self.events.clone(),
            cancel,
        };
        tokio::spawn(task.run());
        self.epoch
    }

    /// Queue an action. Actions sent while connecting go out in order once
    /// the connection is up.
    pub fn send(&mut self, action: &ActionFrame) -> Result<(), ChannelError> {
        let text = action.to_json()?;
        let outbound = self.outbound.as_ref().ok_or(ChannelError::Closed)?;
        outbound.send(text).map_err(|_| ChannelError::Closed)?;
        tracing::debug!(action = ?action.action, state = ?self.state, "queued action");
        Ok(())
    }

    /// Tear the connection down. Queued sends are discarded and events still
    /// in flight from this connection will be rejected by `accept`.
    pub fn close(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if self.state != ChannelState::Closed {
            tracing::info!(url = %self.url, epoch = self.epoch, "closing execution channel");
        }
        self.outbound = None;
        self.live_epoch = None;
        self.state = ChannelState::Closed;
    }

    /// Apply an event's effect on the channel state. Returns false for events
    /// from a connection that is no longer live; those must be ignored.
    pub fn accept(&mut self, event: &ChannelEvent) -> bool {
        if self.live_epoch != Some(event.epoch()) {
            tracing::warn!(
                epoch = event.epoch(),
                live = ?self.live_epoch,
                "discarding event from stale connection"
            );
            return false;
        }
        match event {
            ChannelEvent::Opened { .. } => {
                self.state = ChannelState::Open;
                tracing::info!(url = %self.url, "execution channel open");
            }
            ChannelEvent::Closed { reason, error, .. } => {
                match error {
                    Some(e) => tracing::error!(url = %self.url, error = %e, "execution channel failed"),
                    None => tracing::info!(url = %self.url, reason = ?reason, "execution channel closed"),
                }
                self.cancel = None;
                self.outbound = None;
                self.live_epoch = None;
                self.state = ChannelState::Closed;
            }
            ChannelEvent::Frame { .. } => {}
        }
        true
    }
}

impl Drop for ExecutionChannel {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

struct ConnectionTask {
    epoch: u64,
    url: String,
    connector: Arc<dyn Connector>,
    config: ClientConfig,
    outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    cancel: CancellationToken,
}

impl ConnectionTask {
    async fn run(mut self) {
        let connected = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = connect_with_retry(self.connector.as_ref(), &self.url, &self.config) => result,
        };
        let Connection { mut sink, mut stream } = match connected {
            Ok(connection) => connection,
            Err(error) => {
                self.report_closed(None, Some(error));
                return;
            }
        };
        let _ = self.events.send(ChannelEvent::Opened { epoch: self.epoch });

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    let _ = sink.close().await;
                    return;
                }
                Some(text) = self.outbound.recv() => {
                    if let Err(error) = sink.send(text).await {
                        self.report_closed(None, Some(error));
                        return;
                    }
                }
                inbound = stream.next() => match inbound {
                    Some(Ok(Inbound::Text(text))) => {
                        let frame = EventFrame::parse(&text);
                        let _ = self.events.send(ChannelEvent::Frame { epoch: self.epoch, frame });
                    }
                    Some(Ok(Inbound::Close(reason))) => {
                        self.report_closed(reason, None);
                        return;
                    }
                    Some(Err(error)) => {
                        self.report_closed(None, Some(error));
                        return;
                    }
                    None => {
                        self.report_closed(None, None);
                        return;
                    }
                },
            }
        }
    }

    fn report_closed(&self, reason: Option<String>, error: Option<TransportError>) {
        let _ = self.events.send(ChannelEvent::Closed {
            epoch: self.epoch,
            reason,
            error,
        });
    }
}

/// Opening handshake: each attempt bounded by `connect_timeout`, failures
/// retried with doubling backoff up to `connect_attempts`.
async fn connect_with_retry(
    connector: &dyn Connector,
    url: &str,
    config: &ClientConfig,
) -> Result<Connection, TransportError> {
    let attempts = config.connect_attempts.max(1);
    let mut backoff = config.initial_backoff;
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        let result = match config.connect_timeout {
            Some(limit) => match timeout(limit, connector.connect(url)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout {
                    url: url.to_string(),
                    timeout: limit,
                }),
            },
            None => connector.connect(url).await,
        };

        match result {
            Ok(connection) => {
                tracing::debug!(url, attempt, "connected");
                return Ok(connection);
            }
            Err(error) => {
                tracing::warn!(url, attempt, error = %error, "connect attempt failed");
                last_error = error.to_string();
                if attempt < attempts {
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(config.max_backoff);
                }
            }
        }
    }

    Err(TransportError::GaveUp {
        url: url.to_string(),
        attempts,
        last: last_error,
    })
}
