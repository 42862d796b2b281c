// crates/flowclient/tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use flowclient::{ClientConfig, Connection, Connector, Inbound, Session, SessionUpdate, TransportError};
use futures::{sink, stream};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

/// Config with short backoffs so retry tests stay fast.
pub fn fast_config() -> ClientConfig {
    ClientConfig::new("mem://engine")
        .with_connect_timeout(Some(Duration::from_secs(2)))
        .with_retry(3, Duration::from_millis(5), Duration::from_millis(20))
}

/// The engine side of one in-memory connection.
pub struct EnginePeer {
    pub url: String,
    pub received: mpsc::UnboundedReceiver<String>,
    pub frames: mpsc::UnboundedSender<Result<Inbound, TransportError>>,
}

impl EnginePeer {
    pub fn push(&self, frame: JsonValue) {
        let _ = self.frames.send(Ok(Inbound::Text(frame.to_string())));
    }

    pub fn push_raw(&self, text: &str) {
        let _ = self.frames.send(Ok(Inbound::Text(text.to_string())));
    }

    pub fn close(&self, reason: Option<&str>) {
        let _ = self.frames.send(Ok(Inbound::Close(reason.map(str::to_string))));
    }

    /// Next action the client sent, parsed.
    pub async fn next_action(&mut self) -> JsonValue {
        let text = tokio::time::timeout(Duration::from_secs(2), self.received.recv())
            .await
            .expect("timed out waiting for an action")
            .expect("client side closed");
        serde_json::from_str(&text).unwrap()
    }
}

/// In-memory transport. Each successful connect hands an `EnginePeer` to the
/// test through `peers`.
pub struct MemoryConnector {
    attempts: AtomicUsize,
    failures: AtomicUsize,
    gate: Option<Arc<Notify>>,
    peers: mpsc::UnboundedSender<EnginePeer>,
}

impl MemoryConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<EnginePeer>) {
        Self::build(None, 0)
    }

    /// Every connect waits until the returned `Notify` is signalled.
    pub fn gated() -> (Arc<Self>, mpsc::UnboundedReceiver<EnginePeer>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let (connector, peers) = Self::build(Some(gate.clone()), 0);
        (connector, peers, gate)
    }

    /// The first `failures` connects are refused.
    pub fn failing(failures: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<EnginePeer>) {
        Self::build(None, failures)
    }

    fn build(
        gate: Option<Arc<Notify>>,
        failures: usize,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<EnginePeer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            attempts: AtomicUsize::new(0),
            failures: AtomicUsize::new(failures),
            gate,
            peers,
        });
        (connector, peers_rx)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Connection, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let refused = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (client_tx, client_rx) = mpsc::unbounded_channel::<String>();
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();

        let sink = sink::unfold(client_tx, |tx, text: String| async move {
            tx.send(text)
                .map_err(|_| TransportError::Io("engine went away".to_string()))?;
            Ok::<_, TransportError>(tx)
        });
        let stream = stream::unfold(engine_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        let _ = self.peers.send(EnginePeer {
            url: url.to_string(),
            received: client_rx,
            frames: engine_tx,
        });
        Ok(Connection::new(Box::pin(sink), Box::pin(stream)))
    }
}

/// Apply channel events until `done` holds, collecting every update.
pub async fn pump_until(
    session: &mut Session,
    mut done: impl FnMut(&Session) -> bool,
) -> Vec<SessionUpdate> {
    let mut updates = Vec::new();
    let wait = async {
        while !done(session) {
            match session.next_update().await {
                Some(batch) => updates.extend(batch),
                None => break,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .expect("timed out waiting for session updates");
    updates
}
