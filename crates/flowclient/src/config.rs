use std::env;
use std::time::Duration;

/// Connection settings for talking to an execution engine.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base WebSocket URL; the session id is appended as the last path segment.
    pub engine_url: String,
    /// Bound on one opening handshake. `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
    pub connect_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            engine_url: "ws://127.0.0.1:3000/ws".to_string(),
            connect_timeout: Some(Duration::from_secs(10)),
            connect_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
        }
    }
}

impl ClientConfig {
    pub fn new(engine_url: impl Into<String>) -> Self {
        Self {
            engine_url: engine_url.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `FLOW_ENGINE_URL`, `FLOW_CONNECT_TIMEOUT_MS`
    /// (0 disables the timeout) and `FLOW_CONNECT_ATTEMPTS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = env::var("FLOW_ENGINE_URL") {
            config.engine_url = url;
        }
        if let Some(ms) = parse_env::<u64>("FLOW_CONNECT_TIMEOUT_MS") {
            config.connect_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(attempts) = parse_env::<u32>("FLOW_CONNECT_ATTEMPTS") {
            config.connect_attempts = attempts.max(1);
        }
        config
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        self.connect_attempts = attempts.max(1);
        self.initial_backoff = initial_backoff;
        self.max_backoff = max_backoff;
        self
    }

    pub fn session_url(&self, session_id: &str) -> String {
        format!("{}/{}", self.engine_url.trim_end_matches('/'), session_id)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}
