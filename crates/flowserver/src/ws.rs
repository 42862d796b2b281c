use crate::engine::EngineRun;
use actix_web::{get, web, HttpRequest, HttpResponse, Responder, Result as ActixResult};
use actix_ws::Message;
use flowcore::{ActionFrame, EventKind};
use std::time::Duration;
use tracing::{error, info, warn};

/// Server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Pause after each streamed chunk, so clients see output arrive gradually.
    pub stream_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            stream_delay: Duration::from_millis(40),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `BIND_ADDRESS` and `FLOW_STREAM_DELAY_MS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(address) = std::env::var("BIND_ADDRESS") {
            config.bind_address = address;
        }
        if let Ok(raw) = std::env::var("FLOW_STREAM_DELAY_MS") {
            match raw.trim().parse() {
                Ok(ms) => config.stream_delay = Duration::from_millis(ms),
                Err(_) => warn!(value = %raw, "ignoring unparsable FLOW_STREAM_DELAY_MS"),
            }
        }
        config
    }
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "flowserver"
    }))
}

/// One engine run per connection, addressed by chat id.
#[get("/ws/{chat_id}")]
async fn engine_socket(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    config: web::Data<ServerConfig>,
) -> ActixResult<HttpResponse> {
    let chat_id = path.into_inner();
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;
    let stream_delay = config.stream_delay;

    info!(chat_id = %chat_id, "engine client connected");

    actix_web::rt::spawn(async move {
        let mut run = EngineRun::new(chat_id.clone());

        'socket: while let Some(Ok(msg)) = msg_stream.recv().await {
            let text = match msg {
                Message::Text(text) => text.to_string(),
                Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Message::Ping(bytes) => {
                    if session.pong(&bytes).await.is_err() {
                        break;
                    }
                    continue;
                }
                Message::Close(_) => break,
                _ => continue,
            };

            let frames = match serde_json::from_str::<ActionFrame>(&text) {
                Ok(action) => run.handle(&action),
                Err(e) => {
                    warn!(chat_id = %chat_id, error = %e, "malformed action");
                    vec![run.rejection(format!("Malformed action: {}", e))]
                }
            };

            for frame in frames {
                let json = match frame.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        error!(error = %e, "failed to encode frame");
                        continue;
                    }
                };
                if session.text(json).await.is_err() {
                    break 'socket;
                }
                if frame.kind == EventKind::Stream && !stream_delay.is_zero() {
                    tokio::time::sleep(stream_delay).await;
                }
            }
        }

        info!(chat_id = %chat_id, "engine client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

/// Register the engine routes on an app.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check).service(engine_socket);
}
