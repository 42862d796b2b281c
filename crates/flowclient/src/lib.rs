//! Execution monitoring client
//!
//! This crate talks to a remote execution engine over one channel per
//! session and folds what comes back into a transcript, per-node run states
//! and pending user interactions.

mod channel;
mod config;
mod error;
mod interaction;
mod session;
mod status;
mod timeline;
mod transport;

pub use channel::{ChannelEvent, ChannelState, ExecutionChannel};
pub use config::ClientConfig;
pub use error::{ChannelError, ClientError, InteractionError, TransportError};
pub use interaction::{Answer, InteractionResponse, PendingInteraction, DEFAULT_INPUT_VARIABLE};
pub use session::{Notice, NoticeLevel, NoticeSource, Session, SessionUpdate};
pub use status::{NodeRunState, RunStatusTracker};
pub use timeline::{Message, MessageCategory, Payload, SenderRole, Timeline, TimelineChange};
pub use transport::{Connection, Connector, FrameSink, FrameStream, Inbound, WebSocketConnector};
