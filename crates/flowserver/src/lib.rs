//! Development execution engine
//!
//! A WebSocket server speaking the engine side of the action/event protocol,
//! for trying the client locally and for end-to-end tests.

pub mod engine;
pub mod ws;

pub use engine::{EngineRun, OUTPUT_RESULT_KEY};
pub use ws::{configure, ServerConfig};
