//! callbridge — a real-time voice-AI telephony call bridge.
//!
//! Accepts an inbound telephony media WebSocket (8 kHz µ-law), exposes
//! it to a live bidirectional multimodal LLM session, converts the
//! synthesized response back to telephony audio in real time, and lets
//! a human operator take over the stream mid-call. Mixed-audio
//! recording and chunked transcript shipping run alongside.

pub mod audio;
pub mod call;
pub mod config;
pub mod error;
pub mod llm;
pub mod server;
pub mod tools;
pub mod transcript;

pub use config::Config;
pub use error::CallError;
pub use server::{start, AppState};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
