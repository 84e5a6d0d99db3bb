//! Error taxonomy for the call bridge.
//!
//! Transient failures (tool backends, log POSTs) are handled inline as
//! `reqwest::Error` and never escalate to `CallError` — they are logged
//! and either surfaced to the LLM as `{error}` or deferred for retry.

use thiserror::Error;

/// Errors that terminate a call (or its construction) outright.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("protocol framing error: {0}")]
    Framing(String),

    #[error("llm session failure: {0}")]
    LlmSession(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("resource failure: {0}")]
    Resource(String),

    #[error("operator channel failure: {0}")]
    OperatorChannel(String),
}

impl CallError {
    pub fn framing(msg: impl Into<String>) -> Self {
        Self::Framing(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }
}
