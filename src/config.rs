//! Process configuration, sourced entirely from the environment.
//!
//! Unlike the rest of this codebase's ancestry (a TOML file under a
//! platform config dir), this crate's external contract is a fixed set
//! of env vars (see SPEC_FULL.md §6.7). `from_env` only ever looks up
//! the keys it knows about, so an unrelated env var in the process
//! never breaks startup.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().expect("valid default bind addr")
}

fn default_recordings_dir() -> PathBuf {
    PathBuf::from("recordings")
}

fn default_log_chunk_size() -> usize {
    5
}

fn default_tool_timeout_secs() -> u64 {
    10
}

fn default_log_post_timeout_secs() -> u64 {
    5
}

fn default_llm_ws_url() -> String {
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent".to_string()
}

fn default_voice_name() -> String {
    "Puck".to_string()
}

#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_key: String,
    pub log_endpoint: String,
    pub sys_inst_endpoint: String,
    pub log_chunk_size: usize,
    pub aldar_base_api_url: String,
    pub telephony_account_sid: Option<String>,
    pub telephony_auth_token: Option<String>,
    pub bind_addr: SocketAddr,
    pub recordings_dir: PathBuf,
    pub tool_timeout_secs: u64,
    pub log_post_timeout_secs: u64,
    pub llm_ws_url_override: Option<String>,
    pub voice_name: String,
}

impl Config {
    /// The outbound WebSocket URL for the LLM provider's bidirectional
    /// session (§4.2.1). Overridable via `LLM_WS_URL` (useful for
    /// pointing at a local relay/proxy in development).
    pub fn llm_ws_url(&self) -> String {
        self.llm_ws_url_override
            .clone()
            .unwrap_or_else(default_llm_ws_url)
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// `GEMINI_KEY`, `LOG_ENDPOINT`, `SYS_INST_ENDPOINT`, and
    /// `ALDAR_BASE_API_URL` are required; everything else has a default.
    pub fn from_env() -> Result<Self> {
        let gemini_key = required_env("GEMINI_KEY")?;
        let log_endpoint = required_env("LOG_ENDPOINT")?;
        let sys_inst_endpoint = required_env("SYS_INST_ENDPOINT")?;
        let aldar_base_api_url = required_env("ALDAR_BASE_API_URL")?;

        let log_chunk_size = optional_env("LOG_CHUNK_SIZE")
            .map(|v| v.parse::<usize>().context("LOG_CHUNK_SIZE must be an integer"))
            .transpose()?
            .unwrap_or_else(default_log_chunk_size);

        let bind_addr = optional_env("BIND_ADDR")
            .map(|v| v.parse::<SocketAddr>().context("BIND_ADDR must be a socket address"))
            .transpose()?
            .unwrap_or_else(default_bind_addr);

        let recordings_dir = optional_env("RECORDINGS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_recordings_dir);

        let tool_timeout_secs = optional_env("TOOL_TIMEOUT_SECS")
            .map(|v| v.parse::<u64>().context("TOOL_TIMEOUT_SECS must be an integer"))
            .transpose()?
            .unwrap_or_else(default_tool_timeout_secs);

        let log_post_timeout_secs = optional_env("LOG_POST_TIMEOUT_SECS")
            .map(|v| v.parse::<u64>().context("LOG_POST_TIMEOUT_SECS must be an integer"))
            .transpose()?
            .unwrap_or_else(default_log_post_timeout_secs);

        Ok(Self {
            gemini_key,
            log_endpoint,
            sys_inst_endpoint,
            log_chunk_size,
            aldar_base_api_url,
            telephony_account_sid: optional_env("TELEPHONY_ACCOUNT_SID"),
            telephony_auth_token: optional_env("TELEPHONY_AUTH_TOKEN"),
            bind_addr,
            recordings_dir,
            tool_timeout_secs,
            log_post_timeout_secs,
            llm_ws_url_override: optional_env("LLM_WS_URL"),
            voice_name: optional_env("VOICE_NAME").unwrap_or_else(default_voice_name),
        })
    }
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required environment variable {key}"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
