//! callbridge — a real-time voice-AI telephony call bridge.

use callbridge::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Required once per process before any TLS WebSocket client
    // connects (the outbound LLM session uses wss://).
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = Config::from_env()?;
    callbridge::start(config).await
}
