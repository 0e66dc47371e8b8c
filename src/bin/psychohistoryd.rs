//! Server binary: wires configuration into the streaming endpoint.

use psychohistory_core::{server, AppState, RuntimeConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> psychohistory_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("psychohistory_core=info,psychohistoryd=info")),
        )
        .init();

    let config = RuntimeConfig::from_env()?;
    tracing::info!(
        search_provider = %config.search_backend,
        bind_addr = %config.bind_addr,
        "starting psychohistoryd"
    );

    let state = AppState::from_config(&config)?;
    server::serve(&config.bind_addr, state).await
}
