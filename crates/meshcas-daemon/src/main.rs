//! meshd — the meshcas peer-to-peer file-sharing daemon.
//!
//! Loads configuration (env vars -> config file -> defaults), starts the
//! DHT node and chunk-transfer server, bootstraps onto the configured
//! contacts, and serves the HTTP control API that `meshcas-ctl` talks to.

use anyhow::Result;
use meshcas_core::config::MeshConfig;
use meshd::node::MeshNode;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = MeshConfig::load()?;
    let api_port = config.api.port;

    let node = MeshNode::start(config).await?;

    if node.bootstrap().await {
        tracing::info!("bootstrap succeeded");
    } else {
        tracing::warn!("no bootstrap contact responded; starting as a seed node");
    }

    let state = meshcas_api::ApiState::new(node);
    meshcas_api::serve(state, api_port).await
}
