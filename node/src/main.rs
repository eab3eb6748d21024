// Tessera node binary

mod config;
mod service;
mod snapshot;
mod transport;

use config::NodeConfig;
use service::TesseraNode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NodeConfig::parse_args();

    let default_level = if config.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let node = TesseraNode::new(config).map_err(anyhow::Error::msg)?;
    node.run().await
}
