//! Channel server binary.
//!
//! Usage: `channeld [config.toml]`. With no argument the configuration
//! comes from defaults plus `FRONTIER_*` environment variables.

use std::sync::Arc;

use frontier_protocol::config::NetworkConfig;
use frontier_protocol::server::ChannelServer;
use frontier_protocol::utils::logging;
use frontier_protocol::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => NetworkConfig::from_file(path)?,
        None => NetworkConfig::from_env()?,
    };

    logging::init(&config.logging)?;
    config.validate_strict()?;

    let server = Arc::new(ChannelServer::new(config));
    server.run().await
}
