//! Bot command handler.

use anyhow::Result;
use snapdf_core::config::Config;

pub async fn run(mut config: Config, port: Option<u16>) -> Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    snapdf_bot::run(config).await
}
