use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sbs_irc_bridge=info".parse()?))
        .init();

    let config = sbs_irc_bridge::config::BridgeConfig::parse();
    tracing::info!("Starting SBS bridge on {}", config.listen_addr);
    tracing::info!("Chat server {}, login via {}", config.chat_url, config.query_endpoint);

    let server = sbs_irc_bridge::server::Server::new(config)?;
    server.run().await
}
