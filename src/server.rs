//! TCP listener.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::BridgeConfig;
use crate::connection;
use crate::sbs::link::SbsConnector;
use crate::session::RemoteConnector;

/// What every connection handler needs.
#[derive(Clone)]
pub struct BridgeContext {
    pub config: Arc<BridgeConfig>,
    pub connector: Arc<dyn RemoteConnector>,
}

pub struct Server {
    config: BridgeConfig,
    connector: Arc<dyn RemoteConnector>,
}

impl Server {
    /// A server that logs in to the real SBS.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let connector =
            SbsConnector::from_config(&config).context("couldn't set up the SBS login client")?;
        Ok(Self::with_connector(config, Arc::new(connector)))
    }

    /// Create a server with a custom remote connector (for testing).
    pub fn with_connector(config: BridgeConfig, connector: Arc<dyn RemoteConnector>) -> Self {
        Self { config, connector }
    }

    fn context(&self) -> BridgeContext {
        BridgeContext {
            config: Arc::new(self.config.clone()),
            connector: Arc::clone(&self.connector),
        }
    }

    /// Run the server, blocking forever.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("couldn't listen on {}", self.config.listen_addr))?;
        tracing::info!("IRC listener on {}", self.config.listen_addr);
        accept_loop(listener, self.context()).await
    }

    /// Start the server and return the bound address + task handle (for testing).
    pub async fn start(self) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        let addr = listener.local_addr()?;
        tracing::info!("Listening on {addr}");
        let handle = tokio::spawn(accept_loop(listener, self.context()));
        Ok((addr, handle))
    }
}

async fn accept_loop(listener: TcpListener, ctx: BridgeContext) -> Result<()> {
    loop {
        let (stream, _addr) = listener.accept().await?;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = connection::handle(stream, ctx).await {
                tracing::error!("Connection error: {e}");
            }
        });
    }
}
