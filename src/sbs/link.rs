//! Websocket link to the SBS chat server.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::auth::{AuthError, Authenticator};
use super::{OutboundFrame, RemoteError, RemoteLink};
use crate::config::BridgeConfig;
use crate::session::{Login, RemoteConnector, SessionEvent};

/// Logs in over HTTP, then binds a websocket to the chat server.
pub struct SbsConnector {
    authenticator: Arc<Authenticator>,
    chat_url: String,
    less_data: bool,
}

impl SbsConnector {
    pub fn new(authenticator: Authenticator, chat_url: impl Into<String>, less_data: bool) -> Self {
        Self {
            authenticator: Arc::new(authenticator),
            chat_url: chat_url.into(),
            less_data,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Result<Self, AuthError> {
        Ok(Self::new(
            Authenticator::http(config.query_endpoint.clone())?,
            config.chat_url.clone(),
            !config.full_data,
        ))
    }
}

impl RemoteConnector for SbsConnector {
    fn launch(&self, login: Login, events: mpsc::Sender<SessionEvent>) -> JoinHandle<()> {
        let authenticator = self.authenticator.clone();
        let chat_url = self.chat_url.clone();
        let less_data = self.less_data;
        tokio::spawn(async move {
            let last = match run_link(&authenticator, &chat_url, less_data, login, &events).await {
                Ok(()) => SessionEvent::RemoteClosed,
                Err(e) => SessionEvent::RemoteFailed(e),
            };
            // The session may already be gone.
            let _ = events.send(last).await;
        })
    }
}

async fn run_link(
    authenticator: &Authenticator,
    chat_url: &str,
    less_data: bool,
    login: Login,
    events: &mpsc::Sender<SessionEvent>,
) -> Result<(), RemoteError> {
    let account = authenticator.login(&login.username, &login.password).await?;
    tracing::info!(uid = account.uid, "Logged in to SBS as {}", account.username);

    let (socket, _) = connect_async(chat_url).await?;
    let (mut sink, mut stream) = socket.split();

    let bind = OutboundFrame::Bind {
        uid: account.uid,
        less_data,
        key: account.token.clone(),
    };
    sink.send(WsMessage::text(bind.to_json()?)).await?;

    let (outbound, mut frames) = mpsc::unbounded_channel();
    let link = RemoteLink { account, outbound };
    if events.send(SessionEvent::RemoteOpened(link)).await.is_err() {
        return Ok(());
    }

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        let frame = SessionEvent::RemoteFrame(text.as_str().to_string());
                        if events.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
            frame = frames.recv() => {
                match frame {
                    Some(frame) => {
                        let json = frame.to_json()?;
                        tracing::debug!("sbs> {json}");
                        sink.send(WsMessage::text(json)).await?;
                    }
                    // Session dropped the link.
                    None => {
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}
