//! Integration tests: a real TCP listener with a scripted SBS side.
//!
//! The scripted connector plays the chat server: it confirms the bind,
//! reports who is online and answers history requests.

use std::sync::Arc;
use std::time::Duration;

use sbs_irc_bridge::config::BridgeConfig;
use sbs_irc_bridge::sbs::auth::{Account, AuthError};
use sbs_irc_bridge::sbs::{OutboundFrame, RemoteError, RemoteLink};
use sbs_irc_bridge::server::Server;
use sbs_irc_bridge::session::{Login, RemoteConnector, SessionEvent};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const BIND_OK: &str =
    r#"{"type":"response","result":true,"from":"bind","extras":{"basicTags":["general"]}}"#;
const USERS: &str = r#"{"type":"userList","users":[
    {"uid":1,"username":"alice","level":2,"active":true},
    {"uid":7,"username":"bob","level":0,"active":true}],"rooms":[]}"#;
const HISTORY: &str = r#"{"type":"messageList","messages":[
    {"id":100,"type":"message","sender":{"uid":1,"username":"alice"},"tag":"general","encoding":"text","message":"hi bob &lt;3"}]}"#;

/// Accepts `bob`/`hunter2` and forwards every outbound frame to the test.
struct ScriptedConnector {
    sent: mpsc::UnboundedSender<OutboundFrame>,
}

impl RemoteConnector for ScriptedConnector {
    fn launch(&self, login: Login, events: mpsc::Sender<SessionEvent>) -> JoinHandle<()> {
        let sent = self.sent.clone();
        tokio::spawn(async move {
            if login.password != "hunter2" {
                let error = RemoteError::Auth(AuthError::Rejected(login.username));
                let _ = events.send(SessionEvent::RemoteFailed(error)).await;
                return;
            }
            let (outbound, mut frames) = mpsc::unbounded_channel();
            let link = RemoteLink {
                account: Account {
                    uid: 7,
                    username: "bob".into(),
                    token: "tok".into(),
                },
                outbound,
            };
            let _ = events.send(SessionEvent::RemoteOpened(link)).await;
            let _ = events.send(SessionEvent::RemoteFrame(BIND_OK.into())).await;
            let _ = events.send(SessionEvent::RemoteFrame(USERS.into())).await;

            while let Some(frame) = frames.recv().await {
                if frame == OutboundFrame::message_list_request() {
                    let _ = events.send(SessionEvent::RemoteFrame(HISTORY.into())).await;
                }
                let _ = sent.send(frame);
            }
        })
    }
}

/// Helper: start a bridge on a random port with the scripted connector.
async fn start_test_server() -> (
    std::net::SocketAddr,
    JoinHandle<anyhow::Result<()>>,
    mpsc::UnboundedReceiver<OutboundFrame>,
) {
    let config = BridgeConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        server_name: "test-server".to_string(),
        ..Default::default()
    };
    let (sent, frames) = mpsc::unbounded_channel();
    let server = Server::with_connector(config, Arc::new(ScriptedConnector { sent }));
    let (addr, handle) = server.start().await.unwrap();
    (addr, handle, frames)
}

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, writer) = stream.into_split();
        Client {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }

    async fn send(&mut self, text: &str) {
        self.writer.write_all(text.as_bytes()).await.unwrap();
    }

    /// Next line, or None at EOF.
    async fn next_line(&mut self) -> Option<String> {
        timeout(Duration::from_secs(2), self.lines.next_line())
            .await
            .expect("Timeout waiting for a line")
            .unwrap()
    }

    /// Skip lines until one matches.
    async fn expect_line(&mut self, predicate: impl Fn(&str) -> bool, description: &str) -> String {
        loop {
            match self.next_line().await {
                Some(line) if predicate(&line) => return line,
                Some(_) => {}
                None => panic!("Connection closed while waiting for: {description}"),
            }
        }
    }
}

// ── Test: Registration, join and history ────────────────────────────

#[tokio::test]
async fn welcome_precedes_remote_traffic() {
    let (addr, server_handle, mut frames) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    client.send("PASS hunter2\r\nNICK bob\r\nUSER bob 0 * :Bob\r\n").await;
    assert_eq!(client.next_line().await.unwrap(), ":test-server 001 bob :Welcome!");
    assert!(client.next_line().await.unwrap().starts_with(":test-server 005 bob "));
    assert_eq!(
        client.next_line().await.unwrap(),
        ":test-server 422 bob :MOTD File is missing"
    );

    client.send("JOIN #general\r\n").await;
    client
        .expect_line(|l| l == ":bob!7@test-server JOIN #general", "self JOIN")
        .await;
    client
        .expect_line(|l| l == ":test-server 353 bob = #general :@alice bob", "NAMES")
        .await;
    client
        .expect_line(
            |l| l == ":alice!1@test-server PRIVMSG #general :hi bob <3",
            "history message",
        )
        .await;

    client.send("PRIVMSG #general :hello alice\r\n").await;
    let frame = timeout(Duration::from_secs(2), async {
        loop {
            match frames.recv().await {
                Some(frame @ OutboundFrame::Message { .. }) => return frame,
                Some(_) => {}
                None => panic!("connector stopped"),
            }
        }
    })
    .await
    .expect("Timeout waiting for outbound message");
    assert_eq!(
        frame,
        OutboundFrame::Message {
            text: "hello alice".into(),
            key: "tok".into(),
            tag: "general".into(),
        }
    );

    client.send("QUIT :bye\r\n").await;
    assert_eq!(client.next_line().await, None);
    server_handle.abort();
}

// ── Test: Rejected login ────────────────────────────────────────────

#[tokio::test]
async fn rejected_login_closes_connection() {
    let (addr, server_handle, _frames) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    client.send("PASS wrong\r\nNICK bob\r\nUSER bob 0 * :Bob\r\n").await;
    client
        .expect_line(
            |l| l.starts_with(":test-server NOTICE bob :SBS login failed"),
            "login failure notice",
        )
        .await;
    assert_eq!(client.next_line().await, None);
    server_handle.abort();
}

// ── Test: Commands before registration ──────────────────────────────

#[tokio::test]
async fn join_before_registration() {
    let (addr, server_handle, _frames) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    client.send("JOIN #general\r\nPING :tok\r\n").await;
    assert_eq!(
        client.next_line().await.unwrap(),
        ":test-server 451 * :You have not registered"
    );
    assert_eq!(
        client.next_line().await.unwrap(),
        "PONG tok"
    );
    server_handle.abort();
}
