//! Per-connection bridge between one IRC client and one SBS chat link.
//!
//! All session state lives in [`BridgeSession`] and is only touched from a
//! single task, fed by one event queue. The client reader and the remote
//! link run as separate tasks that post [`SessionEvent`]s into that queue.

mod client;
mod remote;


use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::irc;
use crate::roster::Roster;
use crate::sbs::{RemoteError, RemoteLink, RemoteUser};

/// How many message ids are remembered for deduplication.
const SEEN_IDS_CAPACITY: usize = 4096;

/// Credentials handed to the remote side once the client has sent them all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    pub username: String,
    pub password: String,
}

/// Everything a session reacts to, in arrival order.
#[derive(Debug)]
pub enum SessionEvent {
    /// One line from the client, without its terminator.
    ClientLine(String),
    ClientClosed,
    /// The remote task logged in, connected and sent `bind`.
    RemoteOpened(RemoteLink),
    /// A raw JSON frame from the chat server.
    RemoteFrame(String),
    RemoteFailed(RemoteError),
    RemoteClosed,
}

/// Opens the remote side of a session.
///
/// The returned task owns the connection and reports through `events`:
/// `RemoteOpened` once bound, then frames, then `RemoteClosed` or
/// `RemoteFailed`. Aborting the task tears the connection down.
pub trait RemoteConnector: Send + Sync {
    fn launch(&self, login: Login, events: mpsc::Sender<SessionEvent>) -> JoinHandle<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    CredentialsComplete,
    RemoteConnecting,
    Bridging,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::CredentialsComplete => "credentials-complete",
            SessionState::RemoteConnecting => "remote-connecting",
            SessionState::Bridging => "bridging",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct Credentials {
    nickname: Option<String>,
    password: Option<String>,
    realname: Option<String>,
}

/// State of one bridged connection.
pub struct BridgeSession {
    id: String,
    config: Arc<BridgeConfig>,
    connector: Arc<dyn RemoteConnector>,
    state: SessionState,
    /// Set once the welcome numerics went out; diagnostics become notices.
    welcomed: bool,
    credentials: Credentials,

    /// Lines to the client writer.
    client: mpsc::UnboundedSender<String>,
    /// Handed to the remote task so it can post into our queue.
    events: mpsc::Sender<SessionEvent>,
    remote_task: Option<JoinHandle<()>>,
    link: Option<RemoteLink>,

    users: HashMap<u64, RemoteUser>,
    online: BTreeSet<u64>,
    rooms: BTreeMap<String, BTreeSet<u64>>,
    tags: Vec<String>,
    channels: Roster,
    joined: BTreeSet<String>,
    pending: Vec<String>,
    seen: SeenIds,
}

impl BridgeSession {
    pub fn new(
        id: String,
        config: Arc<BridgeConfig>,
        connector: Arc<dyn RemoteConnector>,
        client: mpsc::UnboundedSender<String>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            id,
            config,
            connector,
            state: SessionState::Unauthenticated,
            welcomed: false,
            credentials: Credentials::default(),
            client,
            events,
            remote_task: None,
            link: None,
            users: HashMap::new(),
            online: BTreeSet::new(),
            rooms: BTreeMap::new(),
            tags: Vec::new(),
            channels: Roster::new(),
            joined: BTreeSet::new(),
            pending: Vec::new(),
            seen: SeenIds::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn joined(&self) -> &BTreeSet<String> {
        &self.joined
    }

    pub fn channels(&self) -> &Roster {
        &self.channels
    }

    /// Process events until the session closes or every sender is gone.
    pub async fn run(mut self, mut events: mpsc::Receiver<SessionEvent>) {
        while self.state != SessionState::Closed {
            let Some(event) = events.recv().await else {
                break;
            };
            self.handle_event(event);
        }
        self.close();
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        if self.state == SessionState::Closed {
            return;
        }
        match event {
            SessionEvent::ClientLine(line) => self.handle_line(&line),
            SessionEvent::ClientClosed => {
                tracing::info!(session_id = %self.id, "Client disconnected");
                self.close();
            }
            SessionEvent::RemoteOpened(link) => self.remote_opened(link),
            SessionEvent::RemoteFrame(text) => self.remote_frame(&text),
            SessionEvent::RemoteFailed(e) => self.report(e.into()),
            SessionEvent::RemoteClosed => self.report(BridgeError::RemoteTransportFailure(
                "chat server closed the connection".to_string(),
            )),
        }
    }

    fn set_state(&mut self, next: SessionState) {
        tracing::info!(session_id = %self.id, "Session {} -> {}", self.state, next);
        self.state = next;
    }

    /// Tear down both sides. Nothing happens after this.
    fn close(&mut self) {
        if let Some(task) = self.remote_task.take() {
            task.abort();
        }
        // Dropping the link closes its outbound queue.
        self.link = None;
        if self.state != SessionState::Closed {
            self.set_state(SessionState::Closed);
        }
    }

    /// Report a failure; fatal ones end the session.
    fn report(&mut self, error: BridgeError) {
        if error.is_fatal() {
            tracing::error!(session_id = %self.id, "{error}");
            self.diagnostic(&error.to_string());
            self.close();
        } else {
            tracing::warn!(session_id = %self.id, "{error}");
        }
    }

    /// Tell the client about something odd, or just log it before welcome.
    fn diagnostic(&self, text: &str) {
        if self.welcomed {
            self.send_notice(text);
        } else {
            tracing::info!(session_id = %self.id, "{text}");
        }
    }

    fn nick(&self) -> &str {
        self.credentials.nickname.as_deref().unwrap_or("*")
    }

    fn own_uid(&self) -> Option<u64> {
        self.link.as_ref().map(|l| l.account.uid)
    }

    /// `username!uid@server` for a chat user.
    fn mask(&self, uid: u64) -> String {
        format!("{}!{uid}@{}", self.username(uid), self.config.server_name)
    }

    fn my_mask(&self) -> String {
        match self.own_uid() {
            Some(uid) => self.mask(uid),
            None => {
                let nick = self.nick();
                format!("{nick}!{nick}@{}", self.config.server_name)
            }
        }
    }

    /// Best known name for `uid`; the number itself if nobody told us.
    fn username(&self, uid: u64) -> String {
        self.users
            .get(&uid)
            .map(|u| u.username.clone())
            .or_else(|| {
                self.link
                    .as_ref()
                    .filter(|l| l.account.uid == uid)
                    .map(|l| l.account.username.clone())
            })
            .unwrap_or_else(|| uid.to_string())
    }

    fn send_lines(&self, lines: Vec<String>) {
        for line in lines {
            tracing::debug!(session_id = %self.id, "-> {}", line.trim_end());
            if self.client.send(line).is_err() {
                break;
            }
        }
    }

    fn send(&self, source: &str, command: &str, params: &[&str], trailing: Option<&str>) {
        self.send_lines(irc::encode(Some(source), command, params, trailing));
    }

    /// Server-originated reply addressed to the client's nick.
    fn send_numeric(&self, numeric: &str, params: &[&str], trailing: Option<&str>) {
        let nick = self.nick().to_string();
        let mut full = Vec::with_capacity(params.len() + 1);
        full.push(nick.as_str());
        full.extend_from_slice(params);
        self.send(&self.config.server_name, numeric, &full, trailing);
    }

    fn send_from_me(&self, command: &str, params: &[&str], trailing: Option<&str>) {
        self.send(&self.my_mask(), command, params, trailing);
    }

    fn send_notice(&self, text: &str) {
        let nick = self.nick().to_string();
        self.send(&self.config.server_name, "NOTICE", &[&nick], Some(text));
    }
}

/// Recently seen message ids, oldest evicted first.
#[derive(Debug, Default)]
struct SeenIds {
    ids: HashSet<u64>,
    order: VecDeque<u64>,
}

impl SeenIds {
    fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    /// Remember `id`; false if it was already known.
    fn insert(&mut self, id: u64) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > SEEN_IDS_CAPACITY {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
        true
    }
}
