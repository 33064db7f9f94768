//! SmileBASIC Source chat protocol.
//!
//! The chat server speaks JSON objects over a websocket. Every frame has a
//! `type`; chat messages additionally carry a `subtype` or `module` that
//! decides how they are shown.

pub mod auth;
pub mod link;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use self::auth::{Account, AuthError};

/// A chat user as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUser {
    pub uid: u64,
    pub username: String,
    #[serde(default)]
    pub level: i64,
    #[serde(default)]
    pub active: bool,
}

impl RemoteUser {
    pub fn rank(&self) -> Rank {
        Rank::from_level(self.level)
    }
}

/// Channel privilege derived from a user's level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rank {
    Normal,
    Voice,
    Operator,
}

impl Rank {
    pub fn from_level(level: i64) -> Self {
        match level {
            i64::MIN..=0 => Rank::Normal,
            1 => Rank::Voice,
            _ => Rank::Operator,
        }
    }

    /// NAMES/WHO prefix character.
    pub fn prefix(self) -> &'static str {
        match self {
            Rank::Normal => "",
            Rank::Voice => "+",
            Rank::Operator => "@",
        }
    }

    /// Channel mode granting this rank, if any.
    pub fn mode(self) -> Option<&'static str> {
        match self {
            Rank::Normal => None,
            Rank::Voice => Some("+v"),
            Rank::Operator => Some("+o"),
        }
    }
}

/// Frames the bridge sends to the chat server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundFrame {
    Bind {
        uid: u64,
        #[serde(rename = "lessData")]
        less_data: bool,
        key: String,
    },
    Message {
        text: String,
        key: String,
        tag: String,
    },
    Request {
        request: String,
    },
}

impl OutboundFrame {
    pub fn message_list_request() -> Self {
        OutboundFrame::Request {
            request: "messageList".to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame has no type")]
    MissingType,
    /// Well-formed JSON of a known type whose fields don't fit.
    #[error("unexpected {kind} frame: {source}")]
    Body {
        kind: String,
        source: serde_json::Error,
    },
}

impl FrameError {
    /// True when the frame isn't a JSON object with a `type` at all.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, FrameError::Body { .. })
    }
}

/// Frames received from the chat server.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    UserList(UserList),
    MessageList(Vec<ChatMessage>),
    Response(Response),
    /// A single live `message`, `module` or `system` frame.
    Message(ChatMessage),
    Unrecognized(String),
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        #[derive(Deserialize)]
        struct Batch {
            #[serde(default)]
            messages: Vec<ChatMessage>,
        }

        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(FrameError::MissingType)?
            .to_string();
        let body = |e| FrameError::Body {
            kind: kind.clone(),
            source: e,
        };
        let frame = match kind.as_str() {
            "userList" => InboundFrame::UserList(serde_json::from_value(value).map_err(body)?),
            "messageList" => {
                let batch: Batch = serde_json::from_value(value).map_err(body)?;
                InboundFrame::MessageList(batch.messages)
            }
            "response" => InboundFrame::Response(serde_json::from_value(value).map_err(body)?),
            "message" | "module" | "system" => {
                InboundFrame::Message(serde_json::from_value(value).map_err(body)?)
            }
            _ => InboundFrame::Unrecognized(kind.clone()),
        };
        Ok(frame)
    }
}

/// Everyone online, plus the members of each room.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserList {
    #[serde(default)]
    pub users: Vec<RemoteUser>,
    #[serde(default)]
    pub rooms: Vec<Room>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Room {
    pub name: String,
    #[serde(default)]
    pub users: Vec<RemoteUser>,
}

/// Reply to a `bind` or `request` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub extras: Option<ResponseExtras>,
    #[serde(default)]
    pub errors: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ResponseExtras {
    #[serde(default, rename = "basicTags")]
    pub basic_tags: Vec<String>,
}

impl Response {
    /// The server reports success with any truthy `result`.
    pub fn succeeded(&self) -> bool {
        match &self.result {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }
    }

    pub fn basic_tags(&self) -> &[String] {
        self.extras
            .as_ref()
            .map(|e| e.basic_tags.as_slice())
            .unwrap_or_default()
    }
}

/// One chat message, live or from history.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub sender: Option<RemoteUser>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub recipients: Vec<u64>,
}

/// How a chat message should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Chat,
    /// `/me` (module `fun`).
    Action,
    /// `/pm` (module `pm`).
    Private,
    /// Server-wide announcement (module `global`).
    Global,
    /// Join/leave notice; the user list already says as much.
    Presence,
    Welcome,
    SystemNotice,
    Unrecognized,
}

impl ChatMessage {
    pub fn kind(&self) -> MessageKind {
        let subtype = self.subtype.as_deref().filter(|s| *s != "none");
        match (self.message_type.as_str(), subtype, self.module.as_deref()) {
            ("message", None, _) => MessageKind::Chat,
            ("module", None, Some("fun")) => MessageKind::Action,
            ("module", None, Some("pm")) => MessageKind::Private,
            ("module", None, Some("global")) => MessageKind::Global,
            ("system", Some("join" | "leave"), _) => MessageKind::Presence,
            ("system", Some("welcome"), _) => MessageKind::Welcome,
            ("system", None, _) => MessageKind::SystemNotice,
            _ => MessageKind::Unrecognized,
        }
    }

    pub fn sender_uid(&self) -> Option<u64> {
        self.sender.as_ref().map(|s| s.uid)
    }

    pub fn encoding(&self) -> &str {
        self.encoding.as_deref().unwrap_or("text")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("{0}")]
    Auth(#[from] AuthError),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("couldn't encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// An open, bound chat connection as seen by the session.
#[derive(Debug, Clone)]
pub struct RemoteLink {
    pub account: Account,
    pub outbound: mpsc::UnboundedSender<OutboundFrame>,
}

impl RemoteLink {
    /// Queue a frame for the chat server. Returns false once the link is gone.
    pub fn send(&self, frame: OutboundFrame) -> bool {
        self.outbound.send(frame).is_ok()
    }

    /// A chat message frame signed with this link's key.
    pub fn message(&self, tag: &str, text: String) -> OutboundFrame {
        OutboundFrame::Message {
            text,
            key: self.account.token.clone(),
            tag: tag.to_string(),
        }
    }
}
