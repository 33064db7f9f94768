//! Frames from the SBS chat server.

use super::{BridgeSession, SessionState};
use crate::error::BridgeError;
use crate::irc;
use crate::roster::{self, Directive};
use crate::sbs::{ChatMessage, InboundFrame, MessageKind, RemoteLink, Response, UserList};
use crate::text::{self, BodyWarning};

/// mIRC color code for green text.
const GREEN: &str = "\x033";

impl BridgeSession {
    pub(super) fn remote_opened(&mut self, link: RemoteLink) {
        if self.state != SessionState::RemoteConnecting {
            return;
        }
        tracing::info!(
            session_id = %self.id,
            uid = link.account.uid,
            "Bound to SBS chat as {}",
            link.account.username
        );
        self.link = Some(link);
    }

    pub(super) fn remote_frame(&mut self, text: &str) {
        tracing::debug!(session_id = %self.id, "sbs< {text}");
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) if e.is_malformed() => {
                self.report(BridgeError::RemoteTransportFailure(e.to_string()));
                return;
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, "{e}");
                self.diagnostic(&format!("{e}: {text}"));
                return;
            }
        };

        match frame {
            InboundFrame::UserList(list) => self.on_user_list(list),
            InboundFrame::MessageList(messages) => {
                for message in messages {
                    self.on_message(message);
                }
            }
            InboundFrame::Message(message) => self.on_message(message),
            InboundFrame::Response(response) => self.on_response(response),
            InboundFrame::Unrecognized(kind) => {
                self.diagnostic(&format!("Unknown frame type {kind}: {text}"));
            }
        }
    }

    fn on_response(&mut self, response: Response) {
        if !response.succeeded() {
            if response.from == "bind" {
                self.report(BridgeError::RemoteAuthFailure(format!(
                    "chat server rejected bind: {}",
                    response.errors
                )));
            } else {
                self.diagnostic(&format!(
                    "Request {} failed: {}",
                    response.from, response.errors
                ));
            }
            return;
        }
        if response.from == "bind" {
            self.tags = response.basic_tags().to_vec();
            if self.state == SessionState::RemoteConnecting {
                self.set_state(SessionState::Bridging);
            }
            self.refresh_roster();
        }
    }

    fn on_user_list(&mut self, list: UserList) {
        self.online = list.users.iter().map(|u| u.uid).collect();
        let everyone = list
            .users
            .into_iter()
            .chain(list.rooms.iter().flat_map(|r| r.users.iter().cloned()));
        for user in everyone {
            self.users.insert(user.uid, user);
        }
        self.rooms = list
            .rooms
            .into_iter()
            .map(|room| (room.name, room.users.iter().map(|u| u.uid).collect()))
            .collect();
        self.refresh_roster();
    }

    /// Rebuild the channel list and show the client what changed.
    pub(super) fn refresh_roster(&mut self) {
        if self.tags.is_empty() || self.users.is_empty() {
            return;
        }
        let fresh = roster::merge(&self.tags, &self.online, &self.rooms);
        let previous = std::mem::replace(&mut self.channels, fresh);
        for directive in roster::reconcile(&previous, &self.channels, &self.joined) {
            self.apply_directive(directive);
        }
        self.drain_pending();
    }

    fn apply_directive(&mut self, directive: Directive) {
        let own = self.own_uid();
        match directive {
            Directive::PartChannel(channel) => {
                self.joined.remove(&channel);
                self.send_from_me("PART", &[&channel], None);
            }
            // The client tracks its own membership through JOIN/PART.
            Directive::UserJoined { uid, .. } | Directive::UserLeft { uid, .. }
                if Some(uid) == own => {}
            Directive::UserJoined { channel, uid } => {
                self.send(&self.mask(uid), "JOIN", &[&channel], None);
                if let Some(user) = self.users.get(&uid) {
                    if let Some(mode) = user.rank().mode() {
                        let server = self.config.server_name.clone();
                        self.send(&server, "MODE", &[&channel, mode, &user.username], None);
                    }
                }
            }
            Directive::UserLeft { channel, uid } => {
                self.send(&self.mask(uid), "PART", &[&channel], None);
            }
            Directive::NewChannelsAvailable(names) => {
                tracing::debug!(session_id = %self.id, "New channels: {}", names.join(", "));
                if self.config.auto_join {
                    self.pending.extend(names);
                }
            }
        }
    }

    fn on_message(&mut self, message: ChatMessage) {
        if message.id.is_some_and(|id| self.seen.contains(id)) {
            return;
        }
        if let Some(ref sender) = message.sender {
            self.users
                .entry(sender.uid)
                .and_modify(|known| known.username.clone_from(&sender.username))
                .or_insert_with(|| sender.clone());
        }

        // Channel messages only count as seen once delivered, so a later
        // JOIN can still pick them up from history.
        let consumed = self.dispatch(&message);
        if let (true, Some(id)) = (consumed, message.id) {
            self.seen.insert(id);
        }
    }

    /// Show a message to the client. False if it belongs to a channel the
    /// client hasn't joined.
    fn dispatch(&self, message: &ChatMessage) -> bool {
        let own = message.sender_uid().is_some() && message.sender_uid() == self.own_uid();
        match message.kind() {
            MessageKind::Chat | MessageKind::Action | MessageKind::Private if own => {}
            MessageKind::Chat => return self.deliver_chat(message),
            MessageKind::Action => return self.deliver_action(message),
            MessageKind::Private => self.deliver_private(message),
            MessageKind::Global | MessageKind::Welcome => {
                let body = self.decode(message);
                self.send_notice(&body);
            }
            MessageKind::Presence => {}
            MessageKind::SystemNotice => {
                let body = self.decode(message);
                let presence = message.sender.as_ref().is_some_and(|s| {
                    body == format!("{} has entered the chat.", s.username)
                        || body == format!("{} has left the chat.", s.username)
                });
                if !presence {
                    self.diagnostic(&format!("Unknown system message: {body}"));
                }
            }
            MessageKind::Unrecognized => {
                self.diagnostic(&format!(
                    "Unknown message type {}/{}/{}: {}",
                    message.message_type,
                    message.subtype.as_deref().unwrap_or("none"),
                    message.module.as_deref().unwrap_or("none"),
                    message.message
                ));
            }
        }
        true
    }

    /// The joined channel a message belongs to, if any.
    fn joined_channel(&self, message: &ChatMessage) -> Option<String> {
        let channel = roster::channel_name(message.tag.as_deref()?);
        self.joined.contains(&channel).then_some(channel)
    }

    /// Decode the body, surfacing anything odd about it.
    fn decode(&self, message: &ChatMessage) -> String {
        let body = text::decode_body(
            message.encoding(),
            &message.message,
            self.config.drawing_size(),
        );
        match body.warning {
            Some(BodyWarning::Drawing(e)) => {
                tracing::warn!(session_id = %self.id, "{}", BridgeError::Decode(e));
            }
            Some(warning @ BodyWarning::UnknownEncoding(_)) => {
                self.diagnostic(&warning.to_string());
            }
            None => {}
        }
        body.text
    }

    fn deliver_chat(&self, message: &ChatMessage) -> bool {
        let Some(channel) = self.joined_channel(message) else {
            return false;
        };
        let Some(uid) = message.sender_uid() else {
            return true;
        };
        let mut body = self.decode(message);
        if body.starts_with('>') {
            body.insert_str(0, GREEN);
        }
        self.send(&self.mask(uid), "PRIVMSG", &[&channel], Some(&body));
        true
    }

    fn deliver_action(&self, message: &ChatMessage) -> bool {
        let Some(channel) = self.joined_channel(message) else {
            return false;
        };
        let Some(uid) = message.sender_uid() else {
            return true;
        };
        // The body reads "<username> <action>".
        let body = self.decode(message);
        let action = body.split_once(' ').map_or("", |(_, rest)| rest);
        self.send_lines(irc::encode_ctcp(
            Some(&self.mask(uid)),
            "PRIVMSG",
            &[&channel],
            "ACTION",
            action,
        ));
        true
    }

    fn deliver_private(&self, message: &ChatMessage) {
        let Some(sender) = message.sender_uid() else {
            return;
        };
        let recipients: Vec<u64> = message
            .recipients
            .iter()
            .copied()
            .filter(|&uid| uid != sender)
            .collect();
        let &[recipient] = recipients.as_slice() else {
            self.diagnostic(&format!(
                "Private message with {} recipients: {}",
                recipients.len(),
                message.message
            ));
            return;
        };

        let target = self.username(recipient);
        let mask = self.mask(sender);
        // The first line is the module's own from/to header.
        for line in self.decode(message).lines().skip(1) {
            self.send(&mask, "PRIVMSG", &[&target], Some(line));
        }
    }
}
