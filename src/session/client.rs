//! IRC commands from the client.

use std::collections::HashSet;

use super::{BridgeSession, Login, SessionState};
use crate::error::BridgeError;
use crate::irc::{self, Message};
use crate::roster;
use crate::sbs::OutboundFrame;

/// `PONG <token>`, with the token as a trailing parameter only when it
/// can't stand as a middle one.
fn pong(token: &str) -> Vec<String> {
    if token.is_empty() || token.contains(' ') || token.starts_with(':') {
        irc::encode(None, "PONG", &[], Some(token))
    } else {
        irc::encode(None, "PONG", &[token], None)
    }
}

impl BridgeSession {
    pub(super) fn handle_line(&mut self, line: &str) {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return;
        }
        tracing::debug!(session_id = %self.id, "<- {line}");

        let msg = match Message::parse(line) {
            Ok(msg) => msg,
            Err(e) => {
                self.report(BridgeError::Parse(e));
                self.send_numeric(irc::ERR_UNKNOWNCOMMAND, &["*"], Some("Unknown command"));
                return;
            }
        };

        match msg.command.as_str() {
            "PING" => match msg.arg(0) {
                Some(token) => self.send_lines(pong(token)),
                None => self.need_more_params("PING"),
            },
            "PONG" | "CAP" => {}
            "PASS" | "NICK" | "USER" => self.handle_credential(&msg),
            "QUIT" => {
                tracing::info!(session_id = %self.id, "Client quit");
                self.close();
            }
            "MODE" => self.handle_mode(&msg),
            "JOIN" | "PART" | "PRIVMSG" | "WHO" if !self.welcomed => {
                self.report(BridgeError::ProtocolViolation(format!(
                    "{} before registration",
                    msg.command
                )));
                self.send_numeric(irc::ERR_NOTREGISTERED, &[], Some("You have not registered"));
            }
            "JOIN" => self.handle_join(&msg),
            "PART" => self.handle_part(&msg),
            "PRIVMSG" => self.handle_privmsg(&msg),
            "WHO" => self.handle_who(&msg),
            other => {
                self.send_numeric(irc::ERR_UNKNOWNCOMMAND, &[other], Some("Unknown command"));
            }
        }
    }

    fn need_more_params(&self, command: &str) {
        self.send_numeric(irc::ERR_NEEDMOREPARAMS, &[command], Some("Not enough parameters"));
    }

    fn handle_credential(&mut self, msg: &Message) {
        let Some(value) = msg.arg(0).filter(|v| !v.is_empty()) else {
            self.need_more_params(&msg.command);
            return;
        };
        let value = Some(value.to_string());
        match msg.command.as_str() {
            "PASS" => self.credentials.password = value,
            "NICK" => self.credentials.nickname = value,
            _ => self.credentials.realname = value,
        }
        self.try_complete_credentials();
    }

    /// Welcome the client and start the remote login once PASS, NICK and
    /// USER have all been seen. Fires once per session.
    fn try_complete_credentials(&mut self) {
        if self.state != SessionState::Unauthenticated {
            return;
        }
        let (Some(nickname), Some(password), Some(_)) = (
            self.credentials.nickname.clone(),
            self.credentials.password.clone(),
            self.credentials.realname.as_ref(),
        ) else {
            return;
        };
        self.set_state(SessionState::CredentialsComplete);

        // The client must consider itself connected before any chat traffic.
        self.send_numeric(irc::RPL_WELCOME, &[], Some("Welcome!"));
        self.send_numeric(
            irc::RPL_ISUPPORT,
            &["CHANTYPES=#", "PREFIX=(ov)@+"],
            Some("are supported by this server"),
        );
        self.send_numeric(irc::ERR_NOMOTD, &[], Some("MOTD File is missing"));
        self.welcomed = true;

        let login = Login {
            username: nickname,
            password,
        };
        self.remote_task = Some(self.connector.launch(login, self.events.clone()));
        self.set_state(SessionState::RemoteConnecting);
    }

    fn handle_mode(&self, msg: &Message) {
        let Some(target) = msg.arg(0) else {
            self.need_more_params("MODE");
            return;
        };
        if target.starts_with(roster::CHANNEL_PREFIX) {
            // Channels have no modes on SBS; everyone sees a topic lock.
            self.send_numeric(irc::RPL_CHANNELMODEIS, &[target, "+t"], None);
        } else {
            self.send_numeric(irc::RPL_UMODEIS, &["+"], None);
        }
    }

    fn handle_join(&mut self, msg: &Message) {
        let Some(targets) = msg.arg(0) else {
            self.need_more_params("JOIN");
            return;
        };
        self.pending.extend(
            targets
                .split(',')
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        );
        self.drain_pending();
    }

    /// Join every queued channel that exists; unknown ones are refused and
    /// forgotten. Waits while the roster is still empty.
    pub(super) fn drain_pending(&mut self) {
        if self.channels.is_empty() || self.pending.is_empty() {
            return;
        }
        let mut seen = HashSet::new();
        let mut joined_some = false;
        for channel in std::mem::take(&mut self.pending) {
            if !seen.insert(channel.clone()) {
                continue;
            }
            if !self.channels.contains_key(&channel) {
                self.send_numeric(irc::ERR_NOSUCHCHANNEL, &[&channel], Some("No such channel"));
                continue;
            }
            if self.joined.insert(channel.clone()) {
                joined_some = true;
            }
            self.send_from_me("JOIN", &[&channel], None);
            self.send_numeric(irc::RPL_TOPIC, &[&channel], Some(&self.config.topic));
            self.send_names(&channel);
        }

        if joined_some {
            if let Some(ref link) = self.link {
                link.send(OutboundFrame::message_list_request());
            }
        }
    }

    /// NAMES reply, as many nicks per line as fit.
    fn send_names(&self, channel: &str) {
        let Some(members) = self.channels.get(channel) else {
            return;
        };
        let nicks: Vec<String> = members
            .iter()
            .filter_map(|uid| self.users.get(uid))
            .map(|u| format!("{}{}", u.rank().prefix(), u.username))
            .collect();

        let nick = self.nick().to_string();
        let header = format!(
            ":{} {} {nick} = {channel} :",
            self.config.server_name,
            irc::RPL_NAMREPLY
        );
        let budget = irc::MAX_LINE_BYTES.saturating_sub(header.len() + 2);
        let mut packed: Vec<String> = Vec::new();
        let mut current = String::new();
        for name in nicks {
            if !current.is_empty() && current.len() + 1 + name.len() > budget {
                packed.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&name);
        }
        if !current.is_empty() {
            packed.push(current);
        }
        for names in packed {
            self.send_numeric(irc::RPL_NAMREPLY, &["=", channel], Some(&names));
        }
        self.send_numeric(irc::RPL_ENDOFNAMES, &[channel], Some("End of /NAMES list"));
    }

    fn handle_part(&mut self, msg: &Message) {
        let Some(targets) = msg.arg(0) else {
            self.need_more_params("PART");
            return;
        };
        for channel in targets.split(',').filter(|c| !c.is_empty()) {
            if self.joined.remove(channel) {
                self.send_from_me("PART", &[channel], None);
            } else {
                self.send_numeric(
                    irc::ERR_NOTONCHANNEL,
                    &[channel],
                    Some("You're not on that channel"),
                );
            }
        }
    }

    fn handle_privmsg(&mut self, msg: &Message) {
        let (Some(target), Some(text)) = (msg.arg(0), msg.arg(1)) else {
            self.need_more_params("PRIVMSG");
            return;
        };

        let text = match irc::parse_ctcp(text) {
            Some(("ACTION", action)) => format!("/me {action}"),
            _ => text.to_string(),
        };

        let (tag, text) = if self.channels.contains_key(target) {
            (roster::tag_of(target).unwrap_or(target).to_string(), text)
        } else if self.users.values().any(|u| u.username == target) {
            (self.config.pm_tag.clone(), format!("/pm {target} {text}"))
        } else {
            self.report(BridgeError::UnroutableDestination(target.to_string()));
            return;
        };

        match self.link {
            Some(ref link) => {
                link.send(link.message(&tag, text));
            }
            None => {
                let error = BridgeError::ProtocolViolation(
                    "Not connected to SmileBASIC Source yet".to_string(),
                );
                self.diagnostic(&error.to_string());
                self.report(error);
            }
        }
    }

    fn handle_who(&self, msg: &Message) {
        let Some(channel) = msg.arg(0) else {
            self.need_more_params("WHO");
            return;
        };
        let server = self.config.server_name.clone();
        if let Some(members) = self.channels.get(channel) {
            for user in members.iter().filter_map(|uid| self.users.get(uid)) {
                let uid = user.uid.to_string();
                let flags = format!(
                    "{}{}",
                    if user.active { "H" } else { "G" },
                    user.rank().prefix()
                );
                self.send_numeric(
                    irc::RPL_WHOREPLY,
                    &[channel, &uid, &server, &server, &user.username, &flags],
                    Some(&format!("0 {}", user.username)),
                );
            }
        }
        self.send_numeric(irc::RPL_ENDOFWHO, &[channel], Some("End of /WHO list."));
    }
}
