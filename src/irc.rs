//! IRC message parsing and framing.
//!
//! Implements the RFC 1459 line format the bridge speaks to clients:
//! `[:prefix] COMMAND [params...] [:trailing]`. Outgoing lines are built
//! under the 512-byte limit; long trailing text is split across several
//! lines that repeat the same header, cutting only on UTF-8 boundaries.

use std::fmt;

/// Maximum length of one protocol line, including the CRLF terminator.
pub const MAX_LINE_BYTES: usize = 512;

const CRLF: &str = "\r\n";
const CTCP_DELIM: char = '\x01';

/// Why a client line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("line has no command")]
    MissingCommand,
    #[error("malformed prefix {0:?}")]
    MalformedPrefix(String),
}

/// Message origin: `nick[!user][@host]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix {
    pub nick: String,
    pub user: Option<String>,
    pub host: Option<String>,
}

impl Prefix {
    fn parse(raw: &str) -> Result<Self, ParseError> {
        let (rest, host) = match raw.split_once('@') {
            Some((rest, host)) => (rest, Some(host.to_string())),
            None => (raw, None),
        };
        let (nick, user) = match rest.split_once('!') {
            Some((nick, user)) => (nick, Some(user.to_string())),
            None => (rest, None),
        };
        if nick.is_empty()
            || user.as_deref() == Some("")
            || host.as_deref() == Some("")
        {
            return Err(ParseError::MalformedPrefix(raw.to_string()));
        }
        Ok(Prefix {
            nick: nick.to_string(),
            user,
            host,
        })
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.nick)?;
        if let Some(ref user) = self.user {
            write!(f, "!{user}")?;
        }
        if let Some(ref host) = self.host {
            write!(f, "@{host}")?;
        }
        Ok(())
    }
}

/// A parsed IRC line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Optional message prefix (server or user origin).
    pub prefix: Option<Prefix>,
    /// The command, upper-cased (e.g. "NICK", "PRIVMSG", "001").
    pub command: String,
    /// Middle parameters, never starting with `:`.
    pub params: Vec<String>,
    /// Free text after the ` :` marker, may contain spaces.
    pub trailing: Option<String>,
}

impl Message {
    /// Parse one line (a trailing CR/LF is tolerated and ignored).
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut rest = line;
        let prefix = match rest.strip_prefix(':') {
            Some(stripped) => {
                let (raw, tail) = stripped
                    .split_once(' ')
                    .ok_or(ParseError::MissingCommand)?;
                rest = tail;
                Some(Prefix::parse(raw)?)
            }
            None => None,
        };

        let (command, mut rest) = match rest.split_once(' ') {
            Some((command, tail)) => (command, tail),
            None => (rest, ""),
        };
        if command.is_empty() || command.starts_with(':') {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();
        let mut trailing = None;
        while !rest.is_empty() {
            if let Some(text) = rest.strip_prefix(':') {
                trailing = Some(text.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((token, tail)) => {
                    if !token.is_empty() {
                        params.push(token.to_string());
                    }
                    rest = tail;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Ok(Message {
            prefix,
            command: command.to_ascii_uppercase(),
            params,
            trailing,
        })
    }

    /// The `index`th argument, counting the trailing text as the argument
    /// after the last middle parameter (`NICK :bob` and `NICK bob` agree).
    pub fn arg(&self, index: usize) -> Option<&str> {
        match self.params.get(index) {
            Some(param) => Some(param.as_str()),
            None if index == self.params.len() => self.trailing.as_deref(),
            None => None,
        }
    }

    /// Frame this message for the wire, splitting the trailing text if needed.
    pub fn encode(&self) -> Vec<String> {
        let source = self.prefix.as_ref().map(|p| p.to_string());
        let params: Vec<&str> = self.params.iter().map(String::as_str).collect();
        encode(
            source.as_deref(),
            &self.command,
            &params,
            self.trailing.as_deref(),
        )
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref prefix) = self.prefix {
            write!(f, ":{prefix} ")?;
        }
        write!(f, "{}", self.command)?;
        for param in &self.params {
            write!(f, " {param}")?;
        }
        if let Some(ref trailing) = self.trailing {
            write!(f, " :{trailing}")?;
        }
        Ok(())
    }
}

/// Build the CRLF-terminated lines for one outgoing message.
///
/// Every line of the result is at most [`MAX_LINE_BYTES`] long (unless the
/// header alone already exceeds it). Each newline in `trailing` starts a new
/// line, and overlong text is cut on character boundaries; every piece
/// repeats `[:source] command params :`.
pub fn encode(
    source: Option<&str>,
    command: &str,
    params: &[&str],
    trailing: Option<&str>,
) -> Vec<String> {
    let head = header(source, command, params);
    match trailing {
        None => vec![format!("{head}{CRLF}")],
        Some(text) => frame(&format!("{head} :"), text, ""),
    }
}

/// Like [`encode`], but wraps every produced piece of `text` in a CTCP
/// `verb` (e.g. `\x01ACTION ...\x01`) so split lines keep their framing.
pub fn encode_ctcp(
    source: Option<&str>,
    command: &str,
    params: &[&str],
    verb: &str,
    text: &str,
) -> Vec<String> {
    let head = header(source, command, params);
    frame(
        &format!("{head} :{CTCP_DELIM}{verb} "),
        text,
        &CTCP_DELIM.to_string(),
    )
}

/// Split a CTCP-framed text into its verb and argument text.
///
/// `"\x01ACTION waves\x01"` yields `("ACTION", "waves")`.
pub fn parse_ctcp(text: &str) -> Option<(&str, &str)> {
    let inner = text.strip_prefix(CTCP_DELIM)?.strip_suffix(CTCP_DELIM)?;
    Some(inner.split_once(' ').unwrap_or((inner, "")))
}

fn header(source: Option<&str>, command: &str, params: &[&str]) -> String {
    let mut head = String::new();
    if let Some(source) = source.filter(|s| !s.is_empty()) {
        head.push(':');
        head.push_str(source);
        head.push(' ');
    }
    head.push_str(command);
    for param in params {
        head.push(' ');
        head.push_str(param);
    }
    head
}

fn frame(head: &str, text: &str, tail: &str) -> Vec<String> {
    let budget = MAX_LINE_BYTES.saturating_sub(head.len() + tail.len() + CRLF.len());
    physical_lines(text)
        .into_iter()
        .flat_map(|line| split_utf8(line, budget))
        .map(|chunk| format!("{head}{chunk}{tail}{CRLF}"))
        .collect()
}

/// Break text on CR, LF and CRLF. A final line terminator does not produce
/// an extra empty line; empty text is one empty line.
fn physical_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .flat_map(|l| l.split('\r'))
        .collect();
    if lines.len() > 1 && lines.last() == Some(&"") {
        lines.pop();
    }
    lines
}

/// Cut `text` into pieces of at most `max_bytes`, never inside a
/// multi-byte character. Always makes progress, even for a tiny budget.
fn split_utf8(mut text: &str, max_bytes: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    while text.len() > max_bytes {
        let mut cut = max_bytes;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            cut = text.chars().next().map_or(text.len(), char::len_utf8);
        }
        let (head, rest) = text.split_at(cut);
        chunks.push(head);
        text = rest;
    }
    chunks.push(text);
    chunks
}

// Registration numerics
pub const RPL_WELCOME: &str = "001";
pub const RPL_ISUPPORT: &str = "005";
pub const RPL_UMODEIS: &str = "221";
pub const ERR_NOMOTD: &str = "422";

// WHO / NAMES / channel numerics
pub const RPL_ENDOFWHO: &str = "315";
pub const RPL_CHANNELMODEIS: &str = "324";
pub const RPL_TOPIC: &str = "332";
pub const RPL_WHOREPLY: &str = "352";
pub const RPL_NAMREPLY: &str = "353";
pub const RPL_ENDOFNAMES: &str = "366";

// Errors
pub const ERR_NOSUCHCHANNEL: &str = "403";
pub const ERR_UNKNOWNCOMMAND: &str = "421";
pub const ERR_NOTONCHANNEL: &str = "442";
pub const ERR_NOTREGISTERED: &str = "451";
pub const ERR_NEEDMOREPARAMS: &str = "461";
