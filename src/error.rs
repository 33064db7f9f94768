//! Session-level error taxonomy.

use crate::drawing::DecodeError;
use crate::irc::ParseError;
use crate::sbs::RemoteError;

/// Everything that can go wrong while bridging one connection.
///
/// Only remote failures end the session; the rest are reported and the
/// session carries on.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("unparseable line: {0}")]
    Parse(#[from] ParseError),
    #[error("{0}")]
    ProtocolViolation(String),
    #[error("SBS login failed: {0}")]
    RemoteAuthFailure(String),
    #[error("SBS connection failed: {0}")]
    RemoteTransportFailure(String),
    #[error("couldn't decode drawing: {0}")]
    Decode(#[from] DecodeError),
    #[error("unrecognized destination {0}")]
    UnroutableDestination(String),
}

impl BridgeError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::RemoteAuthFailure(_) | BridgeError::RemoteTransportFailure(_)
        )
    }
}

impl From<RemoteError> for BridgeError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Auth(e) => BridgeError::RemoteAuthFailure(e.to_string()),
            other => BridgeError::RemoteTransportFailure(other.to_string()),
        }
    }
}
