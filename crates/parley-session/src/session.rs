//! Session types: the server's record of one client and the state machine
//! positions it can be in.

use std::fmt;
use std::net::SocketAddr;

use parley_protocol::DEFAULT_CHANNEL;
use parley_transport::{ConnectionId, LinkHandle, LinkKind};

// ---------------------------------------------------------------------------
// ProtocolState
// ---------------------------------------------------------------------------

/// Where a session is in the protocol.
///
/// ```text
///   Accept ──(auth ok)──→ Open ──(bye / fault)──→ End
///     │                    ↑
///     └─(auth rejected)─→ Auth
/// ```
///
/// `Accept` and `Auth` are both unauthenticated; `Auth` is entered after a
/// rejected attempt. Nothing leaves `End`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolState {
    Accept,
    Auth,
    Open,
    End,
}

impl ProtocolState {
    /// `true` for the states in which an `AUTH` may be attempted.
    pub fn awaiting_auth(self) -> bool {
        matches!(self, Self::Accept | Self::Auth)
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accept => "accept",
            Self::Auth => "auth",
            Self::Open => "open",
            Self::End => "end",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One logical client, whatever transport it arrived on.
///
/// The link handle is the only way to reach the client; it is cloned out
/// of the registry whenever someone needs to send to it.
#[derive(Debug, Clone)]
pub struct Session {
    handle: LinkHandle,

    /// Set once by a successful `AUTH`. Unique across live sessions.
    pub username: Option<String>,

    /// Last display name the client used. Empty until it authenticates.
    pub display_name: String,

    /// Current channel. Broadcast membership is decided by this alone.
    pub channel: String,
}

impl Session {
    /// A fresh, unauthenticated session in the default channel.
    pub fn new(handle: LinkHandle) -> Self {
        Self {
            handle,
            username: None,
            display_name: String::new(),
            channel: DEFAULT_CHANNEL.to_string(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn peer(&self) -> SocketAddr {
        self.handle.peer()
    }

    pub fn kind(&self) -> LinkKind {
        self.handle.kind()
    }

    pub fn handle(&self) -> &LinkHandle {
        &self.handle
    }

    pub fn is_authenticated(&self) -> bool {
        self.username.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_awaiting_auth_only_before_open() {
        assert!(ProtocolState::Accept.awaiting_auth());
        assert!(ProtocolState::Auth.awaiting_auth());
        assert!(!ProtocolState::Open.awaiting_auth());
        assert!(!ProtocolState::End.awaiting_auth());
    }

    #[tokio::test]
    async fn test_new_session_starts_unauthenticated_in_default_channel() {
        let (link, _peer) =
            parley_transport::loopback("127.0.0.1:4000".parse().unwrap(), LinkKind::Stream);
        let session = Session::new(link.handle.clone());
        assert_eq!(session.id(), link.handle.id());
        assert_eq!(session.channel, "general");
        assert!(!session.is_authenticated());
        assert!(session.display_name.is_empty());
    }
}
