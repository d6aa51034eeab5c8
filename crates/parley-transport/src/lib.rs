//! Transport layer for Parley.
//!
//! Two transports carry the same [`Message`](parley_protocol::Message)s:
//!
//! - [`StreamTransport`]: one TCP connection per session, CRLF lines.
//! - [`DatagramTransport`]: one shared UDP socket demultiplexed by peer
//!   address, with stop-and-wait acknowledgment, retransmission,
//!   duplicate suppression, and migration to a per-session socket.
//!
//! Both hand out a [`Link`] per session. The [`LinkHandle`] half sends
//! and waits for delivery; the [`Inbox`] half yields decoded messages.
//! [`loopback`] builds an in-memory link with no socket behind it.

#![allow(async_fn_in_trait)]

mod datagram;
mod error;
mod link;
mod loopback;
mod stream;

pub use datagram::{DatagramConfig, DatagramTransport};
pub use error::TransportError;
pub use link::{Inbox, Link, LinkHandle, LinkKind};
pub use loopback::{LoopbackPeer, loopback};
pub use stream::StreamTransport;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one session for as long as the process runs. Ids are
/// handed out in increasing order, so sorting by id sorts by age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw id. Tests use this to build stable ids.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-unique id.
    pub fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.into_inner())
    }
}

/// Accepts new sessions.
pub trait Transport: Send + 'static {
    /// Waits for the next new session and returns its link.
    async fn accept(&mut self) -> Result<Link, TransportError>;

    /// The address the transport is listening on.
    fn local_addr(&self) -> Result<SocketAddr, TransportError>;
}

/// One line per message on the wire, under the `parley::traffic` target.
pub(crate) mod traffic {
    use std::fmt::Display;
    use std::net::SocketAddr;

    pub(crate) fn recv(peer: SocketAddr, what: impl Display) {
        tracing::info!(target: "parley::traffic", "RECV {peer} | {what}");
    }

    pub(crate) fn sent(peer: SocketAddr, what: impl Display) {
        tracing::info!(target: "parley::traffic", "SENT {peer} | {what}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_raw_value_survives() {
        assert_eq!(ConnectionId::new(42).into_inner(), 42);
    }

    #[test]
    fn test_connection_id_displays_with_prefix() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_next_is_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }
}
