//! The per-session link: a cloneable command handle plus an inbox.
//!
//! Every link is backed by a driver task that owns the socket side. The
//! engine and the broadcaster only ever talk to it through
//! [`LinkHandle`], so a send to one peer never runs on another peer's
//! task.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use parley_protocol::Message;
use tokio::sync::{mpsc, oneshot, watch};

use crate::{ConnectionId, TransportError};

/// Which transport a link runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    Stream,
    Datagram,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => f.write_str("stream"),
            Self::Datagram => f.write_str("datagram"),
        }
    }
}

/// Requests a driver task serves, in order.
#[derive(Debug)]
pub(crate) enum Command {
    /// Put a message on the wire and report when it is delivered.
    Deliver {
        message: Message,
        done: oneshot::Sender<Result<(), TransportError>>,
    },
    /// Move the session to a dedicated endpoint, if the transport has one.
    Promote {
        done: oneshot::Sender<Result<(), TransportError>>,
    },
}

/// Close signal a driver watches next to its command queue. Closing is
/// not queued behind pending deliveries.
pub(crate) type CloseSignal = watch::Receiver<bool>;

/// Decoded inbound traffic, in arrival order.
///
/// An `Err` is either a malformed frame (the stream of messages may
/// continue after it) or the peer becoming unreachable (nothing follows).
pub type Inbox = mpsc::UnboundedReceiver<Result<Message, TransportError>>;

pub(crate) type InboxSender = mpsc::UnboundedSender<Result<Message, TransportError>>;

/// Cheap, cloneable handle to a link's driver task.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    id: ConnectionId,
    peer: SocketAddr,
    kind: LinkKind,
    commands: mpsc::UnboundedSender<Command>,
    close: Arc<watch::Sender<bool>>,
}

impl LinkHandle {
    pub(crate) fn new(
        id: ConnectionId,
        peer: SocketAddr,
        kind: LinkKind,
        commands: mpsc::UnboundedSender<Command>,
    ) -> (Self, CloseSignal) {
        let (close, signal) = watch::channel(false);
        let handle = Self {
            id,
            peer,
            kind,
            commands,
            close: Arc::new(close),
        };
        (handle, signal)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    /// Sends `message` and waits until it is delivered.
    ///
    /// For a stream link that is when the write completes; for a datagram
    /// link it is when the peer's `CONFIRM` arrives.
    ///
    /// # Errors
    /// [`TransportError::Unreachable`] if delivery failed,
    /// [`TransportError::Closed`] if the link is already shut down, and
    /// [`TransportError::Malformed`] if the message breaks a field
    /// constraint.
    pub async fn send(&self, message: &Message) -> Result<(), TransportError> {
        let (done, result) = oneshot::channel();
        self.commands
            .send(Command::Deliver {
                message: message.clone(),
                done,
            })
            .map_err(|_| TransportError::Closed)?;
        result.await.map_err(|_| TransportError::Closed)?
    }

    /// Moves the session to a dedicated endpoint.
    ///
    /// Every message sent after this returns goes out from the new
    /// endpoint. A no-op for stream links.
    ///
    /// # Errors
    /// [`TransportError::Bind`] if the endpoint cannot be bound.
    pub async fn promote(&self) -> Result<(), TransportError> {
        let (done, result) = oneshot::channel();
        self.commands
            .send(Command::Promote { done })
            .map_err(|_| TransportError::Closed)?;
        result.await.map_err(|_| TransportError::Closed)?
    }

    /// Asks the driver to shut the link down. Does not wait.
    ///
    /// Takes effect ahead of anything still queued: a delivery in flight
    /// or waiting its turn fails with [`TransportError::Closed`].
    pub fn close(&self) {
        self.close.send_replace(true);
    }

    /// `true` once the driver task has exited.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Resolves once the link has been asked to close, or every handle is
/// gone.
pub(crate) async fn closed(signal: &mut CloseSignal) {
    let _ = signal.wait_for(|closed| *closed).await;
}

/// A freshly accepted session link.
#[derive(Debug)]
pub struct Link {
    pub handle: LinkHandle,
    pub inbox: Inbox,
}
