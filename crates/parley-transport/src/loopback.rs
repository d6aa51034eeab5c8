//! In-memory link with no socket behind it.
//!
//! Delivery succeeds as soon as the message is queued for the peer side,
//! so sessions can be driven message by message from a test.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parley_protocol::Message;
use tokio::sync::mpsc;

use crate::link::{Command, closed};
use crate::{ConnectionId, Link, LinkHandle, LinkKind, TransportError};

/// The far end of a [`loopback`] link.
#[derive(Debug)]
pub struct LoopbackPeer {
    inbound: mpsc::UnboundedSender<Result<Message, TransportError>>,
    delivered: mpsc::UnboundedReceiver<Message>,
    promoted: Arc<AtomicBool>,
}

impl LoopbackPeer {
    /// Hands `message` to the session as if it arrived on the wire.
    pub fn inject(&self, message: Message) {
        let _ = self.inbound.send(Ok(message));
    }

    /// Hands a transport error to the session.
    pub fn inject_error(&self, error: TransportError) {
        let _ = self.inbound.send(Err(error));
    }

    /// Next message the session delivered, or `None` once the link is
    /// closed and drained.
    pub async fn next(&mut self) -> Option<Message> {
        self.delivered.recv().await
    }

    /// Next delivered message if one is already queued.
    pub fn try_next(&mut self) -> Option<Message> {
        self.delivered.try_recv().ok()
    }

    /// Everything delivered until the link closes.
    pub async fn drain(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(message) = self.delivered.recv().await {
            messages.push(message);
        }
        messages
    }

    /// `true` once the session asked to move to a dedicated endpoint.
    pub fn promoted(&self) -> bool {
        self.promoted.load(Ordering::SeqCst)
    }
}

/// Builds a link whose peer side is driven in memory.
pub fn loopback(peer: SocketAddr, kind: LinkKind) -> (Link, LoopbackPeer) {
    let id = ConnectionId::next();
    let (commands_tx, mut commands) = mpsc::unbounded_channel();
    let (inbound, inbox) = mpsc::unbounded_channel();
    let (delivered_tx, delivered) = mpsc::unbounded_channel();
    let promoted = Arc::new(AtomicBool::new(false));

    let (handle, mut close) = LinkHandle::new(id, peer, kind, commands_tx);

    let flag = Arc::clone(&promoted);
    tokio::spawn(async move {
        loop {
            let command = tokio::select! {
                () = closed(&mut close) => break,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            match command {
                Command::Deliver { message, done } => {
                    let result = delivered_tx
                        .send(message)
                        .map_err(|_| TransportError::Unreachable("loopback peer dropped".into()));
                    let _ = done.send(result);
                }
                Command::Promote { done } => {
                    flag.store(true, Ordering::SeqCst);
                    let _ = done.send(Ok(()));
                }
            }
        }
    });

    let link = Link { handle, inbox };
    let peer = LoopbackPeer {
        inbound,
        delivered,
        promoted,
    };
    (link, peer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_loopback_send_reaches_peer() {
        let (link, mut peer) = loopback(addr(), LinkKind::Stream);
        link.handle.send(&Message::Bye).await.unwrap();
        assert_eq!(peer.next().await, Some(Message::Bye));
    }

    #[tokio::test]
    async fn test_loopback_inject_reaches_inbox() {
        let (mut link, peer) = loopback(addr(), LinkKind::Datagram);
        peer.inject(Message::notice("hi"));
        let received = link.inbox.recv().await.unwrap().unwrap();
        assert_eq!(received, Message::notice("hi"));
    }

    #[tokio::test]
    async fn test_loopback_close_ends_peer_stream() {
        let (link, mut peer) = loopback(addr(), LinkKind::Stream);
        link.handle.send(&Message::Bye).await.unwrap();
        link.handle.close();
        assert_eq!(peer.drain().await, vec![Message::Bye]);
    }

    #[tokio::test]
    async fn test_loopback_send_after_close_fails() {
        let (link, _peer) = loopback(addr(), LinkKind::Stream);
        link.handle.close();
        // Wait for the driver to observe the close.
        while !link.handle.is_closed() {
            tokio::task::yield_now().await;
        }
        assert!(matches!(
            link.handle.send(&Message::Bye).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_loopback_promote_sets_flag() {
        let (link, peer) = loopback(addr(), LinkKind::Datagram);
        assert!(!peer.promoted());
        link.handle.promote().await.unwrap();
        assert!(peer.promoted());
    }

    #[tokio::test]
    async fn test_loopback_send_to_dropped_peer_is_unreachable() {
        let (link, peer) = loopback(addr(), LinkKind::Stream);
        drop(peer);
        let err = link.handle.send(&Message::Bye).await.unwrap_err();
        assert!(err.is_unreachable());
    }
}
