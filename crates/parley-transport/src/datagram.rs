//! UDP transport with stop-and-wait reliability.
//!
//! A single well-known socket receives every datagram. The listener
//! ([`DatagramTransport::accept`]) forwards each one to the session that
//! owns its source address, or opens a new session for an unknown one.
//! Each session is served by its own driver task, which:
//!
//! - numbers outbound messages and keeps at most one in flight,
//!   retransmitting the identical frame on timeout until the retry budget
//!   runs out;
//! - confirms every well-formed inbound message, delivering each id to
//!   the engine only once;
//! - after promotion, sends from and listens on a socket of its own.
//!
//! ```text
//!                        ┌──────────► driver (peer A) ──► inbox A
//! shared socket ─► demux ┤
//!                        └──────────► driver (peer B) ──► inbox B
//!                                          ▲
//!                          dedicated socket (after promotion)
//! ```

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parley_protocol::datagram::{self, Datagram, MessageId};
use parley_protocol::Message;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};

use crate::link::{CloseSignal, Command, InboxSender, closed};
use crate::{ConnectionId, Link, LinkHandle, LinkKind, Transport, TransportError, traffic};

/// Largest datagram we will read.
const MAX_DATAGRAM_LEN: usize = 65_535;

/// Reliability settings for datagram sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramConfig {
    /// How long to wait for a `CONFIRM` before retransmitting.
    pub timeout: Duration,
    /// Retransmissions after the first send before giving up.
    pub max_retries: u8,
}

impl Default for DatagramConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(250),
            max_retries: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// A UDP [`Transport`]: every previously unseen source address is one
/// session.
pub struct DatagramTransport {
    socket: Arc<UdpSocket>,
    config: DatagramConfig,
    sessions: HashMap<SocketAddr, Route>,
    ended_tx: mpsc::UnboundedSender<(SocketAddr, ConnectionId)>,
    ended_rx: mpsc::UnboundedReceiver<(SocketAddr, ConnectionId)>,
    buf: Vec<u8>,
}

/// Where the listener forwards a known peer's datagrams.
struct Route {
    id: ConnectionId,
    raw: mpsc::UnboundedSender<Bytes>,
}

enum ListenerEvent {
    Ended(SocketAddr, ConnectionId),
    Datagram(Bytes, SocketAddr),
}

impl DatagramTransport {
    /// Binds the well-known socket.
    pub async fn bind(addr: SocketAddr, config: DatagramConfig) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await.map_err(TransportError::Bind)?;
        let local = socket.local_addr().map_err(TransportError::Bind)?;
        tracing::info!(
            addr = %local,
            timeout_ms = config.timeout.as_millis() as u64,
            max_retries = config.max_retries,
            "datagram transport listening"
        );
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        Ok(Self {
            socket: Arc::new(socket),
            config,
            sessions: HashMap::new(),
            ended_tx,
            ended_rx,
            buf: vec![0; MAX_DATAGRAM_LEN],
        })
    }

    /// Number of peers currently routed to a session.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn open_session(&mut self, peer: SocketAddr, first: Bytes) -> Result<Link, TransportError> {
        let id = ConnectionId::next();
        let bind_addr = SocketAddr::new(self.local_addr()?.ip(), 0);

        let (raw_tx, raw) = mpsc::unbounded_channel();
        let _ = raw_tx.send(first);
        self.sessions.insert(peer, Route { id, raw: raw_tx });

        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (handle, close) = LinkHandle::new(id, peer, LinkKind::Datagram, commands_tx);

        let driver = Driver {
            id,
            peer,
            config: self.config,
            bind_addr,
            shared: Arc::clone(&self.socket),
            dedicated: None,
            raw,
            commands,
            close,
            inbox: inbox_tx,
            ended: self.ended_tx.clone(),
            next_id: 0,
            pending: None,
            seen: HashSet::new(),
            last_inbound: 0,
            linger_until: None,
        };
        tokio::spawn(driver.run());

        tracing::debug!(%id, %peer, "new datagram session");
        Ok(Link { handle, inbox })
    }
}

impl Transport for DatagramTransport {
    async fn accept(&mut self) -> Result<Link, TransportError> {
        loop {
            let event = tokio::select! {
                Some((peer, id)) = self.ended_rx.recv() => ListenerEvent::Ended(peer, id),
                result = self.socket.recv_from(&mut self.buf) => {
                    let (len, peer) = result.map_err(TransportError::Accept)?;
                    ListenerEvent::Datagram(Bytes::copy_from_slice(&self.buf[..len]), peer)
                }
            };

            match event {
                ListenerEvent::Ended(peer, id) => {
                    if self.sessions.get(&peer).is_some_and(|route| route.id == id) {
                        self.sessions.remove(&peer);
                        tracing::debug!(%id, %peer, "datagram route removed");
                    }
                }
                ListenerEvent::Datagram(data, peer) => {
                    if let Some(route) = self.sessions.get(&peer) {
                        match route.raw.send(data) {
                            Ok(()) => continue,
                            // Driver already gone: start over with a new session.
                            Err(mpsc::error::SendError(data)) => {
                                self.sessions.remove(&peer);
                                return self.open_session(peer, data);
                            }
                        }
                    }
                    return self.open_session(peer, data);
                }
            }
        }
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.socket.local_addr().map_err(TransportError::Bind)
    }
}

// ---------------------------------------------------------------------------
// Per-session driver
// ---------------------------------------------------------------------------

/// The one outbound message awaiting its `CONFIRM`.
struct Pending {
    id: MessageId,
    frame: Bytes,
    retries: u8,
    deadline: Instant,
    done: oneshot::Sender<Result<(), TransportError>>,
}

enum DriverEvent {
    Command(Command),
    Close,
    Inbound(Bytes, SocketAddr),
    Timer,
}

struct Driver {
    id: ConnectionId,
    peer: SocketAddr,
    config: DatagramConfig,
    bind_addr: SocketAddr,
    shared: Arc<UdpSocket>,
    dedicated: Option<UdpSocket>,
    raw: mpsc::UnboundedReceiver<Bytes>,
    commands: mpsc::UnboundedReceiver<Command>,
    close: CloseSignal,
    inbox: InboxSender,
    ended: mpsc::UnboundedSender<(SocketAddr, ConnectionId)>,
    next_id: MessageId,
    pending: Option<Pending>,
    seen: HashSet<MessageId>,
    last_inbound: MessageId,
    linger_until: Option<Instant>,
}

impl Driver {
    async fn run(mut self) {
        let mut buf = vec![0; MAX_DATAGRAM_LEN];
        loop {
            let deadline = self
                .pending
                .as_ref()
                .map(|p| p.deadline)
                .or(self.linger_until);
            let closing = self.linger_until.is_some();
            let accepting = self.pending.is_none() && !closing;

            let event = tokio::select! {
                () = closed(&mut self.close), if !closing => DriverEvent::Close,
                command = self.commands.recv(), if accepting => match command {
                    Some(command) => DriverEvent::Command(command),
                    None => DriverEvent::Close,
                },
                Some(data) = self.raw.recv() => DriverEvent::Inbound(data, self.peer),
                result = recv_dedicated(self.dedicated.as_ref(), &mut buf) => match result {
                    Ok((len, from)) => DriverEvent::Inbound(Bytes::copy_from_slice(&buf[..len]), from),
                    Err(e) => {
                        tracing::warn!(id = %self.id, error = %e, "dedicated socket receive failed");
                        continue;
                    }
                },
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => DriverEvent::Timer,
            };

            let keep_going = match event {
                DriverEvent::Command(command) => {
                    self.on_command(command).await;
                    true
                }
                DriverEvent::Close => {
                    self.on_close();
                    true
                }
                DriverEvent::Inbound(data, from) => {
                    self.on_datagram(data, from).await;
                    true
                }
                DriverEvent::Timer => self.on_timer().await,
            };
            if !keep_going {
                break;
            }
        }

        let _ = self.ended.send((self.peer, self.id));
        tracing::debug!(id = %self.id, peer = %self.peer, "datagram link closed");
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Deliver { message, done } => self.deliver(message, done).await,
            Command::Promote { done } => {
                let result = self.promote().await;
                let _ = done.send(result);
            }
        }
    }

    /// Abandons any unconfirmed message and starts lingering. Nothing is
    /// sent or retransmitted after this.
    fn on_close(&mut self) {
        if let Some(pending) = self.pending.take() {
            tracing::debug!(id = %self.id, msg_id = pending.id, "closed with message unconfirmed");
            let _ = pending.done.send(Err(TransportError::Closed));
        }
        if self.linger_until.is_none() {
            self.linger_until = Some(Instant::now() + self.config.timeout);
        }
    }

    async fn deliver(&mut self, message: Message, done: oneshot::Sender<Result<(), TransportError>>) {
        let id = self.next_id;
        let reply_to = if matches!(message, Message::Reply { .. }) {
            self.last_inbound
        } else {
            0
        };
        let payload = Datagram::Payload {
            id,
            reply_to,
            message,
        };
        let frame = match datagram::encode(&payload) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = done.send(Err(TransportError::Malformed(e)));
                return;
            }
        };
        self.next_id = self.next_id.wrapping_add(1);

        if let Err(e) = self.socket().send_to(&frame, self.peer).await {
            let _ = done.send(Err(TransportError::Unreachable(format!("send failed: {e}"))));
            return;
        }
        if let Datagram::Payload { message, .. } = &payload {
            traffic::sent(self.peer, format_args!("{message} #{id}"));
        }

        self.pending = Some(Pending {
            id,
            frame,
            retries: 0,
            deadline: Instant::now() + self.config.timeout,
            done,
        });
    }

    async fn promote(&mut self) -> Result<(), TransportError> {
        if self.dedicated.is_some() {
            return Ok(());
        }
        let socket = UdpSocket::bind(self.bind_addr)
            .await
            .map_err(TransportError::Bind)?;
        tracing::debug!(
            id = %self.id,
            peer = %self.peer,
            local = ?socket.local_addr().ok(),
            "session moved to dedicated socket"
        );
        self.dedicated = Some(socket);
        Ok(())
    }

    async fn on_datagram(&mut self, data: Bytes, from: SocketAddr) {
        if from != self.peer {
            tracing::debug!(id = %self.id, %from, "ignoring datagram from foreign address");
            return;
        }

        match datagram::decode(&data) {
            Ok(Datagram::Confirm { ref_id }) => {
                traffic::recv(from, format_args!("CONFIRM #{ref_id}"));
                if self.pending.as_ref().is_some_and(|p| p.id == ref_id) {
                    if let Some(pending) = self.pending.take() {
                        let _ = pending.done.send(Ok(()));
                    }
                }
            }
            Ok(Datagram::Payload { id, message, .. }) => {
                traffic::recv(from, format_args!("{message} #{id}"));
                self.confirm(id).await;
                if !self.seen.insert(id) {
                    tracing::debug!(id = %self.id, msg_id = id, "duplicate datagram, not delivered");
                    return;
                }
                if self.linger_until.is_none() {
                    self.last_inbound = id;
                    let _ = self.inbox.send(Ok(message));
                }
            }
            Err(e) => {
                tracing::debug!(id = %self.id, error = %e, "malformed datagram");
                if self.linger_until.is_none() {
                    let _ = self.inbox.send(Err(TransportError::Malformed(e)));
                }
            }
        }
    }

    async fn confirm(&self, ref_id: MessageId) {
        let Ok(frame) = datagram::encode(&Datagram::Confirm { ref_id }) else {
            return;
        };
        match self.socket().send_to(&frame, self.peer).await {
            Ok(_) => traffic::sent(self.peer, format_args!("CONFIRM #{ref_id}")),
            Err(e) => tracing::warn!(id = %self.id, error = %e, "failed to send confirm"),
        }
    }

    /// Retransmits or gives up on the pending message, or ends the linger.
    async fn on_timer(&mut self) -> bool {
        let Some(mut pending) = self.pending.take() else {
            return self.linger_until.is_none();
        };

        if pending.retries >= self.config.max_retries {
            let reason = format!(
                "no confirmation for #{} after {} retransmissions",
                pending.id, pending.retries
            );
            tracing::warn!(id = %self.id, peer = %self.peer, "{reason}");
            let _ = pending.done.send(Err(TransportError::Unreachable(reason.clone())));
            let _ = self.inbox.send(Err(TransportError::Unreachable(reason)));
            return false;
        }

        pending.retries += 1;
        tracing::warn!(
            id = %self.id,
            peer = %self.peer,
            msg_id = pending.id,
            attempt = pending.retries,
            "retransmitting"
        );
        if let Err(e) = self.socket().send_to(&pending.frame, self.peer).await {
            tracing::warn!(id = %self.id, error = %e, "retransmission failed");
        }
        pending.deadline = Instant::now() + self.config.timeout;
        self.pending = Some(pending);
        true
    }

    fn socket(&self) -> &UdpSocket {
        self.dedicated.as_ref().unwrap_or(&*self.shared)
    }
}

async fn recv_dedicated(socket: Option<&UdpSocket>, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
    match socket {
        Some(socket) => socket.recv_from(buf).await,
        None => std::future::pending().await,
    }
}
