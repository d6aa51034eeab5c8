//! TCP transport speaking the CRLF line grammar.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use parley_protocol::{LineCodec, ProtocolError};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::link::{CloseSignal, Command, InboxSender, closed};
use crate::{ConnectionId, Link, LinkHandle, LinkKind, Transport, TransportError, traffic};

/// A TCP [`Transport`]: every accepted connection is one session.
pub struct StreamTransport {
    listener: TcpListener,
}

impl StreamTransport {
    /// Binds a new stream transport to the given address.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::Bind)?;
        let local = listener.local_addr().map_err(TransportError::Bind)?;
        tracing::info!(addr = %local, "stream transport listening");
        Ok(Self { listener })
    }
}

impl Transport for StreamTransport {
    async fn accept(&mut self) -> Result<Link, TransportError> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Accept)?;

        let id = ConnectionId::next();
        tracing::debug!(%id, %peer, "accepted stream connection");
        Ok(spawn_link(stream, id, peer))
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener.local_addr().map_err(TransportError::Bind)
    }
}

fn spawn_link(stream: TcpStream, id: ConnectionId, peer: SocketAddr) -> Link {
    let (read, write) = stream.into_split();
    let (commands_tx, commands) = mpsc::unbounded_channel();
    let (inbox_tx, inbox) = mpsc::unbounded_channel();
    let (handle, close) = LinkHandle::new(id, peer, LinkKind::Stream, commands_tx);

    let reader = tokio::spawn(read_lines(
        FramedRead::new(read, LineCodec::new()),
        peer,
        inbox_tx,
    ));
    let writer = FramedWrite::new(write, LineCodec::new());
    tokio::spawn(drive(writer, commands, close, reader, id, peer));

    Link { handle, inbox }
}

/// Serves the command queue: writes each message, then reports back.
async fn drive(
    mut writer: FramedWrite<OwnedWriteHalf, LineCodec>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut close: CloseSignal,
    reader: JoinHandle<()>,
    id: ConnectionId,
    peer: SocketAddr,
) {
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
                let result = match message.validate() {
                    Ok(()) => writer
                        .send(&message)
                        .await
                        .map_err(|e| TransportError::Unreachable(format!("write failed: {e}"))),
                    Err(e) => Err(TransportError::Malformed(e)),
                };
                if result.is_ok() {
                    traffic::sent(peer, &message);
                }
                let broken = matches!(result, Err(TransportError::Unreachable(_)));
                let _ = done.send(result);
                if broken {
                    break;
                }
            }
            Command::Promote { done } => {
                let _ = done.send(Ok(()));
            }
        }
    }

    let _ = writer.get_mut().shutdown().await;
    reader.abort();
    tracing::debug!(%id, %peer, "stream link closed");
}

/// Forwards decoded lines until the peer goes away, a line overruns the
/// limit, or the engine stops listening.
async fn read_lines(
    mut lines: FramedRead<OwnedReadHalf, LineCodec>,
    peer: SocketAddr,
    inbox: InboxSender,
) {
    loop {
        let item = match lines.next().await {
            Some(Ok(decoded)) => decoded.map_err(TransportError::from),
            Some(Err(e)) => Err(TransportError::Unreachable(format!("read failed: {e}"))),
            None => Err(TransportError::Unreachable(
                "connection closed by peer".to_string(),
            )),
        };
        let fatal = match &item {
            Ok(message) => {
                traffic::recv(peer, message);
                false
            }
            Err(TransportError::Malformed(ProtocolError::LineTooLong(_))) => true,
            Err(TransportError::Malformed(e)) => {
                tracing::debug!(%peer, error = %e, "malformed line");
                false
            }
            Err(_) => true,
        };
        if inbox.send(item).is_err() || fatal {
            break;
        }
    }
}
