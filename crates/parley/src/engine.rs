//! Per-session protocol engine.
//!
//! One [`Engine`] runs for every session, on its own task. It consumes the
//! session's inbox, drives the [`ProtocolState`] machine, and talks back
//! through the session's link and the channel broadcaster:
//!
//! | state          | received | action                                        | next    |
//! |----------------|----------|-----------------------------------------------|---------|
//! | Accept / Auth  | `AUTH`   | claim username; promote; `REPLY OK`; join notice | Open |
//! | Accept / Auth  | `AUTH`   | username taken: `REPLY NOK`                    | Auth    |
//! | Open           | `MSG`    | record display name; broadcast to channel      | Open    |
//! | Open           | `JOIN`   | switch; `REPLY OK`; leave + join notices       | Open    |
//! | Open           | `ERR`    |                                               | End     |
//! | any            | `BYE`    |                                               | End     |
//! | anything else  |          | violation                                     | End     |

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parley_protocol::Message;
use parley_session::{ProtocolState, SessionError, broadcast};
use parley_transport::{ConnectionId, Inbox, Link, LinkHandle, TransportError};

use crate::server::ServerState;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The peer said `BYE`.
    PeerBye,
    /// The peer sent `ERR`; carries its content.
    PeerError(String),
    /// The peer broke the protocol; carries what to tell it.
    Violation(String),
    /// The peer can no longer be reached.
    Unreachable(String),
    /// Something went wrong on our side.
    Internal(String),
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerBye => f.write_str("peer said bye"),
            Self::PeerError(content) => write!(f, "peer reported error: {content}"),
            Self::Violation(reason) => write!(f, "protocol violation: {reason}"),
            Self::Unreachable(reason) => write!(f, "peer unreachable: {reason}"),
            Self::Internal(reason) => write!(f, "internal error: {reason}"),
        }
    }
}

impl From<TransportError> for Termination {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Malformed(e) => Self::Violation(e.to_string()),
            TransportError::Unreachable(reason) => Self::Unreachable(reason),
            TransportError::Closed => Self::Unreachable("link closed".to_string()),
            other @ (TransportError::Bind(_) | TransportError::Accept(_)) => {
                Self::Internal(other.to_string())
            }
        }
    }
}

/// Removes the session from the registry when the engine task exits.
///
/// `Engine::run` removes it itself on the normal path; this covers a task
/// that is cancelled or panics mid-session. `Drop` is synchronous, so the
/// removal runs on a fire-and-forget task.
struct SessionGuard {
    id: ConnectionId,
    state: Arc<ServerState>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let id = self.id;
        let state = Arc::clone(&self.state);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                state.sessions.lock().await.remove(id);
            });
        }
    }
}

/// The state machine for one session.
pub(crate) struct Engine {
    handle: LinkHandle,
    inbox: Inbox,
    state: Arc<ServerState>,
    protocol: ProtocolState,
    authenticated: bool,
    display_name: String,
    channel: String,
    /// Messages that arrived while a send was waiting for its reply.
    deferred: VecDeque<Message>,
}

impl Engine {
    pub(crate) fn new(link: Link, state: Arc<ServerState>) -> Self {
        Self {
            handle: link.handle,
            inbox: link.inbox,
            state,
            protocol: ProtocolState::Accept,
            authenticated: false,
            display_name: String::new(),
            channel: parley_protocol::DEFAULT_CHANNEL.to_string(),
            deferred: VecDeque::new(),
        }
    }

    fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// Registers the session, serves it until it ends, and cleans up.
    pub(crate) async fn run(mut self) -> Termination {
        let id = self.id();
        if let Err(e) = self.state.sessions.lock().await.insert(self.handle.clone()) {
            tracing::error!(%id, error = %e, "failed to register session");
            self.handle.close();
            return Termination::Internal(e.to_string());
        }
        let _guard = SessionGuard {
            id,
            state: Arc::clone(&self.state),
        };
        tracing::info!(
            %id,
            peer = %self.handle.peer(),
            kind = %self.handle.kind(),
            "session started"
        );

        let termination = loop {
            let message = match self.next_message().await {
                Ok(message) => message,
                Err(termination) => break termination,
            };
            if let Err(termination) = self.on_message(message).await {
                break termination;
            }
        };

        self.finish(&termination).await;
        termination
    }

    /// Sends `message` and waits for it to be delivered.
    ///
    /// `AUTH` and `JOIN` additionally wait until the peer's `REPLY` has
    /// arrived. Whatever else arrives meanwhile is handled afterwards, in
    /// order. Returns the reply status for those two kinds.
    pub(crate) async fn send(&mut self, message: &Message) -> Result<Option<bool>, Termination> {
        self.deliver(message).await?;
        if !message.expects_reply() {
            return Ok(None);
        }
        loop {
            match self.recv().await? {
                Message::Reply { status, content } => {
                    tracing::debug!(id = %self.id(), status, %content, "reply received");
                    return Ok(Some(status));
                }
                other => self.deferred.push_back(other),
            }
        }
    }

    async fn deliver(&self, message: &Message) -> Result<(), Termination> {
        self.handle.send(message).await.map_err(|e| match e {
            TransportError::Malformed(e) => {
                Termination::Internal(format!("refused to send invalid {}: {e}", message.kind()))
            }
            other => Termination::from(other),
        })
    }

    async fn recv(&mut self) -> Result<Message, Termination> {
        match self.inbox.recv().await {
            Some(Ok(message)) => Ok(message),
            Some(Err(e)) => Err(Termination::from(e)),
            None => Err(Termination::Unreachable("link closed".to_string())),
        }
    }

    async fn next_message(&mut self) -> Result<Message, Termination> {
        match self.deferred.pop_front() {
            Some(message) => Ok(message),
            None => self.recv().await,
        }
    }

    async fn on_message(&mut self, message: Message) -> Result<(), Termination> {
        match (self.protocol, message) {
            (
                state,
                Message::Auth {
                    username,
                    display_name,
                    ..
                },
            ) if state.awaiting_auth() => self.on_auth(&username, &display_name).await,
            (
                ProtocolState::Open,
                Message::Chat {
                    display_name,
                    content,
                },
            ) => self.on_chat(display_name, content).await,
            (
                ProtocolState::Open,
                Message::Join {
                    channel_id,
                    display_name,
                },
            ) => self.on_join(&channel_id, &display_name).await,
            (ProtocolState::Open, Message::Error { content, .. }) => {
                Err(Termination::PeerError(content))
            }
            (_, Message::Bye) => Err(Termination::PeerBye),
            (state, other) => Err(Termination::Violation(format!(
                "No action for {} in state {state}",
                other.kind()
            ))),
        }
    }

    async fn on_auth(&mut self, username: &str, display_name: &str) -> Result<(), Termination> {
        let id = self.id();
        let claimed = self
            .state
            .sessions
            .lock()
            .await
            .authenticate(id, username, display_name);

        match claimed {
            Ok(()) => {
                self.handle.promote().await.map_err(Termination::from)?;
                self.send(&Message::reply(true, "Welcome to the server")).await?;
                self.protocol = ProtocolState::Open;
                self.authenticated = true;
                self.display_name = display_name.to_string();

                let notice = Message::notice(format!("{display_name} has joined {}", self.channel));
                broadcast(&self.state.sessions, id, &self.channel, &notice, true).await;
                Ok(())
            }
            Err(SessionError::UsernameTaken(_)) => {
                tracing::info!(%id, username, "auth rejected, username in use");
                self.send(&Message::reply(false, "Invalid auth attempt")).await?;
                self.protocol = ProtocolState::Auth;
                Ok(())
            }
            Err(e) => Err(Termination::Internal(e.to_string())),
        }
    }

    async fn on_chat(&mut self, display_name: String, content: String) -> Result<(), Termination> {
        let id = self.id();
        self.state
            .sessions
            .lock()
            .await
            .set_display_name(id, &display_name)
            .map_err(|e| Termination::Internal(e.to_string()))?;
        self.display_name.clone_from(&display_name);

        let message = Message::Chat {
            display_name,
            content,
        };
        broadcast(&self.state.sessions, id, &self.channel, &message, false).await;
        Ok(())
    }

    async fn on_join(&mut self, channel: &str, display_name: &str) -> Result<(), Termination> {
        let id = self.id();
        let switched = self
            .state
            .sessions
            .lock()
            .await
            .switch_channel(id, channel, display_name);

        let previous = match switched {
            Ok(previous) => previous,
            Err(e) => {
                tracing::debug!(%id, channel, error = %e, "join rejected");
                self.send(&Message::reply(false, "Invalid join attempt")).await?;
                return Ok(());
            }
        };
        self.channel = channel.to_string();
        self.display_name = display_name.to_string();

        self.send(&Message::reply(true, "Welcome to the channel")).await?;
        let left = Message::notice(format!("{display_name} has left {previous}"));
        broadcast(&self.state.sessions, id, &previous, &left, false).await;
        let joined = Message::notice(format!("{display_name} has joined {channel}"));
        broadcast(&self.state.sessions, id, channel, &joined, true).await;
        Ok(())
    }

    /// Runs the `End` side effects: deregister, leave notice, final
    /// `ERR`/`BYE`, close.
    async fn finish(&mut self, termination: &Termination) {
        let id = self.id();
        self.protocol = ProtocolState::End;
        // Out of every channel before the final pair, so no broadcast lands
        // between them.
        self.state.sessions.lock().await.remove(id);

        if self.authenticated {
            let notice = Message::notice(format!("{} has left {}", self.display_name, self.channel));
            broadcast(&self.state.sessions, id, &self.channel, &notice, false).await;
        }

        match termination {
            Termination::Violation(reason) => {
                if self.deliver(&Message::server_error(reason)).await.is_ok() {
                    let _ = self.deliver(&Message::Bye).await;
                }
            }
            Termination::PeerError(_) => {
                let _ = self.deliver(&Message::Bye).await;
            }
            Termination::Internal(reason) => {
                tracing::error!(%id, %reason, "session failed");
                let _ = self.deliver(&Message::Bye).await;
            }
            Termination::PeerBye | Termination::Unreachable(_) => {}
        }

        self.handle.close();
        tracing::info!(%id, peer = %self.handle.peer(), %termination, "session ended");
    }
}
