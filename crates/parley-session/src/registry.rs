//! The session registry: every live session, in creation order.
//!
//! # Concurrency note
//!
//! `SessionRegistry` is a plain map with no locking of its own. The server
//! keeps it behind one `tokio::sync::Mutex`, so every read (uniqueness
//! check, broadcast membership) and every write (insert, authenticate,
//! channel switch, remove) is mutually exclusive. [`broadcast`] holds the
//! lock only long enough to snapshot the recipients.

use std::collections::BTreeMap;

use parley_protocol::Message;
use parley_transport::{ConnectionId, LinkHandle};
use tokio::sync::Mutex;

use crate::{Session, SessionError};

/// All live sessions, keyed (and therefore iterated) by connection id.
///
/// Connection ids are allocated in increasing order, so iteration order is
/// creation order.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<ConnectionId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Registers a new, unauthenticated session for `handle`.
    ///
    /// # Errors
    /// Returns [`SessionError::AlreadyRegistered`] if the id is taken.
    pub fn insert(&mut self, handle: LinkHandle) -> Result<(), SessionError> {
        let id = handle.id();
        if self.sessions.contains_key(&id) {
            return Err(SessionError::AlreadyRegistered(id));
        }
        tracing::debug!(%id, peer = %handle.peer(), kind = %handle.kind(), "session registered");
        self.sessions.insert(id, Session::new(handle));
        Ok(())
    }

    /// Claims `username` for session `id` and records its display name.
    ///
    /// The uniqueness check and the claim happen under the same borrow, so
    /// two sessions can never both succeed with the same name.
    ///
    /// # Errors
    /// [`SessionError::UsernameTaken`] if another session holds the name,
    /// [`SessionError::NotFound`] if `id` is not registered.
    pub fn authenticate(
        &mut self,
        id: ConnectionId,
        username: &str,
        display_name: &str,
    ) -> Result<(), SessionError> {
        let taken = self
            .sessions
            .values()
            .any(|s| s.id() != id && s.username.as_deref() == Some(username));
        if taken {
            return Err(SessionError::UsernameTaken(username.to_string()));
        }

        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(SessionError::NotFound(id))?;
        session.username = Some(username.to_string());
        session.display_name = display_name.to_string();

        tracing::info!(%id, username, "session authenticated");
        Ok(())
    }

    /// Moves session `id` to `channel` under `display_name`.
    ///
    /// Returns the channel it left.
    ///
    /// # Errors
    /// [`SessionError::NotAuthenticated`] if the session has no identity
    /// yet, [`SessionError::NotFound`] if `id` is not registered.
    pub fn switch_channel(
        &mut self,
        id: ConnectionId,
        channel: &str,
        display_name: &str,
    ) -> Result<String, SessionError> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(SessionError::NotFound(id))?;
        if !session.is_authenticated() {
            return Err(SessionError::NotAuthenticated(id));
        }

        session.display_name = display_name.to_string();
        let previous = std::mem::replace(&mut session.channel, channel.to_string());
        tracing::debug!(%id, from = %previous, to = channel, "channel switched");
        Ok(previous)
    }

    /// Records the display name a session is currently using.
    ///
    /// # Errors
    /// Returns [`SessionError::NotFound`] if `id` is not registered.
    pub fn set_display_name(
        &mut self,
        id: ConnectionId,
        display_name: &str,
    ) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(SessionError::NotFound(id))?;
        display_name.clone_into(&mut session.display_name);
        Ok(())
    }

    /// Removes session `id`, returning its final record.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Session> {
        let removed = self.sessions.remove(&id);
        if removed.is_some() {
            tracing::debug!(%id, remaining = self.sessions.len(), "session removed");
        }
        removed
    }

    /// Handles of every session in `channel`, in registry order.
    ///
    /// `from` is skipped unless `include_sender` is set.
    pub fn recipients(
        &self,
        channel: &str,
        from: ConnectionId,
        include_sender: bool,
    ) -> Vec<LinkHandle> {
        self.sessions
            .values()
            .filter(|s| s.channel == channel)
            .filter(|s| include_sender || s.id() != from)
            .map(|s| s.handle().clone())
            .collect()
    }
}

/// Delivers `message` to every session in `channel`, one at a time.
///
/// Each send waits for delivery before the next begins, so a slow peer
/// delays the ones after it. A failed delivery is logged and skipped; it
/// never aborts the broadcast. Returns how many deliveries succeeded.
pub async fn broadcast(
    registry: &Mutex<SessionRegistry>,
    from: ConnectionId,
    channel: &str,
    message: &Message,
    include_sender: bool,
) -> usize {
    let recipients = registry
        .lock()
        .await
        .recipients(channel, from, include_sender);

    let mut delivered = 0;
    for handle in recipients {
        match handle.send(message).await {
            Ok(()) => delivered += 1,
            Err(e) => {
                tracing::warn!(
                    %from,
                    to = %handle.id(),
                    channel,
                    error = %e,
                    "broadcast delivery failed"
                );
            }
        }
    }
    delivered
}
