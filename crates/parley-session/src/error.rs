//! Error types for the session layer.

use parley_transport::ConnectionId;

/// Errors that can occur while mutating the session registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Another live session already authenticated with this username.
    /// Answered with a negative reply, not treated as a fault.
    #[error("username {0} is already in use")]
    UsernameTaken(String),

    /// No session is registered under this id. It either never existed
    /// or has already ended.
    #[error("session {0} not found")]
    NotFound(ConnectionId),

    /// The session has not authenticated yet.
    #[error("session {0} is not authenticated")]
    NotAuthenticated(ConnectionId),

    /// A session with this id is already registered.
    #[error("session {0} is already registered")]
    AlreadyRegistered(ConnectionId),
}
