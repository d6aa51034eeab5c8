//! Top-level error type for Parley.

use parley_transport::TransportError;

/// Errors that stop the server from starting or serving.
///
/// Protocol and session errors never reach this level: the engine turns
/// them into a [`Termination`](crate::Termination) for the one session
/// they concern.
#[derive(Debug, thiserror::Error)]
pub enum ParleyError {
    /// A transport-level error (bind, accept, delivery).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The listen host did not resolve to any IPv4 address.
    #[error("cannot resolve {host} to an IPv4 address")]
    Resolve {
        host: String,
        #[source]
        source: Option<std::io::Error>,
    },
}
