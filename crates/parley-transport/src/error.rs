use parley_protocol::ProtocolError;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer sent bytes that are not a valid message.
    #[error("malformed message: {0}")]
    Malformed(#[from] ProtocolError),

    /// The peer is gone: end of stream, reset, or retry budget exhausted.
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    /// Binding a listening or dedicated socket failed.
    #[error("bind failed: {0}")]
    Bind(#[source] std::io::Error),

    /// Accepting or receiving on a listener failed.
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// The link's driver has already shut down.
    #[error("link closed")]
    Closed,
}

impl TransportError {
    /// `true` if the peer should be treated as gone, not as misbehaving.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Closed)
    }
}
