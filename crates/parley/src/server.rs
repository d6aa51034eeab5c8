//! `ParleyServer` builder and accept loops.
//!
//! Ties the layers together: both transports accept sessions, and each
//! session gets an [`Engine`] on its own task sharing one registry.

use std::net::SocketAddr;
use std::sync::Arc;

use parley_session::SessionRegistry;
use parley_transport::{DatagramConfig, DatagramTransport, StreamTransport, Transport};
use tokio::sync::Mutex;

use crate::config::ServerConfig;
use crate::engine::Engine;
use crate::ParleyError;

/// Shared server state passed to each session task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks.
pub(crate) struct ServerState {
    pub(crate) sessions: Mutex<SessionRegistry>,
}

/// Builder for configuring and starting a Parley server.
///
/// # Example
///
/// ```rust,no_run
/// use parley::prelude::*;
///
/// # async fn start() -> Result<(), ParleyError> {
/// let server = ParleyServer::builder()
///     .bind("0.0.0.0")
///     .port(4567)
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ParleyServerBuilder {
    config: ServerConfig,
}

impl ParleyServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the host (IPv4 literal or hostname) to listen on.
    pub fn bind(mut self, host: &str) -> Self {
        self.config.host = host.to_string();
        self
    }

    /// Sets the port both listeners bind.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets the datagram confirmation timeout and retry budget.
    pub fn datagram(mut self, datagram: DatagramConfig) -> Self {
        self.config.datagram = datagram;
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolves the host and binds both listeners.
    ///
    /// # Errors
    /// [`ParleyError::Resolve`] if the host has no IPv4 address,
    /// [`ParleyError::Transport`] if either listener cannot bind.
    pub async fn build(self) -> Result<ParleyServer, ParleyError> {
        let addr = self.config.resolve().await?;
        let stream = StreamTransport::bind(addr).await?;
        // Port 0 lets the OS pick; give the datagram side the same number.
        let addr = SocketAddr::new(addr.ip(), stream.local_addr()?.port());
        let datagram = DatagramTransport::bind(addr, self.config.datagram).await?;

        let state = Arc::new(ServerState {
            sessions: Mutex::new(SessionRegistry::new()),
        });
        Ok(ParleyServer {
            stream,
            datagram,
            state,
        })
    }
}

/// A bound Parley server.
///
/// Call [`run()`](Self::run) to start accepting sessions.
pub struct ParleyServer {
    stream: StreamTransport,
    datagram: DatagramTransport,
    state: Arc<ServerState>,
}

impl ParleyServer {
    /// Creates a new builder.
    pub fn builder() -> ParleyServerBuilder {
        ParleyServerBuilder::new()
    }

    /// Returns the address the stream listener is bound to.
    pub fn stream_addr(&self) -> Result<SocketAddr, ParleyError> {
        Ok(self.stream.local_addr()?)
    }

    /// Returns the address the datagram listener is bound to.
    pub fn datagram_addr(&self) -> Result<SocketAddr, ParleyError> {
        Ok(self.datagram.local_addr()?)
    }

    /// Number of sessions currently registered, across both transports.
    pub async fn session_count(&self) -> usize {
        self.state.sessions.lock().await.len()
    }

    /// Runs both accept loops.
    ///
    /// Every accepted session is served on its own task. Runs until the
    /// process is terminated.
    pub async fn run(self) -> Result<(), ParleyError> {
        tracing::info!("parley server running");
        let Self {
            stream,
            datagram,
            state,
        } = self;
        tokio::join!(serve(stream, Arc::clone(&state)), serve(datagram, state));
        Ok(())
    }
}

async fn serve<T: Transport>(mut transport: T, state: Arc<ServerState>) {
    loop {
        match transport.accept().await {
            Ok(link) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let id = link.handle.id();
                    let termination = Engine::new(link, state).run().await;
                    tracing::debug!(%id, %termination, "session task finished");
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
            }
        }
    }
}
