//! Server configuration.

use std::net::{IpAddr, SocketAddr};

pub use parley_transport::DatagramConfig;

use crate::ParleyError;

/// Default port for both listeners.
pub const DEFAULT_PORT: u16 = 4567;

/// Where to listen and how patient to be with datagram peers.
///
/// Both the stream and the datagram listener bind `host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// IPv4 literal or hostname.
    pub host: String,
    pub port: u16,
    pub datagram: DatagramConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            datagram: DatagramConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Resolves `host:port` to the first IPv4 socket address.
    ///
    /// # Errors
    /// Returns [`ParleyError::Resolve`] if the lookup fails or yields no
    /// IPv4 address.
    pub async fn resolve(&self) -> Result<SocketAddr, ParleyError> {
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            if ip.is_ipv4() {
                return Ok(SocketAddr::new(ip, self.port));
            }
        }

        let resolve_error = |source| ParleyError::Resolve {
            host: self.host.clone(),
            source,
        };
        let mut addrs = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| resolve_error(Some(e)))?;
        addrs.find(SocketAddr::is_ipv4).ok_or_else(|| resolve_error(None))
    }
}
