//! # Parley
//!
//! A chat server that speaks one protocol over two transports: CRLF lines
//! over TCP, and a binary datagram layout with its own acknowledgment and
//! retransmission over UDP. Clients authenticate, then chat within named
//! channels; every session, whatever its transport, sees the same
//! channels.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use parley::prelude::*;
//!
//! # async fn start() -> Result<(), ParleyError> {
//! let server = ParleyServer::builder()
//!     .bind("127.0.0.1")
//!     .port(4567)
//!     .datagram(DatagramConfig::default())
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

pub mod config;
mod engine;
mod error;
mod server;

pub use config::{DEFAULT_PORT, DatagramConfig, ServerConfig};
pub use engine::Termination;
pub use error::ParleyError;
pub use server::{ParleyServer, ParleyServerBuilder};

pub mod prelude {
    pub use crate::{DatagramConfig, ParleyError, ParleyServer, ServerConfig};
    pub use parley_protocol::Message;
}
