//! Session management for Parley.
//!
//! - **State** ([`ProtocolState`]): where each session is in the
//!   authentication / chat / shutdown progression.
//! - **Registry** ([`SessionRegistry`]): every live session with its
//!   identity and channel, the username uniqueness check, and channel
//!   switching.
//! - **Broadcast** ([`broadcast`]): channel-scoped fan-out over the
//!   sessions' links.
//!
//! ```text
//! Engine (above)  ← one per session, mutates its own registry entry
//!     ↕
//! Session Layer (this crate)  ← shared table of who is where
//!     ↕
//! Transport (below)  ← LinkHandle per session
//! ```

mod error;
mod registry;
mod session;

pub use error::SessionError;
pub use registry::{SessionRegistry, broadcast};
pub use session::{ProtocolState, Session};
