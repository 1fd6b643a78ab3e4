//! Session core of a line-oriented IRC server.
//!
//! - [`session`]: per-connection identity, channel memberships, visibility,
//!   and the logged send/receive path.
//! - [`channel`] and [`transport`]: the capabilities a session depends on.
//! - [`server`]: a minimal acceptor and dispatcher wiring it all together.

pub mod channel;
pub mod config;
pub mod error;
pub mod logging;
pub mod server;
pub mod session;
pub mod transport;

pub use channel::{Channel, MemoryChannel};
pub use error::{TransportError, TransportResult};
pub use session::Session;
pub use transport::{NetTransport, Transport};
