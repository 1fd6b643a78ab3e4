//! Message transport capability.
//!
//! A [`Transport`] moves whole protocol messages in both directions. The
//! session layer only ever talks to its connection through this trait, which
//! keeps it independent of sockets and lets tests substitute in-memory fakes.

pub mod net;

use async_trait::async_trait;
use irc::proto::Message;

use crate::error::TransportResult;

pub use net::NetTransport;

/// A duplex channel for discrete protocol messages.
///
/// Both methods take `&self`: one task may be blocked in [`receive`](Transport::receive)
/// while others call [`send`](Transport::send), so implementations manage their own
/// read and write halves independently.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transmit a single message.
    async fn send(&self, message: &Message) -> TransportResult<()>;

    /// Wait for the next inbound message.
    async fn receive(&self) -> TransportResult<Message>;
}
