//! Transport seam between the session and the message bus.
//!
//! A [`TransportFactory`] opens a connection for a bus URL and hands back a
//! [`TransportLink`]: the [`Transport`] used to send, plus the stream of
//! [`TransportEvent`]s the connection produces. The session never touches
//! sockets itself, which keeps it testable with [`memory`].

pub mod memory;
pub mod webpubsub;

use std::sync::Arc;

use async_trait::async_trait;
use dunebugger_protocol::{OutboundRequest, ProtocolError};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub use memory::{MemoryRecord, MemoryTransportFactory};
pub use webpubsub::{ReconnectPolicy, WebPubSubTransportFactory};

/// Errors raised by a transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// No live connection to send on.
    #[error("Transport is not connected")]
    NotConnected,

    /// The transport was stopped by its owner.
    #[error("Transport has been stopped")]
    Stopped,

    /// Opening the connection failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A frame could not be delivered.
    #[error("Send failed: {0}")]
    Send(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Lifecycle and data events delivered by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// First connection established; the bus assigned `connection_id`.
    Connected { connection_id: String },

    /// Connection re-established after a drop, possibly with a new id.
    Reconnected { connection_id: String },

    /// Connection lost. The transport keeps trying to reconnect until stopped.
    Disconnected { reason: Option<String> },

    /// Data published to the joined group.
    GroupMessage(Value),

    /// Non-fatal failure, e.g. a rejected frame or a failed connection attempt.
    Error(String),
}

/// Sending half of an open connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Subscribes the connection to `group`.
    async fn join_group(&self, group: &str) -> Result<(), TransportError>;

    /// Publishes `request` to every member of `group` except this connection.
    async fn send_to_group(
        &self,
        group: &str,
        request: &OutboundRequest,
    ) -> Result<(), TransportError>;

    /// Closes the connection and stops reconnecting. Idempotent.
    async fn stop(&self);
}

/// An opened transport and the events it produces.
pub struct TransportLink {
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens transports. Injected into the session so tests can substitute
/// an in-memory bus.
pub trait TransportFactory: Send + Sync {
    /// Starts connecting to `bus_url`.
    ///
    /// Returns once the connection attempt is under way; success is
    /// reported later as [`TransportEvent::Connected`]. Fails only when the
    /// URL cannot be used at all.
    fn connect(&self, bus_url: &str) -> Result<TransportLink, TransportError>;
}
