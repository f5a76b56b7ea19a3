//! Dunebugger Protocol - Message types exchanged over the Web PubSub bus
//!
//! This crate provides the application envelope carried inside group
//! messages, the typed view of inbound subjects, the device commands the
//! dashboard issues, and the Web PubSub JSON subprotocol frames that carry
//! all of it.

pub mod command;
pub mod envelope;
pub mod message;
pub mod pubsub;

pub use command::DeviceCommand;
pub use envelope::{InboundEnvelope, OutboundRequest, BROADCAST_DESTINATION};
pub use message::{InboundMessage, Subject, HEARTBEAT_PROBE, HEARTBEAT_REPLY};
pub use pubsub::{AckError, ClientFrame, DataType, ProtocolError, ServiceFrame, SystemEvent, SUBPROTOCOL};
