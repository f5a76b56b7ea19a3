//! Dunebugger Client - Session client for a remote Dunebugger device
//!
//! This library keeps one logical connection to the Web PubSub bus per
//! device group, tracks device liveness through heartbeats, and routes
//! inbound messages into state updates.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ open/send/close ┌──────────────────┐  frames  ┌───────────┐
//! │    Owner     │────────────────▶│  SessionActor    │─────────▶│ Transport │
//! │ (CLI, UI...) │                 │  (SessionCore)   │◀─────────│ (bus)     │
//! └──────────────┘                 └────────┬─────────┘  events  └───────────┘
//!        ▲                                  │
//!        │         StateUpdate / notify     │
//!        └──────────────────────────────────┘
//! ```
//!
//! The actor processes owner commands, transport events and heartbeat ticks
//! one at a time, so no state is shared between tasks.

pub mod config;
pub mod error;
pub mod heartbeat;
pub mod session;
pub mod sink;
pub mod switcher;
pub mod transport;

// Re-export commonly used types
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use session::{SessionClient, SessionConfig, SessionState};
pub use sink::{ChannelSink, Notifier, StateSink, TracingNotifier};
pub use switcher::DeviceSwitcher;
pub use transport::{Transport, TransportError, TransportEvent, TransportFactory};
