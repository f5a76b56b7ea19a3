//! Dunebugger Core - Dashboard state for a remote Dunebugger device
//!
//! This crate provides the domain types shared between the session client
//! and whatever presents its state: the state slots fed by inbound
//! messages, the owned `DashboardState` they fold into, notification
//! levels, and analysis of sequence payloads.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod device;
pub mod error;
pub mod notification;
pub mod sequence;
pub mod state;

// Re-exports for convenience
pub use device::DeviceList;
pub use error::{DomainError, DomainResult};
pub use notification::NotificationLevel;
pub use sequence::{DmxEffect, SequenceAnalysis, SequenceEvent, SwitchLane};
pub use state::{DashboardState, LogEntry, ScheduleSnapshot, StateUpdate, DEFAULT_LOG_CAPACITY};
