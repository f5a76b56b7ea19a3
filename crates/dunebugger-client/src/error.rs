//! Error types for the session client.
//!
//! Transport failures stay inside the session and are only logged; the
//! errors here come from configuration, device selection and waiting on a
//! session.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;
use std::path::PathBuf;

use dunebugger_core::DomainError;
use thiserror::Error;

// ============================================================================
// Client Error Type
// ============================================================================

/// Session client errors.
///
/// Most operations on a running [`SessionClient`](crate::SessionClient) are
/// fire-and-forget and never fail; these errors come from loading
/// configuration, selecting a device, and the CLI helpers that wait for a
/// connection.
#[derive(Error, Debug)]
pub enum ClientError {
    /// A configuration value is missing or out of range.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The configuration file exists but could not be read.
    #[error("Failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid TOML for [`ClientConfig`](crate::ClientConfig).
    #[error("Failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Device selection or payload interpretation failed.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Gave up waiting for the session to reach a state.
    #[error("Timed out waiting for {0}")]
    Timeout(String),
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Convenience Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

// ============================================================================
// Tests
// ============================================================================
