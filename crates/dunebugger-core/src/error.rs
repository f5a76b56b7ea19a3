//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Payload did not have the expected shape
    #[error("Failed to parse {field}: {reason}")]
    ParseError { field: String, reason: String },

    /// Device name not present in the configured list
    #[error("Unknown device: {name}")]
    UnknownDevice { name: String },

    /// Device list contained no usable names
    #[error("No devices configured")]
    NoDevices,
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
