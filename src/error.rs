//! Error types for framelink
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using LinkError
pub type Result<T> = std::result::Result<T, LinkError>;

/// Unified error type for framelink operations
#[derive(Debug, Error)]
pub enum LinkError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Connection Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Could not resolve {host}:{port} to an IPv4 endpoint")]
    Resolve { host: String, port: u16 },

    #[error("Setup failed: {0}")]
    Setup(String),

    #[error("Connection is not connected")]
    NotConnected,

    // -------------------------------------------------------------------------
    // Message Body Errors
    // -------------------------------------------------------------------------
    #[error("Body underflow: need {needed} bytes, {available} available")]
    BodyUnderflow { needed: usize, available: usize },

    #[error("Body too large: {0} bytes")]
    BodyTooLarge(usize),

    // -------------------------------------------------------------------------
    // Wire Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),
}
