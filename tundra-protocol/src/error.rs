//! Error types for the tundra protocol

use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during protocol operations
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid CIDR notation: {0}")]
    InvalidCidr(String),

    #[error("parameter payload error: {0}")]
    Params(String),
}
