//! Error types for the tunnel engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while serving tunnels
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error; fatal at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error
    #[error("protocol error: {0}")]
    Protocol(#[from] tundra_protocol::Error),

    /// TUN provisioning error; fatal to the affected worker
    #[error("TUN error: {0}")]
    Tun(#[from] tundra_tun::Error),

    /// OpenSSL library error
    #[error("TLS error: {0}")]
    Ssl(#[from] openssl::error::ErrorStack),

    /// DTLS handshake failed
    #[error("handshake error: {0}")]
    Handshake(String),

    /// Peer I/O failure after the association was established
    #[error("peer error: {0}")]
    Peer(String),

    /// The address pool has no free pair left
    #[error("address pool exhausted")]
    Exhausted,

    /// External cancellation
    #[error("shutdown requested")]
    Shutdown,
}
