//! Error types for tundra-tun

use std::io;
use thiserror::Error;

/// Result type alias for TUN operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while provisioning or driving TUN devices
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A host networking command failed
    #[error("provisioning failed: {0}")]
    Provision(String),

    /// NAT or ip_forward setup failed
    #[error("NAT error: {0}")]
    Nat(String),
}
