//! Tundra tunnel engine
//!
//! The per-tunnel data plane and its lifecycle: the DTLS accept path,
//! the forwarding workers with their adaptive keepalive/timeout, and the
//! supervisor that ties pool, registry and shutdown together.
//!
//! ```text
//! peer <=> UDP socket <=> DTLS <=> worker <=> TUN fd <=> kernel
//! ```
//!
//! One worker serves one peer; each worker spawns its successor after
//! completing a handshake, so exactly one socket is ever waiting for the
//! connect probe.

pub mod config;
pub mod error;
pub mod listener;
pub mod supervisor;
pub mod timer;

mod worker;

pub use config::ServerConfig;
pub use error::{Error, Result};
pub use listener::DtlsListener;
pub use supervisor::{ShutdownHandle, ShutdownSignal, Supervisor};
pub use timer::{FlowTimer, IdleVerdict};
