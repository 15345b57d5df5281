//! Tundra wire protocol
//!
//! Frame discrimination, the client parameter control payload and the
//! virtual address pool shared by all tunnel workers.

mod cidr;
mod error;
mod frame;
mod params;
mod pool;

pub use cidr::Cidr;
pub use error::{Error, Result};
pub use frame::{classify, is_connect_probe, Frame};
pub use frame::{CLIENT_WANT_CONNECT, CLIENT_WANT_DISCONNECT, CONNECT_PROBE, CONTROL_PREFIX, KEEPALIVE};
pub use params::{ClientParams, PARAMS_FRAME_LEN, PARAMS_PAYLOAD_LEN};
pub use pool::AddressPool;

/// Default tunnel MTU
pub const DEFAULT_MTU: u16 = 1400;

/// Scratch buffer size for a single forwarded packet
pub const PACKET_BUFSIZE: usize = 32767;
