//! TUN device management for the tundra VPN concentrator
//!
//! Provisions one kernel TUN interface per tunnel via the host's
//! standard networking commands, hands out the matching `/dev/net/tun`
//! file descriptor, and owns the iptables MASQUERADE rule that NATs the
//! virtual network onto the physical uplink.
//!
//! Linux only: the concentrator depends on `/dev/net/tun`, `ip`,
//! `ifconfig` and `iptables`.

mod device;
mod error;
mod nat;
mod registry;

pub use device::TunDevice;
pub use error::{Error, Result};
pub use nat::NatGuard;
pub use registry::{TunRegistry, TunnelId, TUN_NAME_PREFIX};
