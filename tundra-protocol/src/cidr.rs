//! IPv4 CIDR math for the virtual network

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;

use crate::{Error, Result};

/// An IPv4 network in `address/prefix` form.
///
/// The stored address is always the network address (host bits cleared),
/// so `Cidr::new(ip, prefix)` and parsing `"10.1.2.3/8"` both normalize
/// to `10.0.0.0/8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    net: Ipv4Net,
}

impl Cidr {
    /// Create a CIDR from an address and a prefix length.
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self> {
        let net = Ipv4Net::new(addr, prefix)
            .map_err(|_| Error::InvalidCidr(format!("{}/{}", addr, prefix)))?;
        Ok(Self { net: net.trunc() })
    }

    /// The network address.
    pub fn network(&self) -> Ipv4Addr {
        self.net.network()
    }

    /// The broadcast address.
    pub fn broadcast(&self) -> Ipv4Addr {
        self.net.broadcast()
    }

    /// The prefix length.
    pub fn prefix(&self) -> u8 {
        self.net.prefix_len()
    }

    /// Whether `ip` falls inside this network (network and broadcast included).
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.net.contains(&ip)
    }

    /// Iterate the host addresses, excluding network and broadcast.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let first = u32::from(self.network()) + 1;
        let last = u32::from(self.broadcast()).saturating_sub(1);
        (first..=last).map(Ipv4Addr::from)
    }

    /// Number of host addresses (excluding network and broadcast).
    pub fn host_count(&self) -> u32 {
        let span = u32::from(self.broadcast()) - u32::from(self.network());
        span.saturating_sub(1)
    }
}

impl FromStr for Cidr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let net: Ipv4Net = s
            .parse()
            .map_err(|_| Error::InvalidCidr(s.to_string()))?;
        Ok(Self { net: net.trunc() })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.net)
    }
}
