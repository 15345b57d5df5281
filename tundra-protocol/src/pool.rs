//! Virtual address pool for tunnel endpoints
//!
//! Every tunnel consumes two host addresses from the configured network:
//! one for the server-side TUN endpoint and one pushed to the peer. From
//! `10.0.0.0/8` the first tunnel takes 10.0.0.1 (server) and 10.0.0.2
//! (peer), the second takes 10.0.0.3 and 10.0.0.4, and so on. The pool
//! itself hands out single addresses, smallest free first, so released
//! pairs are reused by the next tunnel.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use crate::Cidr;

/// Allocator for host addresses within one CIDR.
///
/// Never yields the network address, the broadcast address or anything
/// outside the CIDR. The allocation scan is serialized by an internal
/// mutex, so concurrent `acquire` calls always produce distinct
/// addresses.
#[derive(Debug)]
pub struct AddressPool {
    cidr: Cidr,
    allocated: Mutex<HashSet<u32>>,
}

impl AddressPool {
    /// Create a pool over `cidr`. `initial_capacity` sizes the internal
    /// allocation set and is a hint only.
    pub fn new(cidr: Cidr, initial_capacity: usize) -> Self {
        Self {
            cidr,
            allocated: Mutex::new(HashSet::with_capacity(initial_capacity)),
        }
    }

    /// The network this pool allocates from.
    pub fn cidr(&self) -> Cidr {
        self.cidr
    }

    /// Take the numerically smallest free host address, or `None` when
    /// the pool is exhausted. Never blocks beyond the internal lock.
    pub fn acquire(&self) -> Option<Ipv4Addr> {
        let mut allocated = self.allocated.lock().unwrap();
        let first = u32::from(self.cidr.network()) + 1;
        let last = u32::from(self.cidr.broadcast()).checked_sub(1)?;
        let ip = (first..=last).find(|addr| !allocated.contains(addr))?;
        allocated.insert(ip);
        Some(Ipv4Addr::from(ip))
    }

    /// Return `ip` to the free set.
    ///
    /// Releasing an address that is not currently allocated is a no-op,
    /// but it means the caller's bookkeeping is broken, so it is logged.
    pub fn release(&self, ip: Ipv4Addr) {
        let mut allocated = self.allocated.lock().unwrap();
        if !allocated.remove(&u32::from(ip)) {
            log::warn!("released address {} that was not allocated", ip);
        }
    }

    /// Number of currently allocated addresses.
    pub fn allocated_count(&self) -> usize {
        self.allocated.lock().unwrap().len()
    }
}
