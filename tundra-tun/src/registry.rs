//! Tunnel interface registry
//!
//! Tracks which `vpn_tun{id}` interfaces are live, hands out the
//! smallest free id, and provisions/destroys the kernel interfaces with
//! the host's standard networking commands. The reserved name prefix
//! doubles as crash recovery: anything called `vpn_tun*` left over from
//! a previous run is removed by [`TunRegistry::cleanup_stale`].

use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::process::Command;
use std::sync::Mutex;

use crate::{Error, Result};

/// Name prefix reserved for concentrator-owned interfaces.
pub const TUN_NAME_PREFIX: &str = "vpn_tun";

/// Identifier of one tunnel interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TunnelId(pub u32);

impl TunnelId {
    /// The kernel interface name for this id.
    pub fn ifname(&self) -> String {
        format!("{}{}", TUN_NAME_PREFIX, self.0)
    }
}

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ifname())
    }
}

/// Registry of live tunnel interfaces.
///
/// An id is reserved from the moment `next_id` returns it until
/// `close(id)` runs, so two workers can never hold the same id even if
/// provisioning has not happened yet.
#[derive(Debug, Default)]
pub struct TunRegistry {
    live: Mutex<BTreeSet<u32>>,
}

impl TunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve and return the smallest id that is not currently live.
    pub fn next_id(&self) -> TunnelId {
        let mut live = self.live.lock().unwrap();
        let id = (0..).find(|n| !live.contains(n)).unwrap();
        live.insert(id);
        TunnelId(id)
    }

    /// Provision `vpn_tun{id}` and assign its point-to-point addresses.
    ///
    /// A stale interface with the same name is deleted first, so a retry
    /// after a half-finished attempt converges.
    pub fn create(&self, peer_ip: Ipv4Addr, server_ip: Ipv4Addr, id: TunnelId) -> Result<()> {
        let name = id.ifname();
        let server = server_ip.to_string();
        let peer = peer_ip.to_string();

        // delete-before-add; failure only means there was nothing stale
        delete_iface(&name);

        run(Command::new("ip").args(["tuntap", "add", "dev", name.as_str(), "mode", "tun"]))?;

        if let Err(e) = run(Command::new("ifconfig").args([
            name.as_str(),
            server.as_str(),
            "dstaddr",
            peer.as_str(),
            "up",
        ])) {
            delete_iface(&name);
            return Err(e);
        }

        log::info!("created {} ({} peer {})", name, server_ip, peer_ip);
        Ok(())
    }

    /// Destroy the interface and free the id. Idempotent: closing an id
    /// that is not live, or whose interface is already gone, is a no-op.
    pub fn close(&self, id: TunnelId) {
        let name = id.ifname();
        let _ = Command::new("ifconfig")
            .args([name.as_str(), "down"])
            .output();
        delete_iface(&name);

        if self.live.lock().unwrap().remove(&id.0) {
            log::info!("closed {}", name);
        }
    }

    /// Remove every interface carrying the reserved prefix.
    ///
    /// Called once at startup (crash recovery) and once at shutdown.
    pub fn cleanup_stale(&self) {
        let entries = match std::fs::read_dir("/sys/class/net") {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("cannot scan /sys/class/net: {}", e);
                return;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(TUN_NAME_PREFIX) {
                log::info!("removing stale interface {}", name);
                delete_iface(&name);
            }
        }
        self.live.lock().unwrap().clear();
    }

    /// Number of currently live ids.
    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }
}

/// Best-effort interface removal; failing only means it was not there.
fn delete_iface(name: &str) {
    let _ = Command::new("ip")
        .args(["tuntap", "del", "dev", name, "mode", "tun"])
        .output();
}

fn run(cmd: &mut Command) -> Result<()> {
    let output = cmd
        .output()
        .map_err(|e| Error::Provision(format!("{:?}: {}", cmd.get_program(), e)))?;
    if !output.status.success() {
        return Err(Error::Provision(format!(
            "{:?} {:?} failed: {}",
            cmd.get_program(),
            cmd.get_args().collect::<Vec<_>>(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ifname() {
        assert_eq!(TunnelId(0).ifname(), "vpn_tun0");
        assert_eq!(TunnelId(17).to_string(), "vpn_tun17");
    }

    #[test]
    fn test_smallest_free_id() {
        let reg = TunRegistry::new();
        assert_eq!(reg.next_id(), TunnelId(0));
        assert_eq!(reg.next_id(), TunnelId(1));
        assert_eq!(reg.next_id(), TunnelId(2));

        reg.close(TunnelId(1));
        assert_eq!(reg.next_id(), TunnelId(1));
        assert_eq!(reg.next_id(), TunnelId(3));
    }

    #[test]
    fn test_live_ids_are_unique() {
        let reg = TunRegistry::new();
        let mut live: Vec<TunnelId> = Vec::new();

        for round in 0..5 {
            for _ in 0..4 {
                let id = reg.next_id();
                assert!(!live.contains(&id), "id {} handed out twice", id);
                live.push(id);
            }
            let mut i = 0;
            live.retain(|id| {
                i += 1;
                if i % 2 == round % 2 {
                    reg.close(*id);
                    false
                } else {
                    true
                }
            });
            assert_eq!(reg.live_count(), live.len());
        }
    }

    #[test]
    fn test_close_is_idempotent() {
        let reg = TunRegistry::new();
        let id = reg.next_id();
        reg.close(id);
        reg.close(id);
        assert_eq!(reg.live_count(), 0);
        assert_eq!(reg.next_id(), id);
    }
}
