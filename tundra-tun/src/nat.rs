//! Host NAT plumbing
//!
//! The concentrator masquerades the whole virtual network onto one
//! physical uplink. [`NatGuard`] owns the two pieces of host state this
//! needs, IPv4 forwarding and the iptables POSTROUTING rule, and undoes
//! both when dropped so an orderly shutdown leaves the host untouched.

use std::process::Command;

use crate::{Error, Result};

const IP_FORWARD: &str = "/proc/sys/net/ipv4/ip_forward";

/// Owns ip_forward plus one MASQUERADE rule for `virt_net` out of
/// `phys_iface`.
#[derive(Debug)]
pub struct NatGuard {
    virt_net: String,
    phys_iface: String,
}

impl NatGuard {
    /// Enable forwarding and install the MASQUERADE rule.
    ///
    /// A leftover rule from a crashed run is deleted first, so repeated
    /// starts never stack duplicate rules.
    pub fn install(virt_net: &str, phys_iface: &str) -> Result<Self> {
        std::fs::write(IP_FORWARD, "1")
            .map_err(|e| Error::Nat(format!("cannot enable ip_forward: {}", e)))?;

        // best-effort removal of a stale rule from a prior run
        let _ = Command::new("iptables")
            .args(rule_args("-D", virt_net, phys_iface))
            .output();

        let output = Command::new("iptables")
            .args(rule_args("-A", virt_net, phys_iface))
            .output()
            .map_err(|e| Error::Nat(format!("cannot run iptables: {}", e)))?;
        if !output.status.success() {
            return Err(Error::Nat(format!(
                "iptables failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        log::info!("masquerading {} out of {}", virt_net, phys_iface);
        Ok(Self {
            virt_net: virt_net.to_string(),
            phys_iface: phys_iface.to_string(),
        })
    }
}

impl Drop for NatGuard {
    fn drop(&mut self) {
        let _ = Command::new("iptables")
            .args(rule_args("-D", &self.virt_net, &self.phys_iface))
            .output();
        if let Err(e) = std::fs::write(IP_FORWARD, "0") {
            log::warn!("cannot restore ip_forward: {}", e);
        }
        log::info!("removed masquerade rule for {}", self.virt_net);
    }
}

fn rule_args<'a>(verb: &'a str, virt_net: &'a str, phys_iface: &'a str) -> [&'a str; 10] {
    [
        "-t",
        "nat",
        verb,
        "POSTROUTING",
        "-s",
        virt_net,
        "-o",
        phys_iface,
        "-j",
        "MASQUERADE",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_args_shape() {
        let args = rule_args("-A", "10.0.0.0/8", "eth0");
        assert_eq!(args[2], "-A");
        assert_eq!(args[5], "10.0.0.0/8");
        assert_eq!(args[7], "eth0");
        assert_eq!(args[9], "MASQUERADE");
    }
}
