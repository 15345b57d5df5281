//! Server configuration

use std::net::Ipv4Addr;
use std::path::PathBuf;

use tundra_protocol::{Cidr, ClientParams};

use crate::{Error, Result};

/// Everything the concentrator needs to serve tunnels.
///
/// Populated from the command line by the binary; `validate` is the
/// single gate between argument parsing and serving.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// UDP service port.
    pub port: u16,
    /// Tunnel MTU pushed to every peer.
    pub mtu: u16,
    /// Virtual network tunnel endpoints are drawn from.
    pub virt_net: Cidr,
    /// DNS server pushed to every peer.
    pub dns: Ipv4Addr,
    /// Route pushed to every peer.
    pub route: Ipv4Addr,
    /// Prefix length of the pushed route.
    pub route_prefix: u8,
    /// Physical uplink interface the virtual network is masqueraded onto.
    pub phys_iface: String,
    /// CA certificate (PEM).
    pub ca_cert: PathBuf,
    /// Server certificate chain (PEM).
    pub cert_chain: PathBuf,
    /// Server private key (PEM).
    pub private_key: PathBuf,
}

impl ServerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::Config("port must be in 1..65535".into()));
        }
        if self.mtu < 576 {
            return Err(Error::Config(format!(
                "MTU {} is too small (minimum 576)",
                self.mtu
            )));
        }
        if self.virt_net.host_count() < 2 {
            return Err(Error::Config(format!(
                "virtual network {} has no room for a tunnel address pair",
                self.virt_net
            )));
        }
        if self.route_prefix > 32 {
            return Err(Error::Config(format!(
                "invalid route prefix {}",
                self.route_prefix
            )));
        }
        if self.phys_iface.is_empty() {
            return Err(Error::Config("physical interface name is empty".into()));
        }
        Ok(())
    }

    /// The parameter record pushed to a peer assigned `peer_ip`.
    pub fn client_params(&self, peer_ip: Ipv4Addr) -> ClientParams {
        ClientParams {
            mtu: self.mtu,
            peer_ip,
            dns: self.dns,
            route: self.route,
            route_prefix: self.route_prefix,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        ServerConfig {
            port: 8000,
            mtu: 1400,
            virt_net: "10.0.0.0/8".parse().unwrap(),
            dns: Ipv4Addr::new(8, 8, 8, 8),
            route: Ipv4Addr::new(0, 0, 0, 0),
            route_prefix: 0,
            phys_iface: "eth0".into(),
            ca_cert: "ca.pem".into(),
            cert_chain: "server.pem".into(),
            private_key: "server.key".into(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_rejects_port_zero() {
        let mut cfg = config();
        cfg.port = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_tiny_network() {
        let mut cfg = config();
        cfg.virt_net = "10.0.0.0/31".parse().unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_tiny_mtu() {
        let mut cfg = config();
        cfg.mtu = 100;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_client_params_reflect_config() {
        let cfg = config();
        let params = cfg.client_params(Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(params.mtu, 1400);
        assert_eq!(params.peer_ip, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(params.dns, cfg.dns);
        assert_eq!(params.route_prefix, 0);
    }
}
