//! Tundra VPN concentrator CLI
//!
//! Runs the server and drives its shutdown from the terminal: type
//! `exitvpn` to close every tunnel, revert the host networking changes
//! and exit.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tundra_engine::{ServerConfig, ShutdownHandle, Supervisor};
use tundra_protocol::{Cidr, DEFAULT_MTU};

/// Tundra - a DTLS VPN concentrator
#[derive(Parser)]
#[command(name = "tundra")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// UDP port to listen on
    port: u16,

    /// Tunnel MTU pushed to peers
    #[arg(short = 'm', value_name = "MTU", default_value_t = DEFAULT_MTU)]
    mtu: u16,

    /// Virtual network address and mask
    #[arg(
        short = 'a',
        num_args = 2,
        value_names = ["NETIP", "MASK"],
        default_values = ["10.0.0.0", "8"]
    )]
    addr: Vec<String>,

    /// DNS server pushed to peers
    #[arg(short = 'd', value_name = "DNSIP", default_value = "8.8.8.8")]
    dns: Ipv4Addr,

    /// Route address and mask pushed to peers
    #[arg(
        short = 'r',
        num_args = 2,
        value_names = ["ROUTEIP", "ROUTEMASK"],
        default_values = ["0.0.0.0", "0"]
    )]
    route: Vec<String>,

    /// Physical interface the virtual network is masqueraded onto
    #[arg(short = 'i', value_name = "IFACE", default_value = "eth0")]
    iface: String,

    /// CA certificate (PEM)
    #[arg(long, value_name = "FILE", default_value = "ca-cert.pem")]
    ca_cert: PathBuf,

    /// Server certificate chain (PEM)
    #[arg(long, value_name = "FILE", default_value = "server-cert.pem")]
    cert: PathBuf,

    /// Server private key (PEM)
    #[arg(long, value_name = "FILE", default_value = "server-key.pem")]
    key: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn into_config(self) -> Result<ServerConfig> {
        let net_ip: Ipv4Addr = self.addr[0]
            .parse()
            .with_context(|| format!("invalid network address {:?}", self.addr[0]))?;
        let mask: u8 = self.addr[1]
            .parse()
            .with_context(|| format!("invalid network mask {:?}", self.addr[1]))?;
        let virt_net =
            Cidr::new(net_ip, mask).with_context(|| format!("invalid network {}/{}", net_ip, mask))?;

        let route: Ipv4Addr = self.route[0]
            .parse()
            .with_context(|| format!("invalid route address {:?}", self.route[0]))?;
        let route_prefix: u8 = self.route[1]
            .parse()
            .with_context(|| format!("invalid route mask {:?}", self.route[1]))?;

        Ok(ServerConfig {
            port: self.port,
            mtu: self.mtu,
            virt_net,
            dns: self.dns,
            route,
            route_prefix,
            phys_iface: self.iface,
            ca_cert: self.ca_cert,
            cert_chain: self.cert,
            private_key: self.key,
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = cli.into_config()?;
    let supervisor = Supervisor::new(config).context("cannot start the VPN concentrator")?;

    let shutdown = supervisor.shutdown_handle();
    std::thread::Builder::new()
        .name("console".into())
        .spawn(move || console_loop(shutdown))
        .context("cannot start the console thread")?;

    if let Err(e) = supervisor.run() {
        error!("server stopped: {}", e);
        return Err(e.into());
    }
    info!("server stopped");
    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Read the terminal until `exitvpn` is typed, then request shutdown.
///
/// A closed stdin (daemonized run) leaves the server running; shutdown
/// then comes from outside.
fn console_loop(shutdown: ShutdownHandle) {
    info!("type 'exitvpn' to close the VPN server");

    let mut input = String::new();
    loop {
        input.clear();
        match std::io::stdin().read_line(&mut input) {
            Ok(0) => {
                info!("console closed, keep serving");
                return;
            }
            Ok(_) => {
                if input.trim() == "exitvpn" {
                    info!("closing the VPN server");
                    shutdown.shutdown();
                    return;
                }
            }
            Err(e) => {
                error!("console read failed: {}", e);
                return;
            }
        }
    }
}
