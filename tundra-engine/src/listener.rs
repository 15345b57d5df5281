//! DTLS accept path
//!
//! One cleartext probe datagram selects the peer before any DTLS state
//! exists: the listener binds a fresh UDP socket on the service port,
//! waits for the two-byte connect probe, `connect(2)`s the socket to the
//! probe's source and only then attaches a DTLS association. That keeps
//! exactly one peer per socket without SO_REUSEPORT, and a failed
//! handshake costs nothing but the socket.

use std::io::{self, Read, Write};
use std::net::{Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use openssl::ssl::{
    ErrorCode, Ssl, SslContext, SslContextBuilder, SslFiletype, SslMethod, SslStream, SslVersion,
};
use socket2::{Domain, Protocol, Socket, Type};

use tundra_protocol::is_connect_probe;

use crate::supervisor::ShutdownSignal;
use crate::{Error, Result, ServerConfig};

/// Sleep between bind attempts while the port is still in use.
const BIND_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Poll interval for the pre-handshake probe wait, so shutdown is
/// observed while no peer is connecting.
const PROBE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Handshake retry budget before the socket is recycled.
const HANDSHAKE_RETRIES: usize = 50;

/// Sleep between handshake retries.
const HANDSHAKE_RETRY_DELAY: Duration = Duration::from_millis(200);

/// A UDP socket `connect(2)`-ed to one peer, carrying DTLS records.
#[derive(Debug)]
pub struct PeerChannel {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl PeerChannel {
    fn new(socket: UdpSocket, peer: SocketAddr) -> Self {
        Self { socket, peer }
    }

    /// Address of the connected peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Read for PeerChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf)
    }
}

impl Write for PeerChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Server-side DTLS context plus the accept procedure.
///
/// The context (DTLS 1.2, CA certificate, server chain and key) is built
/// once and shared read-only by every worker.
pub struct DtlsListener {
    ctx: SslContext,
}

impl DtlsListener {
    /// Load certificates and build the shared DTLS 1.2 context.
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let mut builder = SslContextBuilder::new(SslMethod::dtls())?;
        builder.set_min_proto_version(Some(SslVersion::DTLS1_2))?;
        builder.set_max_proto_version(Some(SslVersion::DTLS1_2))?;
        builder.set_ca_file(&config.ca_cert)?;
        builder.set_certificate_chain_file(&config.cert_chain)?;
        builder.set_private_key_file(&config.private_key, SslFiletype::PEM)?;
        builder.check_private_key()?;
        Ok(Self {
            ctx: builder.build(),
        })
    }

    /// Accept one peer on `port`: bind, wait for the connect probe,
    /// connect the socket and complete the DTLS handshake.
    ///
    /// A handshake that does not finish within the retry budget recycles
    /// the socket and waits for the next probe, so one stuck peer never
    /// blocks the listener for good. Returns `Error::Shutdown` once
    /// cancellation is observed.
    pub fn accept_one(
        &self,
        port: u16,
        shutdown: &ShutdownSignal,
    ) -> Result<SslStream<PeerChannel>> {
        loop {
            if shutdown.is_fired() {
                return Err(Error::Shutdown);
            }

            let socket = bind_service_socket(port, shutdown)?;
            let peer = wait_for_probe(&socket, shutdown)?;
            socket.connect(peer)?;
            socket.set_nonblocking(true)?;
            log::debug!("probe from {}, starting DTLS handshake", peer);

            let ssl = Ssl::new(&self.ctx)?;
            let mut stream = SslStream::new(ssl, PeerChannel::new(socket, peer))?;
            match drive_handshake(&mut stream, shutdown) {
                Ok(()) => {
                    log::info!("DTLS session established with {}", peer);
                    return Ok(stream);
                }
                Err(Error::Shutdown) => return Err(Error::Shutdown),
                Err(e) => {
                    // free the association, restart with a fresh socket
                    log::warn!("handshake with {} failed: {}", peer, e);
                }
            }
        }
    }
}

/// Bind a dual-stack UDP socket on `[::]:port`, retrying while the
/// previous tunnel's socket still owns the port.
fn bind_service_socket(port: u16, shutdown: &ShutdownSignal) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_only_v6(false)?;

    let addr = SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), port);
    loop {
        match socket.bind(&addr.into()) {
            Ok(()) => break,
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                if shutdown.is_fired() {
                    return Err(Error::Shutdown);
                }
                std::thread::sleep(BIND_RETRY_DELAY);
            }
            Err(e) => return Err(e.into()),
        }
    }

    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(PROBE_POLL_INTERVAL))?;
    Ok(socket)
}

/// Receive datagrams until the exact two-byte connect probe arrives;
/// everything else is discarded.
fn wait_for_probe(socket: &UdpSocket, shutdown: &ShutdownSignal) -> Result<SocketAddr> {
    let mut buf = [0u8; 1024];
    loop {
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                if is_connect_probe(&buf[..len]) {
                    return Ok(from);
                }
                log::debug!("discarding {} stray bytes from {}", len, from);
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                if shutdown.is_fired() {
                    return Err(Error::Shutdown);
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Drive the non-blocking accept handshake within the retry budget.
fn drive_handshake(
    stream: &mut SslStream<PeerChannel>,
    shutdown: &ShutdownSignal,
) -> Result<()> {
    for _ in 0..HANDSHAKE_RETRIES {
        match stream.accept() {
            Ok(()) => return Ok(()),
            Err(e) if e.code() == ErrorCode::WANT_READ || e.code() == ErrorCode::WANT_WRITE => {
                if shutdown.is_fired() {
                    return Err(Error::Shutdown);
                }
                std::thread::sleep(HANDSHAKE_RETRY_DELAY);
            }
            Err(e) => return Err(Error::Handshake(e.to_string())),
        }
    }
    Err(Error::Handshake(format!(
        "no handshake after {} tries",
        HANDSHAKE_RETRIES
    )))
}
