//! Tunnel workers
//!
//! One worker serves one peer session: it provisions a tunnel under the
//! supervisor's setup lock, waits for a peer on the service port, spawns
//! its successor once the handshake completes, and then runs the
//! bidirectional forwarding loop until the session ends. Everything the
//! session holds, two pool addresses, the interface id, the TUN fd and
//! the DTLS association, is owned by one value whose drop glue returns
//! it, so no exit path can leak.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use openssl::ssl::{ErrorCode, SslStream};

use tundra_protocol::{classify, AddressPool, ClientParams, Frame, KEEPALIVE, PACKET_BUFSIZE};
use tundra_tun::{TunDevice, TunRegistry, TunnelId};

use crate::listener::PeerChannel;
use crate::supervisor::{Shared, ShutdownSignal};
use crate::timer::{FlowTimer, IdleVerdict, KEEPALIVE_BURST};
use crate::{Error, Result};

/// Sleep for an iteration that moved no data.
const IDLE_SLEEP: Duration = Duration::from_millis(100);

/// Times the parameter frame is pushed, against datagram loss.
const PARAMS_SEND_COUNT: usize = 3;

/// The allocations backing one tunnel: both pool addresses and the
/// interface id, with the interface itself already provisioned.
///
/// Dropping a lease destroys the interface and returns the id and both
/// addresses, which is what makes worker teardown exhaustive: the lease
/// is created before the peer exists and lives inside [`Tunnel`] for the
/// rest of the session.
#[derive(Debug)]
pub(crate) struct Lease {
    id: TunnelId,
    server_ip: Ipv4Addr,
    peer_ip: Ipv4Addr,
    pool: Arc<AddressPool>,
    registry: Arc<TunRegistry>,
}

impl Lease {
    /// Allocate two addresses and an id, then provision the interface.
    ///
    /// Partial failures release whatever was already taken: exhaustion
    /// on the second address returns the first, a provisioning failure
    /// returns both and frees the id.
    pub(crate) fn reserve(pool: &Arc<AddressPool>, registry: &Arc<TunRegistry>) -> Result<Self> {
        let server_ip = pool.acquire().ok_or(Error::Exhausted)?;
        let peer_ip = match pool.acquire() {
            Some(ip) => ip,
            None => {
                pool.release(server_ip);
                return Err(Error::Exhausted);
            }
        };

        let id = registry.next_id();
        if let Err(e) = registry.create(peer_ip, server_ip, id) {
            registry.close(id);
            pool.release(server_ip);
            pool.release(peer_ip);
            return Err(e.into());
        }

        Ok(Self {
            id,
            server_ip,
            peer_ip,
            pool: Arc::clone(pool),
            registry: Arc::clone(registry),
        })
    }

    pub(crate) fn id(&self) -> TunnelId {
        self.id
    }

    pub(crate) fn peer_ip(&self) -> Ipv4Addr {
        self.peer_ip
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.registry.close(self.id);
        self.pool.release(self.server_ip);
        self.pool.release(self.peer_ip);
    }
}

/// A provisioned tunnel still waiting for its peer.
struct Provisioned {
    lease: Lease,
    tun: TunDevice,
    params: ClientParams,
}

/// One live peer session. Field order is the teardown order: the DTLS
/// association goes first (shutdown alert plus the peer socket), then
/// the TUN fd, then the lease returns the interface and both addresses.
struct Tunnel {
    dtls: SslStream<PeerChannel>,
    tun: TunDevice,
    lease: Lease,
    timer: FlowTimer,
}

/// What one DTLS receive attempt produced.
enum Recv {
    Data(usize),
    Nothing,
    Closed,
}

impl Tunnel {
    /// Push the parameter frame a few times so one lost datagram does
    /// not strand the peer.
    fn push_params(&mut self, params: &ClientParams) -> Result<()> {
        let frame = params.encode()?;
        for _ in 0..PARAMS_SEND_COUNT {
            self.send(&frame)?;
        }
        Ok(())
    }

    /// Relay packets both ways until the session ends.
    ///
    /// Non-blocking throughout; an iteration that moved nothing sleeps
    /// and lets the timer decide between waiting, a keepalive burst and
    /// the send timeout. Ends on peer close, a disconnect frame, the
    /// timeout or shutdown.
    fn forward(&mut self, shutdown: &ShutdownSignal) -> Result<()> {
        let mut packet = vec![0u8; PACKET_BUFSIZE];
        let name = self.lease.id().ifname();

        loop {
            if shutdown.is_fired() {
                return Err(Error::Shutdown);
            }
            let mut idle = true;

            // outbound leg: kernel to peer
            if let Some(len) = self.tun.try_read(&mut packet)? {
                if len > 0 {
                    self.send(&packet[..len])?;
                    idle = false;
                    self.timer.mark_sent();
                }
            }

            // inbound leg: peer to kernel
            match self.recv(&mut packet)? {
                Recv::Closed => {
                    log::info!("[{}] peer closed the association", name);
                    break;
                }
                Recv::Data(len) => {
                    match classify(&packet[..len]) {
                        Frame::IpPacket(p) => {
                            // a full TUN queue drops the packet
                            if let Err(e) = self.tun.write(p) {
                                if e.kind() != std::io::ErrorKind::WouldBlock {
                                    return Err(e.into());
                                }
                            }
                        }
                        Frame::Disconnect => {
                            log::info!("[{}] peer requested disconnect", name);
                            break;
                        }
                        Frame::Keepalive | Frame::Control(_) => {}
                    }
                    idle = false;
                    self.timer.mark_received();
                }
                Recv::Nothing => {}
            }

            if idle {
                std::thread::sleep(IDLE_SLEEP);
                match self.timer.idle_tick() {
                    IdleVerdict::Wait => {}
                    IdleVerdict::SendKeepalive => {
                        log::debug!("[{}] silent peer, sending keepalives", name);
                        for _ in 0..KEEPALIVE_BURST {
                            self.send(&KEEPALIVE)?;
                        }
                    }
                    IdleVerdict::TimedOut => {
                        log::info!("[{}] sending without replies for too long", name);
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Send one record; a full socket buffer drops the packet.
    fn send(&mut self, payload: &[u8]) -> Result<()> {
        match self.dtls.ssl_write(payload) {
            Ok(_) => Ok(()),
            Err(e) if e.code() == ErrorCode::WANT_READ || e.code() == ErrorCode::WANT_WRITE => {
                Ok(())
            }
            Err(e) => Err(Error::Peer(e.to_string())),
        }
    }

    /// Try to receive one record.
    fn recv(&mut self, buf: &mut [u8]) -> Result<Recv> {
        match self.dtls.ssl_read(buf) {
            Ok(0) => Ok(Recv::Closed),
            Ok(len) => Ok(Recv::Data(len)),
            Err(e) if e.code() == ErrorCode::WANT_READ || e.code() == ErrorCode::WANT_WRITE => {
                Ok(Recv::Nothing)
            }
            Err(e) if e.code() == ErrorCode::ZERO_RETURN => Ok(Recv::Closed),
            Err(e) => Err(Error::Peer(e.to_string())),
        }
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        // close_notify is best effort on a non-blocking socket
        let _ = self.dtls.shutdown();
    }
}

/// Provision the next tunnel. Runs under the supervisor's setup lock so
/// that address and id allocation plus interface creation appear atomic
/// to all other workers.
fn provision(shared: &Shared) -> Result<Provisioned> {
    let _guard = shared.setup_lock.lock().unwrap();

    let lease = Lease::reserve(&shared.pool, &shared.registry)?;
    let tun = TunDevice::open(&lease.id().ifname())?;
    let params = shared.config.client_params(lease.peer_ip());
    Ok(Provisioned { lease, tun, params })
}

/// Body of one worker thread.
pub(crate) fn run_worker(shared: Arc<Shared>, first: bool) {
    match serve_one(&shared, first) {
        Ok(()) => {}
        Err(Error::Shutdown) => log::debug!("worker stopped for shutdown"),
        Err(Error::Exhausted) => {
            log::error!("no free addresses, tunnel will not be created");
        }
        Err(e) => log::error!("worker failed: {}", e),
    }
}

fn serve_one(shared: &Arc<Shared>, first: bool) -> Result<()> {
    let provisioned = provision(shared)?;
    let name = provisioned.lease.id().ifname();
    log::info!("[{}] waiting for a peer", name);

    let dtls = match shared
        .listener
        .accept_one(shared.config.port, &shared.shutdown)
    {
        Ok(stream) => stream,
        Err(Error::Shutdown) => return Err(Error::Shutdown),
        Err(e) => {
            if first {
                // the server cannot serve anyone; bring the process down
                shared.abort(Error::Peer(format!("cannot accept peers: {}", e)));
            }
            return Err(e);
        }
    };
    log::info!(
        "[{}] peer {} connected",
        name,
        dtls.get_ref().peer_addr()
    );

    // the accepted peer owns this worker now; the next listener slot
    // is the successor's
    shared.spawn_worker(false);

    let mut tunnel = Tunnel {
        dtls,
        tun: provisioned.tun,
        lease: provisioned.lease,
        timer: FlowTimer::new(),
    };
    tunnel.push_params(&provisioned.params)?;

    let result = tunnel.forward(&shared.shutdown);
    log::info!("[{}] session ended", name);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tundra_protocol::Cidr;

    fn pool(cidr: &str) -> Arc<AddressPool> {
        let cidr: Cidr = cidr.parse().unwrap();
        Arc::new(AddressPool::new(cidr, 4))
    }

    #[test]
    fn test_reserve_exhaustion_releases_partial() {
        // /30 has two host addresses; take one so only one is left
        let pool = pool("10.9.0.0/30");
        let registry = Arc::new(TunRegistry::new());
        let held = pool.acquire().unwrap();

        match Lease::reserve(&pool, &registry) {
            Err(Error::Exhausted) => {}
            other => panic!("expected exhaustion, got {:?}", other.map(|_| ())),
        }

        // the first acquired address was returned
        assert_eq!(pool.allocated_count(), 1);
        assert_eq!(registry.live_count(), 0);
        pool.release(held);
    }

    #[test]
    fn test_reserve_empty_pool() {
        let pool = pool("10.9.0.0/31");
        let registry = Arc::new(TunRegistry::new());
        assert!(matches!(
            Lease::reserve(&pool, &registry),
            Err(Error::Exhausted)
        ));
        assert_eq!(pool.allocated_count(), 0);
    }

    #[test]
    fn test_teardown_returns_everything() {
        // provisioning shells out and normally fails in a test
        // environment; either way nothing may stay allocated after the
        // lease is gone
        let pool = pool("10.9.1.0/29");
        let registry = Arc::new(TunRegistry::new());

        match Lease::reserve(&pool, &registry) {
            Ok(lease) => {
                assert_eq!(pool.allocated_count(), 2);
                assert_eq!(registry.live_count(), 1);
                drop(lease);
            }
            Err(_) => {}
        }

        assert_eq!(pool.allocated_count(), 0);
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_lease_drop_order_allows_reuse() {
        // a dropped lease's addresses and id go to the next tunnel
        let pool = pool("10.9.2.0/29");
        let registry = Arc::new(TunRegistry::new());

        let first = Lease {
            id: registry.next_id(),
            server_ip: pool.acquire().unwrap(),
            peer_ip: pool.acquire().unwrap(),
            pool: Arc::clone(&pool),
            registry: Arc::clone(&registry),
        };
        let second = Lease {
            id: registry.next_id(),
            server_ip: pool.acquire().unwrap(),
            peer_ip: pool.acquire().unwrap(),
            pool: Arc::clone(&pool),
            registry: Arc::clone(&registry),
        };
        assert_eq!(first.id(), TunnelId(0));
        assert_eq!(second.id(), TunnelId(1));

        let freed_server = first.server_ip;
        drop(first);

        // the freed pair and id 0 are the smallest again
        assert_eq!(pool.acquire(), Some(freed_server));
        assert_eq!(registry.next_id(), TunnelId(0));
        drop(second);
    }
}
