//! Supervisor: owns the shared resources and the worker fleet
//!
//! The supervisor holds the address pool, the interface registry and the
//! DTLS context, spawns the first worker, and coordinates shutdown.
//! Workers chain themselves (each spawns its successor after accepting a
//! peer), so exactly one socket listens at any time; the supervisor only
//! keeps their join handles so shutdown can wait for them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tundra_protocol::AddressPool;
use tundra_tun::{NatGuard, TunRegistry};

use crate::listener::DtlsListener;
use crate::worker::run_worker;
use crate::{Error, Result, ServerConfig};

/// Sizing hint for the address pool's allocation set.
const POOL_CAPACITY_HINT: usize = 8;

/// Cancellation signal observed by every worker at its poll boundaries.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    fired: AtomicBool,
    lock: Mutex<()>,
    cv: Condvar,
}

impl ShutdownSignal {
    /// Fire the signal; idempotent.
    pub fn fire(&self) {
        let _guard = self.lock.lock().unwrap();
        self.fired.store(true, Ordering::SeqCst);
        self.cv.notify_all();
    }

    /// Cheap check used inside polling loops.
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Block until the signal fires.
    pub fn wait(&self) {
        let mut guard = self.lock.lock().unwrap();
        while !self.is_fired() {
            guard = self.cv.wait(guard).unwrap();
        }
    }
}

/// State shared by the supervisor and every worker.
pub(crate) struct Shared {
    pub(crate) config: ServerConfig,
    pub(crate) pool: Arc<AddressPool>,
    pub(crate) registry: Arc<TunRegistry>,
    pub(crate) listener: DtlsListener,
    /// Serializes the compound "two addresses + id + interface"
    /// allocation, which must appear atomic to other workers.
    pub(crate) setup_lock: Mutex<()>,
    pub(crate) shutdown: ShutdownSignal,
    workers: Mutex<Vec<JoinHandle<()>>>,
    fatal: Mutex<Option<Error>>,
}

impl Shared {
    /// Start one worker thread and remember its handle.
    pub(crate) fn spawn_worker(self: &Arc<Self>, first: bool) {
        let shared = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("tunnel-worker".into())
            .spawn(move || run_worker(shared, first));
        match spawned {
            Ok(handle) => self.workers.lock().unwrap().push(handle),
            Err(e) => {
                log::error!("cannot spawn worker thread: {}", e);
                if first {
                    self.abort(Error::Io(e));
                }
            }
        }
    }

    /// Record a fatal error and bring the whole process down.
    pub(crate) fn abort(&self, error: Error) {
        log::error!("fatal: {}", error);
        let mut fatal = self.fatal.lock().unwrap();
        if fatal.is_none() {
            *fatal = Some(error);
        }
        drop(fatal);
        self.shutdown.fire();
    }
}

/// Handle the console (or any other collaborator) uses to request
/// shutdown from outside the supervisor.
#[derive(Clone)]
pub struct ShutdownHandle {
    shared: Arc<Shared>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.shared.shutdown.fire();
    }
}

/// The concentrator's root object.
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Supervisor {
    /// Validate the configuration and build the shared state, including
    /// the DTLS context.
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let listener = DtlsListener::new(&config)?;
        let pool = Arc::new(AddressPool::new(config.virt_net, POOL_CAPACITY_HINT));
        let registry = Arc::new(TunRegistry::new());

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                pool,
                registry,
                listener,
                setup_lock: Mutex::new(()),
                shutdown: ShutdownSignal::default(),
                workers: Mutex::new(Vec::new()),
                fatal: Mutex::new(None),
            }),
        })
    }

    /// A handle that can end [`Supervisor::run`] from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Serve until shutdown is requested or the first worker fails.
    ///
    /// Cleans up stale interfaces from a crashed run, installs the NAT
    /// rule, spawns the first worker and blocks. On the way out every
    /// worker is joined, the interfaces are swept again and the NAT rule
    /// is removed.
    pub fn run(self) -> Result<()> {
        let config = &self.shared.config;
        self.shared.registry.cleanup_stale();

        let nat = NatGuard::install(&config.virt_net.to_string(), &config.phys_iface)?;

        log::info!(
            "serving {} on port {} via {}",
            config.virt_net,
            config.port,
            config.phys_iface
        );
        self.shared.spawn_worker(true);
        self.shared.shutdown.wait();

        log::info!("shutting down, waiting for workers");
        loop {
            // a worker that accepted a peer right before shutdown may
            // still push a successor handle while we join
            let workers: Vec<_> = self.shared.workers.lock().unwrap().drain(..).collect();
            if workers.is_empty() {
                break;
            }
            for handle in workers {
                let _ = handle.join();
            }
        }

        self.shared.registry.cleanup_stale();
        drop(nat);

        match self.shared.fatal.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
