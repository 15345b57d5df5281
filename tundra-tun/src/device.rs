//! TUN file descriptor handling
//!
//! Opens `/dev/net/tun` in non-blocking mode and binds the descriptor to
//! a named interface with `IFF_TUN | IFF_NO_PI`, so reads and writes
//! exchange raw IP datagrams without a packet-information header. The
//! interface itself is provisioned beforehand by [`crate::TunRegistry`].

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};

use crate::{Error, Result};

/// An open, non-blocking TUN file descriptor bound to one interface.
///
/// Owns the descriptor; dropping the device closes it. Destroying the
/// kernel interface is the registry's job.
#[derive(Debug)]
pub struct TunDevice {
    file: File,
    name: String,
}

impl TunDevice {
    /// Open `/dev/net/tun` and attach it to the interface `name`.
    pub fn open(name: &str) -> Result<Self> {
        if name.len() >= libc::IFNAMSIZ {
            return Err(Error::Provision(format!(
                "interface name too long: {:?}",
                name
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open("/dev/net/tun")?;

        let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
        unsafe {
            std::ptr::copy_nonoverlapping(
                name.as_ptr(),
                ifr.ifr_name.as_mut_ptr() as *mut u8,
                name.len(),
            );
            ifr.ifr_ifru.ifru_flags = (libc::IFF_TUN | libc::IFF_NO_PI) as libc::c_short;
        }

        // SAFETY: the fd is valid and ifr is a properly initialized ifreq
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), libc::TUNSETIFF as _, &ifr) };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }

        Ok(Self {
            file,
            name: name.to_string(),
        })
    }

    /// Interface this descriptor is bound to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read one outgoing IP datagram if the kernel has one queued.
    ///
    /// Returns `Ok(None)` when nothing is pending.
    pub fn try_read(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match (&self.file).read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Hand one incoming IP datagram to the kernel.
    pub fn write(&self, packet: &[u8]) -> io::Result<usize> {
        (&self.file).write(packet)
    }
}

impl AsRawFd for TunDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}
