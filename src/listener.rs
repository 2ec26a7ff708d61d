//! TCP listening socket setup.
//!
//! Out of scope for the connection-lifecycle core per the design: the core only
//! requires "a non-blocking listening descriptor". This module fulfills that
//! collaborator contract so the binary is runnable end to end.

use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use nix::sys::socket::{
    accept, bind, listen, setsockopt, socket, sockopt, AddressFamily, Backlog, SockFlag,
    SockType, SockaddrIn,
};

use crate::error::StartupError;
use crate::util::set_nonblocking;

/// A bound, listening, non-blocking IPv4 TCP socket.
pub struct Listener {
    fd: OwnedFd,
}

impl Listener {
    /// Bind and start listening on `addr` with the given backlog.
    ///
    /// Sets `SO_REUSEADDR` (so a restarted server doesn't fail to rebind a
    /// socket still in `TIME_WAIT`) and `O_NONBLOCK` before returning.
    pub fn bind(addr: SocketAddr, backlog: i32) -> Result<Self, StartupError> {
        let SocketAddr::V4(addr_v4) = addr else {
            return Err(StartupError::Bind(nix::Error::EAFNOSUPPORT));
        };

        let fd = socket(
            AddressFamily::Inet,
            SockType::Stream,
            SockFlag::empty(),
            None,
        )
        .map_err(StartupError::Bind)?;

        setsockopt(&fd, sockopt::ReuseAddr, &true).map_err(StartupError::Bind)?;

        let sockaddr = SockaddrIn::from(addr_v4);
        bind(fd.as_raw_fd(), &sockaddr).map_err(StartupError::Bind)?;

        let backlog = Backlog::new(backlog).unwrap_or(Backlog::new(10).expect("10 is valid"));
        listen(&fd, backlog).map_err(StartupError::Listen)?;

        set_nonblocking(fd.as_raw_fd()).map_err(StartupError::Listen)?;

        Ok(Listener { fd })
    }

    pub fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.fd.as_raw_fd()
    }

    /// Accept one pending connection.
    ///
    /// Returns `Ok(None)` on `EAGAIN`/`EWOULDBLOCK` (no pending connection),
    /// matching the "accept would-block" recoverable case from the design's
    /// error taxonomy.
    pub fn accept_one(&self) -> nix::Result<Option<OwnedFd>> {
        match accept(self.fd.as_raw_fd()) {
            Ok(raw) => {
                // SAFETY: `accept` returns a freshly opened, owned descriptor.
                let owned = unsafe { OwnedFd::from_raw_fd(raw) };
                Ok(Some(owned))
            }
            Err(nix::errno::Errno::EAGAIN) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
