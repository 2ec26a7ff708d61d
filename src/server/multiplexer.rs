//! The primary readiness set.
//!
//! Wraps `mio::Poll`, which on Linux is already edge-triggered `epoll`. One-shot
//! semantics aren't exposed by mio directly, so they're emulated at the call
//! site: a descriptor is deregistered the instant its event is taken off the
//! batch, and stays deregistered until the dispatcher explicitly rearms it.
//! Nothing ever re-registers a descriptor implicitly.
//!
//! `Poll::poll` needs `&mut self`, so only the multiplexer thread ever touches
//! [`Multiplexer`] directly. Everything else, including the accept path and the
//! worker pool's dispatcher, gets a [`Rearmer`], a cheap clone of the same
//! underlying registration handle that only exposes register/rearm/deregister.

use std::os::fd::RawFd;

use mio::unix::SourceFd;
use mio::{Events, Interest, Registry, Token};

pub struct Multiplexer {
    poll: mio::Poll,
    rearmer: Rearmer,
}

/// A readiness notification, reduced to what the dispatcher needs.
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
    pub hup_or_error: bool,
}

impl Multiplexer {
    pub fn new() -> std::io::Result<Self> {
        let poll = mio::Poll::new()?;
        let registry = poll.registry().try_clone()?;
        Ok(Multiplexer {
            poll,
            rearmer: Rearmer { registry },
        })
    }

    /// A cheap, independently-owned handle for registering/rearming
    /// descriptors from any thread. Calling it "rearmer" rather than
    /// "registry" to keep its one job (arm, rearm, drop) front and center.
    pub fn rearmer(&self) -> Rearmer {
        self.rearmer.clone()
    }

    pub fn register_readable(&self, fd: RawFd) -> std::io::Result<()> {
        self.rearmer.register_readable(fd)
    }

    /// Block until at least one descriptor is ready, with no timeout. The
    /// only suspension point on this thread besides the worker queue wait.
    pub fn wait(&mut self, events: &mut Events) -> std::io::Result<()> {
        self.poll.poll(events, None)
    }

    /// Reduce an mio event to a `Readiness`, taking the descriptor off the
    /// ready set in the same step (the one-shot contract).
    pub fn take_readiness(&self, event: &mio::event::Event) -> Readiness {
        let fd = event.token().0 as RawFd;
        self.rearmer.deregister(fd);
        Readiness {
            fd,
            readable: event.is_readable(),
            writable: event.is_writable(),
            hup_or_error: event.is_error() || event.is_read_closed() || event.is_write_closed(),
        }
    }
}

/// A `Registry` clone: register, rearm, and deregister descriptors without
/// needing mutable access to the `Poll` that's waiting on them.
pub struct Rearmer {
    registry: Registry,
}

impl Clone for Rearmer {
    fn clone(&self) -> Self {
        Rearmer {
            registry: self.registry.try_clone().expect("registry clone"),
        }
    }
}

impl Rearmer {
    fn token(fd: RawFd) -> Token {
        Token(fd as usize)
    }

    pub fn register_readable(&self, fd: RawFd) -> std::io::Result<()> {
        self.registry.register(&mut SourceFd(&fd), Self::token(fd), Interest::READABLE)
    }

    pub fn register_writable(&self, fd: RawFd) -> std::io::Result<()> {
        self.registry.register(&mut SourceFd(&fd), Self::token(fd), Interest::WRITABLE)
    }

    /// Rearm a descriptor that was previously registered and then taken off
    /// the ready set. `writable = true` registers `WRITABLE` (the `Unwritten`
    /// case); otherwise `READABLE`. This is a fresh registration, since the
    /// descriptor was deregistered when its last event was consumed.
    pub fn rearm(&self, fd: RawFd, writable: bool) -> std::io::Result<()> {
        if writable {
            self.register_writable(fd)
        } else {
            self.register_readable(fd)
        }
    }

    /// Remove a descriptor from the ready set. Idempotent: deregistering an
    /// fd that was already taken off the set (one-shot consumed, not yet
    /// rearmed) is a silent no-op, matching termination's idempotence.
    pub fn deregister(&self, fd: RawFd) {
        let _ = self.registry.deregister(&mut SourceFd(&fd));
    }
}
