//! The secondary readiness set: every client's handshake timer lives here,
//! not in the main multiplexer. The whole set is registered as one descriptor
//! in the main multiplexer (a nested `epoll` instance, same as a regular fd);
//! when that descriptor is ready, the main loop drains this set for the
//! specific timers that actually expired.
//!
//! Grounded on `examples/original_source/Lab5/server.c`'s `t_epoll_fd` /
//! `epoll_listener()`: a second `epoll_create`d instance holding only timer
//! fds, registered into the main epoll as a single descriptor so a timer
//! storm never competes with socket readiness for multiplexer attention.

use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Registry, Token};

/// Owns the nested `Poll`. Only the multiplexer thread drains it; registering
/// and deregistering individual timer fds goes through the cloneable
/// [`TimerRegistry`] handle instead, so accept/worker code never needs `&mut`
/// access to this struct.
pub struct TimerSet {
    poll: mio::Poll,
    registry: TimerRegistry,
}

impl TimerSet {
    pub fn new() -> std::io::Result<Self> {
        let poll = mio::Poll::new()?;
        let registry = TimerRegistry {
            registry: poll.registry().try_clone()?,
        };
        Ok(TimerSet { poll, registry })
    }

    /// The single descriptor to register in the main multiplexer.
    pub fn as_raw_fd(&self) -> RawFd {
        self.poll.as_raw_fd()
    }

    pub fn registry(&self) -> TimerRegistry {
        self.registry.clone()
    }

    /// Drain every timer fd that's ready right now, without blocking (the
    /// main multiplexer already told us this set has something ready).
    /// Each returned fd has been deregistered as part of taking its event, so
    /// callers don't need to do it again; it stays out of this set until
    /// explicitly dropped (timers are one-shot, never rearmed).
    pub fn drain_ready(&mut self) -> Vec<RawFd> {
        let mut events = Events::with_capacity(32);
        if self.poll.poll(&mut events, Some(Duration::ZERO)).is_err() {
            return Vec::new();
        }
        let fds: Vec<RawFd> = events.iter().map(|e| e.token().0 as RawFd).collect();
        for &fd in &fds {
            self.registry.deregister(fd);
        }
        fds
    }
}

/// A `Registry` clone scoped to the timer set, usable from the accept path
/// and from worker threads without touching the nested `Poll` directly.
pub struct TimerRegistry {
    registry: Registry,
}

impl Clone for TimerRegistry {
    fn clone(&self) -> Self {
        TimerRegistry {
            registry: self.registry.try_clone().expect("registry clone"),
        }
    }
}

impl TimerRegistry {
    pub fn register(&self, timer_fd: RawFd) -> std::io::Result<()> {
        self.registry.register(&mut SourceFd(&timer_fd), Token(timer_fd as usize), Interest::READABLE)
    }

    /// Idempotent: deregistering an fd already taken off the set (or never
    /// registered) is a silent no-op.
    pub fn deregister(&self, timer_fd: RawFd) {
        let _ = self.registry.deregister(&mut SourceFd(&timer_fd));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;
    use std::thread::sleep;

    use super::super::timer::create_oneshot;

    #[test]
    fn drain_ready_is_empty_before_any_timer_fires() {
        let mut set = TimerSet::new().expect("create timer set");
        let timer = create_oneshot(5).expect("create timer");
        set.registry().register(timer.as_raw_fd()).expect("register timer");
        assert!(set.drain_ready().is_empty());
    }

    #[test]
    fn drain_ready_returns_an_expired_timer_fd() {
        let mut set = TimerSet::new().expect("create timer set");
        let timer = create_oneshot(0).expect("create zero-delay timer");
        let timer_fd = timer.as_raw_fd();
        set.registry().register(timer_fd).expect("register timer");

        sleep(Duration::from_millis(20));

        assert_eq!(set.drain_ready(), vec![timer_fd]);
        // Deregistered as part of draining; polling again finds nothing.
        assert!(set.drain_ready().is_empty());
    }

    #[test]
    fn deregister_before_expiry_means_it_never_drains() {
        let mut set = TimerSet::new().expect("create timer set");
        let timer = create_oneshot(0).expect("create zero-delay timer");
        let timer_fd = timer.as_raw_fd();
        let registry = set.registry();
        registry.register(timer_fd).expect("register timer");
        registry.deregister(timer_fd);

        sleep(Duration::from_millis(20));

        assert!(set.drain_ready().is_empty());
    }
}
