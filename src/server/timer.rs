//! One-shot handshake timers, backed by Linux `timerfd`.
//!
//! Raw `libc` calls rather than a higher-level wrapper, since `timerfd` isn't
//! covered by the pinned `nix` feature set and there's no other fd-based timer
//! primitive that integrates directly into the same readiness set as sockets.

use std::os::fd::{FromRawFd, OwnedFd, RawFd};

/// Create a non-blocking, close-on-exec timer descriptor that fires exactly
/// once, `seconds` from now.
pub fn create_oneshot(seconds: i64) -> nix::Result<OwnedFd> {
    // SAFETY: timerfd_create has no preconditions beyond valid flag bits.
    let fd = unsafe { libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK | libc::TFD_CLOEXEC) };
    if fd == -1 {
        return Err(nix::Error::last());
    }

    let spec = libc::itimerspec {
        it_interval: libc::timespec { tv_sec: 0, tv_nsec: 0 },
        it_value: libc::timespec { tv_sec: seconds, tv_nsec: 0 },
    };
    // SAFETY: `fd` was just created above and `spec` is a valid itimerspec.
    let ret = unsafe { libc::timerfd_settime(fd, 0, &spec, std::ptr::null_mut()) };
    if ret == -1 {
        let err = nix::Error::last();
        // SAFETY: fd is owned by this function until returned; close on the
        // error path before giving up on it.
        unsafe {
            libc::close(fd);
        }
        return Err(err);
    }

    // SAFETY: fd is a valid, owned descriptor returned by timerfd_create.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Consume a timer's expiration count. Returns `0` if the timer hasn't fired
/// yet (`EAGAIN`, since the fd is non-blocking) rather than an error.
pub fn drain_expirations(fd: RawFd) -> nix::Result<u64> {
    let mut raw = [0u8; 8];
    match nix::unistd::read(fd, &mut raw) {
        Ok(8) => Ok(u64::from_ne_bytes(raw)),
        Ok(_) => Ok(0),
        Err(nix::errno::Errno::EAGAIN) => Ok(0),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn timer_is_not_expired_immediately() {
        let timer = create_oneshot(1).expect("create timer");
        assert_eq!(drain_expirations(timer.as_raw_fd()).unwrap(), 0);
    }

    #[test]
    fn timer_fires_once_after_delay() {
        let timer = create_oneshot(0).expect("create zero-delay timer");
        sleep(Duration::from_millis(20));
        assert_eq!(drain_expirations(timer.as_raw_fd()).unwrap(), 1);
        assert_eq!(drain_expirations(timer.as_raw_fd()).unwrap(), 0);
    }
}
