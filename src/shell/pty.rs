//! PTY allocation and shell spawning.
//!
//! Uses the `nix` crate for POSIX PTY APIs. The PTY master fd is kept alive for
//! the client's whole connection lifetime so relay I/O can be performed on it.
//! There is no async runtime in this process, so spawning a shell means
//! forking directly and exec'ing in the child, not handing a pre_exec closure
//! to a process builder.

use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use nix::pty::{openpty, OpenptyResult, Winsize};
use nix::unistd::{ForkResult, Pid};

/// An allocated PTY pair (master + slave).
pub struct PtyPair {
    pub master: OwnedFd,
    pub slave: OwnedFd,
}

/// Allocate a PTY pair with the given terminal size.
pub fn allocate_pty(rows: u16, cols: u16) -> Result<PtyPair, nix::Error> {
    let winsize = Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let OpenptyResult { master, slave } = openpty(&winsize, None)?;
    Ok(PtyPair { master, slave })
}

/// Fork and exec `program` on the slave side of `pty`, returning the child's pid.
///
/// The child becomes its own session leader with the PTY slave as controlling
/// terminal, with stdin/stdout/stderr all dup'd from the slave fd. The parent
/// keeps the master fd open and never touches the slave again. Callers should
/// close their copy of `pty.slave` right after this returns, so the slave's
/// last reference lives in the child alone.
pub fn spawn_shell_pty(pty: &PtyPair, program: &str, login: bool) -> nix::Result<Pid> {
    let slave_fd = pty.slave.as_raw_fd();

    // SAFETY: the child calls only async-signal-safe functions before exec.
    match unsafe { nix::unistd::fork()? } {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => {
            exec_in_child(slave_fd, program, login);
            // exec_in_child only returns on failure; there is no sane recovery
            // path in a forked child, so bail out without running destructors
            // (drop of inherited fds/locks in a forked-but-not-exec'd child is
            // unsound).
            unsafe { libc::_exit(127) }
        }
    }
}

/// Runs in the forked child. Never returns on success, since `execv` replaces
/// the process image.
fn exec_in_child(slave_fd: RawFd, program: &str, login: bool) -> ! {
    unsafe {
        if libc::setsid() == -1 {
            libc::_exit(126);
        }
        if libc::ioctl(slave_fd, libc::TIOCSCTTY, 0) == -1 {
            libc::_exit(126);
        }
        libc::dup2(slave_fd, 0);
        libc::dup2(slave_fd, 1);
        libc::dup2(slave_fd, 2);
        if slave_fd > 2 {
            libc::close(slave_fd);
        }
    }

    let Ok(path) = CString::new(program) else {
        unsafe { libc::_exit(126) }
    };
    let argv0 = CString::new(if login { format!("-{program}") } else { program.to_string() })
        .unwrap_or_else(|_| path.clone());
    let args: [*const libc::c_char; 2] = [argv0.as_ptr(), std::ptr::null()];

    unsafe {
        libc::execv(path.as_ptr(), args.as_ptr());
        // Only reached if execv failed.
        libc::_exit(127)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::wait::{waitpid, WaitStatus};

    #[test]
    fn spawns_true_and_it_exits_cleanly() {
        let pty = allocate_pty(24, 80).expect("openpty");
        let pid = spawn_shell_pty(&pty, "/bin/true", false).expect("fork");
        match waitpid(pid, None).expect("waitpid") {
            WaitStatus::Exited(_, code) => assert_eq!(code, 0),
            other => panic!("unexpected wait status: {other:?}"),
        }
    }
}
