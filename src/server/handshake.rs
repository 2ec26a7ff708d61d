//! The four fixed wire tokens and the validate/launch half of the dispatcher.

use std::os::fd::AsRawFd;
use std::sync::{Arc, Mutex};

use nix::errno::Errno;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::shell::pty::{allocate_pty, spawn_shell_pty};
use crate::util::{set_nonblocking, write_all_retrying};

use super::table::{ClientRecord, ClientState, ClientTable, TimerIndex};
use super::timerset::TimerRegistry;

pub const CHALLENGE: &[u8] = b"<rembash>\n";
pub const PROCEED: &[u8] = b"<ok>\n";
pub const ERROR_TOKEN: &[u8] = b"<error>\n";

/// The secret as it appears on the wire, with its trailing newline.
pub fn wire_secret(configured: &str) -> Vec<u8> {
    let mut bytes = configured.as_bytes().to_vec();
    bytes.push(b'\n');
    bytes
}

pub fn send_challenge(fd: i32) -> nix::Result<()> {
    write_all_retrying(fd, CHALLENGE)
}

fn send_proceed(fd: i32) -> nix::Result<()> {
    write_all_retrying(fd, PROCEED)
}

/// Best-effort: a peer that sent a bad secret may already have gone away, so a
/// failure here doesn't change the outcome (the client is terminated either way).
pub fn send_error_best_effort(fd: i32) {
    let _ = write_all_retrying(fd, ERROR_TOKEN);
}

/// Read the client's response to the challenge and compare against `secret`.
///
/// Returns `Ok(true)` on an exact match, `Ok(false)` on a mismatch, and `Err`
/// for read failures (including a clean peer close, reported as `PeerClosed`).
pub fn read_and_validate(fd: i32, secret: &[u8]) -> Result<bool, ClientError> {
    let mut buf = [0u8; 4095];
    match nix::unistd::read(fd, &mut buf) {
        Ok(0) => Err(ClientError::PeerClosed),
        Ok(n) => Ok(&buf[..n] == secret),
        Err(Errno::EWOULDBLOCK) => {
            // The dispatcher only calls this on a readable edge; a would-block
            // here means the edge was spurious. Treat as "not yet validated"
            // rather than terminating a client that may still send the secret.
            Ok(false)
        }
        Err(e) => Err(ClientError::Io(e.into())),
    }
}

/// Open a PTY, fork the configured shell onto its slave, and wire the master
/// into `record`. On success the record's state becomes `Established` and the
/// caller is responsible for registering the new PTY descriptor with the
/// multiplexer and linking it into the [`ClientTable`].
///
/// Also retires the handshake timer as part of the same transition: the
/// timer fd is deregistered from the timer set and its `TimerIndex` entry is
/// removed *before* the `OwnedFd` is dropped (which is what actually closes
/// the descriptor). Doing this here, in one place, guarantees no window
/// where the fd number is closed but still reachable through a stale
/// deregister/index-removal performed later by a caller on another thread,
/// which could otherwise race a concurrent `accept()` reusing that same
/// fd number.
///
/// Returns the new PTY master's raw fd so the caller can register it without
/// re-locking the record.
pub fn launch_shell(
    record: &Arc<Mutex<ClientRecord>>,
    table: &ClientTable,
    timer_index: &TimerIndex,
    timers: &TimerRegistry,
    shell_program: &str,
    login: bool,
) -> Result<i32, ClientError> {
    let pty = allocate_pty(24, 80).map_err(|e| ClientError::ShellSpawnFailed(e.to_string()))?;
    let pid = spawn_shell_pty(&pty, shell_program, login)
        .map_err(|e| ClientError::ShellSpawnFailed(e.to_string()))?;

    // The slave's last reference now belongs to the child; drop the parent's
    // copy so its fd closes without disturbing the one dup'd into the child.
    drop(pty.slave);

    set_nonblocking(pty.master.as_raw_fd())
        .map_err(|e| ClientError::ShellSpawnFailed(e.to_string()))?;
    let pty_fd = pty.master.as_raw_fd();

    {
        let mut guard = record.lock().expect("client record lock poisoned");
        guard.pty_master = Some(pty.master);
        guard.shell_pid = Some(pid);
        guard.state = ClientState::Established;
        if let Some(timer) = guard.timer.take() {
            let timer_fd = timer.as_raw_fd();
            timers.deregister(timer_fd);
            timer_index.take(timer_fd);
            debug!(timer_fd, "retiring handshake timer on validation");
            drop(timer);
        }
    }
    table.link_pty(pty_fd, record.clone());

    debug!(pty_fd, pid = pid.as_raw(), "shell launched");
    Ok(pty_fd)
}

/// Run the full `New` -> `Established` transition for one client: validate,
/// reply, launch. Returns the PTY fd to register on success.
pub fn validate_and_establish(
    socket_fd: i32,
    record: &Arc<Mutex<ClientRecord>>,
    table: &ClientTable,
    timer_index: &TimerIndex,
    timers: &TimerRegistry,
    secret: &[u8],
    shell_program: &str,
    login: bool,
) -> Result<i32, ClientError> {
    match read_and_validate(socket_fd, secret) {
        Ok(true) => {}
        Ok(false) => {
            send_error_best_effort(socket_fd);
            return Err(ClientError::SecretMismatch);
        }
        Err(e) => return Err(e),
    }

    record.lock().expect("client record lock poisoned").state = ClientState::Validated;

    let pty_fd = launch_shell(record, table, timer_index, timers, shell_program, login)?;

    if let Err(e) = send_proceed(socket_fd) {
        warn!(socket_fd, error = %e, "failed to send proceed token after shell launch");
        return Err(ClientError::Io(e.into()));
    }

    Ok(pty_fd)
}
