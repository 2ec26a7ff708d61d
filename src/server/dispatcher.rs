//! Given a ready descriptor, pick the action implied by its client's state,
//! run it, and rearm (or terminate).

use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::error::ClientError;
use crate::listener::Listener;
use crate::util::set_nonblocking;

use super::handshake::{self, validate_and_establish};
use super::multiplexer::Rearmer;
use super::relay::{self, RelayOutcome};
use super::table::{ClientRecord, ClientState, ClientTable, TimerIndex};
use super::timer;
use super::timerset::TimerRegistry;

/// Everything a dispatch needs that isn't the descriptor itself.
pub struct DispatchContext<'a> {
    pub table: &'a ClientTable,
    pub timer_index: &'a TimerIndex,
    pub timers: &'a TimerRegistry,
    pub mux: &'a Rearmer,
    pub secret: &'a [u8],
    pub shell_program: &'a str,
    pub login: bool,
    pub handshake_timeout_secs: i64,
}

/// Accept path (run on the multiplexer thread, never queued to a worker).
pub fn accept_one(listener: &Listener, ctx: &DispatchContext) {
    let accepted = match listener.accept_one() {
        Ok(Some(fd)) => fd,
        Ok(None) => return,
        Err(e) => {
            warn!(error = %e, "accept failed");
            return;
        }
    };

    let socket_fd = accepted.as_raw_fd();
    if let Err(e) = set_nonblocking(socket_fd) {
        warn!(socket_fd, error = %e, "failed to set accepted socket non-blocking");
        return;
    }

    let timer_fd_owner = match timer::create_oneshot(ctx.handshake_timeout_secs) {
        Ok(t) => t,
        Err(e) => {
            warn!(socket_fd, error = %e, "failed to create handshake timer");
            return;
        }
    };
    let timer_fd = timer_fd_owner.as_raw_fd();

    let record = ctx.table.insert_new(accepted, timer_fd_owner);
    ctx.timer_index.insert(timer_fd, socket_fd);

    if let Err(e) = ctx.mux.register_readable(socket_fd) {
        warn!(socket_fd, error = %e, "failed to register accepted socket");
        terminate(socket_fd, &record, ctx);
        return;
    }
    if let Err(e) = ctx.timers.register(timer_fd) {
        warn!(timer_fd, error = %e, "failed to register handshake timer");
    }

    if let Err(e) = handshake::send_challenge(socket_fd) {
        debug!(socket_fd, error = %e, "failed to write challenge, dropping client");
        terminate(socket_fd, &record, ctx);
        return;
    }

    debug!(socket_fd, timer_fd, "accepted client, challenge sent");
}

/// Timer-set path: one expired handshake timer, already taken off the timer
/// set by the caller's drain.
pub fn handle_timer_expiry(timer_fd: RawFd, ctx: &DispatchContext) {
    let _ = timer::drain_expirations(timer_fd);

    let Some(socket_fd) = ctx.timer_index.take(timer_fd) else {
        // Already removed by a concurrent validation finishing first; that
        // path owns the timer's cleanup now, nothing left to do here.
        return;
    };
    let Some(record) = ctx.table.get(socket_fd) else {
        return;
    };

    let still_new = record.lock().expect("client record lock poisoned").state == ClientState::New;
    if still_new {
        debug!(socket_fd, error = %ClientError::HandshakeTimeout, "terminating client");
        terminate(socket_fd, &record, ctx);
    }
}

/// Worker-pool path: everything that isn't the listener or a timer.
pub fn dispatch(fd: RawFd, ctx: &DispatchContext) {
    let Some(record) = ctx.table.get(fd) else {
        debug!(fd, "dispatch for a descriptor with no live record");
        return;
    };

    let state = record.lock().expect("client record lock poisoned").state;
    match state {
        ClientState::Terminated => {}
        ClientState::New => handle_new(fd, &record, ctx),
        // A relay edge firing while still mid-launch means the PTY fd was
        // armed before the handshake's socket-side rearm landed; nothing to
        // do until that settles.
        ClientState::Validated => {}
        ClientState::Established | ClientState::Unwritten => handle_relay(fd, &record, ctx),
    }
}

fn handle_new(socket_fd: RawFd, record: &Arc<Mutex<ClientRecord>>, ctx: &DispatchContext) {
    match validate_and_establish(
        socket_fd,
        record,
        ctx.table,
        ctx.timer_index,
        ctx.timers,
        ctx.secret,
        ctx.shell_program,
        ctx.login,
    ) {
        Ok(pty_fd) => {
            // The handshake timer, if any, was already deregistered and
            // dropped by validate_and_establish before this returns; nothing
            // timer-related is left to clean up here.
            if let Err(e) = ctx.mux.register_readable(pty_fd) {
                warn!(pty_fd, error = %e, "failed to register pty fd");
                terminate(socket_fd, record, ctx);
                return;
            }
            if let Err(e) = ctx.mux.rearm(socket_fd, false) {
                warn!(socket_fd, error = %e, "failed to rearm socket after handshake");
            }
        }
        Err(e) => {
            debug!(socket_fd, error = %e, "handshake failed");
            terminate(socket_fd, record, ctx);
        }
    }
}

fn handle_relay(fd: RawFd, record: &Arc<Mutex<ClientRecord>>, ctx: &DispatchContext) {
    let outcome = {
        let mut guard = record.lock().expect("client record lock poisoned");
        relay::step(fd, &mut guard)
    };

    match outcome {
        RelayOutcome::Progressed => {
            if let Err(e) = ctx.mux.rearm(fd, false) {
                warn!(fd, error = %e, "failed to rearm after relay progress");
            }
        }
        RelayOutcome::StillUnwritten => {
            if let Err(e) = ctx.mux.rearm(fd, true) {
                warn!(fd, error = %e, "failed to rearm writable after short write");
            }
        }
        RelayOutcome::Terminate(e) => {
            debug!(fd, error = %e, "terminating client");
            terminate(fd, record, ctx);
        }
    }
}

/// Idempotent teardown: a client already `Terminated` is left alone. Closing
/// the owned descriptors happens by `Drop`, once the table stops holding
/// this `Arc` and every in-flight worker reference to it goes out of scope.
pub fn terminate(fd: RawFd, record: &Arc<Mutex<ClientRecord>>, ctx: &DispatchContext) {
    let mut guard = record.lock().expect("client record lock poisoned");
    if guard.state == ClientState::Terminated {
        return;
    }
    let was_new = guard.state == ClientState::New;
    guard.state = ClientState::Terminated;

    let socket_fd = guard.socket_fd();
    ctx.mux.deregister(socket_fd);
    ctx.table.clear_slot(socket_fd);

    if was_new {
        if let Some(timer_fd) = guard.timer_fd() {
            ctx.timers.deregister(timer_fd);
            ctx.timer_index.take(timer_fd);
        }
    } else if let Some(pty_fd) = guard.pty_fd() {
        ctx.mux.deregister(pty_fd);
        ctx.table.clear_slot(pty_fd);
    }

    debug!(fd, socket_fd, "client terminated");
}
