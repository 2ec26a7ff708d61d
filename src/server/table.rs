//! Client records and the descriptor-keyed table that owns them.
//!
//! Descriptor ownership lives here, not in the record's fields as raw
//! integers: each `ClientRecord` owns its socket (and, once established, its
//! PTY master) as an `OwnedFd`, so a client is torn down by dropping the
//! record's fds exactly once, never by a bare `close()` call scattered across
//! call sites.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::{Arc, Mutex};

use nix::unistd::Pid;

/// Where a client sits in the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Challenge written, handshake timer armed, waiting for the secret.
    New,
    /// Secret matched; shell launch is in progress.
    Validated,
    /// PTY open, shell running, bidirectional relay active.
    Established,
    /// Established, but a write to the peer partially succeeded and bytes are
    /// parked in `unwritten` waiting to be flushed.
    Unwritten,
    /// Teardown initiated. Absorbing: no further transitions out of this state.
    Terminated,
}

/// Fixed capacity of the carry-over buffer, matching the wire protocol's
/// per-`read()` chunk size.
pub const UNWRITTEN_CAPACITY: usize = 4096;

/// One record per session, indexed from both the socket descriptor and the
/// PTY master descriptor once the shell is open.
pub struct ClientRecord {
    pub socket: OwnedFd,
    pub pty_master: Option<OwnedFd>,
    pub state: ClientState,
    pub unwritten: [u8; UNWRITTEN_CAPACITY],
    pub nunwritten: usize,
    pub timer: Option<OwnedFd>,
    pub shell_pid: Option<Pid>,
}

impl ClientRecord {
    fn new(socket: OwnedFd, timer: OwnedFd) -> Self {
        ClientRecord {
            socket,
            pty_master: None,
            state: ClientState::New,
            unwritten: [0u8; UNWRITTEN_CAPACITY],
            nunwritten: 0,
            timer: Some(timer),
            shell_pid: None,
        }
    }

    pub fn socket_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub fn pty_fd(&self) -> Option<RawFd> {
        self.pty_master.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn timer_fd(&self) -> Option<RawFd> {
        self.timer.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// The descriptor on the other side of the relay from `from`.
    ///
    /// Panics if `from` is neither this record's socket nor PTY descriptor, or
    /// if the PTY side is asked for before the shell is established. Both
    /// indicate a dispatcher bug, not a runtime condition.
    pub fn peer_of(&self, from: RawFd) -> RawFd {
        let pty_fd = self.pty_fd().expect("peer_of called before shell established");
        if from == self.socket_fd() {
            pty_fd
        } else if from == pty_fd {
            self.socket_fd()
        } else {
            panic!("fd {from} is not part of this client record");
        }
    }
}

/// Maps a descriptor number to the client record it belongs to. `socket_fd`
/// and `pty_fd` (once assigned) both resolve to the same `Arc<Mutex<_>>`.
#[derive(Default)]
pub struct ClientTable {
    slots: Mutex<HashMap<RawFd, Arc<Mutex<ClientRecord>>>>,
}

impl ClientTable {
    pub fn new() -> Self {
        ClientTable::default()
    }

    /// Register a freshly accepted client, keyed only by its socket fd.
    pub fn insert_new(&self, socket: OwnedFd, timer: OwnedFd) -> Arc<Mutex<ClientRecord>> {
        let socket_fd = socket.as_raw_fd();
        let record = Arc::new(Mutex::new(ClientRecord::new(socket, timer)));
        self.slots
            .lock()
            .expect("client table lock poisoned")
            .insert(socket_fd, record.clone());
        record
    }

    /// Alias `pty_fd` to the same record as its socket, once the shell is
    /// launched. Caller must have already set `record.pty_master`.
    pub fn link_pty(&self, pty_fd: RawFd, record: Arc<Mutex<ClientRecord>>) {
        self.slots
            .lock()
            .expect("client table lock poisoned")
            .insert(pty_fd, record);
    }

    pub fn get(&self, fd: RawFd) -> Option<Arc<Mutex<ClientRecord>>> {
        self.slots
            .lock()
            .expect("client table lock poisoned")
            .get(&fd)
            .cloned()
    }

    /// Clear the slot for a single descriptor. Does not touch the sibling
    /// descriptor's slot; callers clear both explicitly during teardown.
    pub fn clear_slot(&self, fd: RawFd) {
        self.slots.lock().expect("client table lock poisoned").remove(&fd);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.lock().expect("client table lock poisoned").len()
    }
}

/// Maps a timer descriptor to the socket descriptor of the client it is
/// timing out, so a timer-expiry event can locate the owning record.
#[derive(Default)]
pub struct TimerIndex {
    owners: Mutex<HashMap<RawFd, RawFd>>,
}

impl TimerIndex {
    pub fn new() -> Self {
        TimerIndex::default()
    }

    pub fn insert(&self, timer_fd: RawFd, socket_fd: RawFd) {
        self.owners
            .lock()
            .expect("timer index lock poisoned")
            .insert(timer_fd, socket_fd);
    }

    pub fn take(&self, timer_fd: RawFd) -> Option<RawFd> {
        self.owners.lock().expect("timer index lock poisoned").remove(&timer_fd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fd_pair() -> (OwnedFd, OwnedFd) {
        nix::unistd::pipe().unwrap()
    }

    #[test]
    fn socket_and_pty_alias_the_same_record() {
        let table = ClientTable::new();
        let (socket, timer) = fd_pair();
        let (pty, _keep) = fd_pair();
        let pty_fd = pty.as_raw_fd();
        let socket_fd = socket.as_raw_fd();
        let record = table.insert_new(socket, timer);
        {
            let mut guard = record.lock().unwrap();
            guard.pty_master = Some(pty);
            guard.state = ClientState::Established;
        }
        table.link_pty(pty_fd, record.clone());

        let via_socket = table.get(socket_fd).unwrap();
        let via_pty = table.get(pty_fd).unwrap();
        assert!(Arc::ptr_eq(&via_socket, &via_pty));
    }

    #[test]
    fn clearing_one_slot_leaves_the_sibling_reachable() {
        let table = ClientTable::new();
        let (socket, timer) = fd_pair();
        let (pty, _keep) = fd_pair();
        let pty_fd = pty.as_raw_fd();
        let socket_fd = socket.as_raw_fd();
        let record = table.insert_new(socket, timer);
        record.lock().unwrap().pty_master = Some(pty);
        table.link_pty(pty_fd, record);
        table.clear_slot(socket_fd);
        assert!(table.get(socket_fd).is_none());
        assert!(table.get(pty_fd).is_some());
    }

    #[test]
    fn peer_of_swaps_socket_and_pty() {
        let (socket, timer) = fd_pair();
        let (pty, _keep) = fd_pair();
        let pty_fd = pty.as_raw_fd();
        let socket_fd = socket.as_raw_fd();
        let mut record = ClientRecord::new(socket, timer);
        record.pty_master = Some(pty);
        assert_eq!(record.peer_of(socket_fd), pty_fd);
        assert_eq!(record.peer_of(pty_fd), socket_fd);
    }
}
