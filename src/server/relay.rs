//! The data-transfer path: drain any carried-over bytes first, then pump a
//! fresh chunk, copying whatever a short write leaves behind into the
//! carry-over buffer for the next edge.

use std::os::fd::{BorrowedFd, RawFd};

use nix::errno::Errno;

use crate::error::ClientError;

use super::table::{ClientRecord, ClientState, UNWRITTEN_CAPACITY};

/// What the dispatcher should do after one relay step.
pub enum RelayOutcome {
    /// Made forward progress (or found nothing to read); rearm `from` readable.
    Progressed,
    /// A write came up short again; rearm `from` writable so the next edge
    /// retries the flush. (The buffer belongs to the record as a whole, not
    /// either fd individually, so which descriptor drives the retry is a
    /// matter of convention rather than correctness: this follows the
    /// "rearm the descriptor the edge arrived on" convention throughout.)
    StillUnwritten,
    Terminate(ClientError),
}

/// Perform one relay step for the edge that arrived on `from`.
pub fn step(from: RawFd, record: &mut ClientRecord) -> RelayOutcome {
    let to = record.peer_of(from);
    if record.state == ClientState::Unwritten {
        drain_carryover(record, to)
    } else {
        pump_new_data(record, from, to)
    }
}

fn write_some(to: RawFd, buf: &[u8]) -> nix::Result<usize> {
    // SAFETY: `to` is a live descriptor owned by the client table for the
    // duration of this call; the dispatcher holds the record lock throughout.
    let borrowed = unsafe { BorrowedFd::borrow_raw(to) };
    nix::unistd::write(borrowed, buf)
}

fn drain_carryover(record: &mut ClientRecord, to: RawFd) -> RelayOutcome {
    match write_some(to, &record.unwritten[..record.nunwritten]) {
        Ok(k) if k == record.nunwritten => {
            record.nunwritten = 0;
            record.state = ClientState::Established;
            RelayOutcome::Progressed
        }
        Ok(k) => {
            record.unwritten.copy_within(k..record.nunwritten, 0);
            record.nunwritten -= k;
            RelayOutcome::StillUnwritten
        }
        Err(Errno::EWOULDBLOCK) => RelayOutcome::StillUnwritten,
        Err(e) => RelayOutcome::Terminate(ClientError::Io(e.into())),
    }
}

fn pump_new_data(record: &mut ClientRecord, from: RawFd, to: RawFd) -> RelayOutcome {
    let mut buf = [0u8; UNWRITTEN_CAPACITY];
    let nread = match nix::unistd::read(from, &mut buf) {
        Ok(0) => return RelayOutcome::Terminate(ClientError::PeerClosed),
        Ok(n) => n,
        Err(Errno::EWOULDBLOCK) => return RelayOutcome::Progressed,
        Err(e) => return RelayOutcome::Terminate(ClientError::Io(e.into())),
    };

    match write_some(to, &buf[..nread]) {
        Ok(nwrite) if nwrite == nread => RelayOutcome::Progressed,
        Ok(nwrite) => {
            let tail = &buf[nwrite..nread];
            record.unwritten[..tail.len()].copy_from_slice(tail);
            record.nunwritten = tail.len();
            record.state = ClientState::Unwritten;
            RelayOutcome::StillUnwritten
        }
        Err(Errno::EWOULDBLOCK) => {
            record.unwritten[..nread].copy_from_slice(&buf[..nread]);
            record.nunwritten = nread;
            record.state = ClientState::Unwritten;
            RelayOutcome::StillUnwritten
        }
        Err(e) => RelayOutcome::Terminate(ClientError::Io(e.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
    use std::os::fd::{AsRawFd, OwnedFd};

    /// A record backed by two connected `AF_UNIX` socket pairs standing in for
    /// the client socket and the PTY master. Both support bidirectional
    /// read/write, unlike a plain pipe, so they exercise the relay the same
    /// way a real socket/PTY fd pair would.
    fn record_with_peers() -> (ClientRecord, OwnedFd, OwnedFd) {
        let (socket, socket_peer) =
            socketpair(AddressFamily::Unix, SockType::Stream, None, SockFlag::empty()).unwrap();
        let (pty_master, pty_peer) =
            socketpair(AddressFamily::Unix, SockType::Stream, None, SockFlag::empty()).unwrap();
        crate::util::set_nonblocking(socket.as_raw_fd()).unwrap();
        crate::util::set_nonblocking(pty_master.as_raw_fd()).unwrap();

        let record = ClientRecord {
            socket,
            pty_master: Some(pty_master),
            state: ClientState::Established,
            unwritten: [0u8; UNWRITTEN_CAPACITY],
            nunwritten: 0,
            timer: None,
            shell_pid: None,
        };
        (record, socket_peer, pty_peer)
    }

    #[test]
    fn full_write_relays_bytes_and_stays_established() {
        let (mut record, socket_peer, _pty_peer) = record_with_peers();
        let pty_fd = record.pty_fd().unwrap();
        nix::unistd::write(&socket_peer, b"echo hi\n").unwrap();

        match step(record.socket_fd(), &mut record) {
            RelayOutcome::Progressed => {}
            _ => panic!("expected a completed relay step"),
        }
        assert_eq!(record.state, ClientState::Established);

        let mut buf = [0u8; 64];
        let n = nix::unistd::read(pty_fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"echo hi\n");
    }

    #[test]
    fn peer_close_terminates_the_relay_step() {
        let (mut record, socket_peer, _pty_peer) = record_with_peers();
        drop(socket_peer);
        match step(record.socket_fd(), &mut record) {
            RelayOutcome::Terminate(ClientError::PeerClosed) => {}
            _ => panic!("expected a PeerClosed termination"),
        }
    }
}
