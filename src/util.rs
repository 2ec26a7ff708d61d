//! Small helpers shared across modules.

use std::os::unix::io::RawFd;

/// Append `O_NONBLOCK` to an fd's flags without disturbing the others.
pub fn set_nonblocking(fd: RawFd) -> nix::Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Write a small, complete message to a blocking-capable fd, retrying on short
/// writes and `EINTR`.
///
/// Used only for the handshake's fixed-size tokens, which are tiny and sent
/// while the peer's receive buffer is empty (in practice this never blocks),
/// but a short write must still be tolerated rather than assumed away.
pub fn write_all_retrying(fd: RawFd, mut buf: &[u8]) -> nix::Result<()> {
    use nix::errno::Errno;
    use nix::unistd::write;
    use std::os::fd::BorrowedFd;
    // SAFETY: `fd` is a valid, open descriptor for the duration of this call;
    // callers never pass a descriptor they don't own past this point.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    while !buf.is_empty() {
        match write(borrowed, buf) {
            Ok(0) => return Err(Errno::EPIPE),
            Ok(n) => buf = &buf[n..],
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    #[test]
    fn write_all_retrying_delivers_full_buffer() {
        let (r, w) = nix::unistd::pipe().unwrap();
        write_all_retrying(w.as_raw_fd(), b"<rembash>\n").unwrap();
        drop(w);
        let mut out = [0u8; 32];
        let n = nix::unistd::read(r.as_raw_fd(), &mut out).unwrap();
        assert_eq!(&out[..n], b"<rembash>\n");
    }
}
