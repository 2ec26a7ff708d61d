//! Error taxonomy, per the three kinds the design separates:
//! startup-fatal, per-client-recoverable (not an error type; handled inline as
//! would-block), and per-client-terminal.

use std::fmt;

/// Startup failures abort the process with a non-zero exit code.
#[derive(Debug)]
pub enum StartupError {
    Bind(nix::Error),
    Listen(nix::Error),
    EpollCreate(std::io::Error),
    ShellNotFound(String),
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupError::Bind(e) => write!(f, "failed to bind listening socket: {e}"),
            StartupError::Listen(e) => write!(f, "failed to listen on socket: {e}"),
            StartupError::EpollCreate(e) => write!(f, "failed to create epoll instance: {e}"),
            StartupError::ShellNotFound(path) => {
                write!(f, "configured shell '{path}' does not exist or is not executable")
            }
        }
    }
}

impl std::error::Error for StartupError {}

/// A per-client failure that always results in that one client being
/// terminated. Never propagates past the worker that observed it.
#[derive(Debug)]
pub enum ClientError {
    /// Peer closed (`read()` returned 0) or an HUP/ERR event was observed.
    PeerClosed,
    /// A hard I/O error other than would-block.
    Io(std::io::Error),
    /// The handshake response didn't match the configured secret.
    SecretMismatch,
    /// The 3-second handshake timer expired while still in `New`.
    HandshakeTimeout,
    /// The shell collaborator failed to allocate a PTY or spawn the shell.
    ShellSpawnFailed(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::PeerClosed => write!(f, "peer closed the connection"),
            ClientError::Io(e) => write!(f, "I/O error: {e}"),
            ClientError::SecretMismatch => write!(f, "handshake secret mismatch"),
            ClientError::HandshakeTimeout => write!(f, "handshake timed out"),
            ClientError::ShellSpawnFailed(msg) => write!(f, "failed to spawn shell: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(e)
    }
}
