use std::fmt;
use std::io;
use std::net::SocketAddr;

/// Errors returned by the blocking run call.
///
/// Only startup failures surface here. Per-connection I/O errors are handled
/// inside the loops as an implicit close and never reach the caller.
#[derive(Debug)]
pub enum ServeError {
    /// Creating a poller, a waker or registering a listener failed.
    Io(io::Error),
    /// Binding or listening on an address failed.
    Bind { addr: SocketAddr, source: io::Error },
    /// The address could not be parsed or did not resolve.
    InvalidAddress(String),
    /// The address carries a scheme other than `tcp`, `tcp4` or `tcp6`.
    UnsupportedScheme(String),
    /// No listening address was configured.
    NoAddress,
    /// A loop thread could not be spawned.
    Spawn(io::Error),
}

impl fmt::Display for ServeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServeError::Io(e) => write!(f, "I/O error: {e}"),
            ServeError::Bind { addr, source } => write!(f, "bind {addr}: {source}"),
            ServeError::InvalidAddress(addr) => write!(f, "invalid address: {addr}"),
            ServeError::UnsupportedScheme(addr) => write!(f, "unsupported address scheme: {addr}"),
            ServeError::NoAddress => write!(f, "no listening address configured"),
            ServeError::Spawn(e) => write!(f, "failed to spawn loop thread: {e}"),
        }
    }
}

impl std::error::Error for ServeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServeError::Io(e) | ServeError::Spawn(e) => Some(e),
            ServeError::Bind { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for ServeError {
    fn from(e: io::Error) -> Self {
        ServeError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, ServeError>;
