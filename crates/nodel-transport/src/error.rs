use std::net::SocketAddr;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind the listening socket.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to connect to the remote address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The address text could not be parsed as `host:port`.
    #[error("invalid node address '{0}'")]
    InvalidAddress(String),

    /// The address names the in-process sentinel and has no socket form.
    #[error("address is in-process and cannot be reached over TCP")]
    InProcess,

    /// The host name resolved to no socket address.
    #[error("no socket address for {0}")]
    Unresolvable(String),

    /// The listener has been shut down.
    #[error("transport shut down (was listening on {0})")]
    Shutdown(SocketAddr),
}

pub type Result<T> = std::result::Result<T, TransportError>;
