use nodel_frame::FrameError;

use crate::name::{NodelPoint, SimpleName};

/// Errors returned by registries, channels and bindings.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] nodel_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The same action or event was registered twice.
    #[error("{0} is already registered")]
    DuplicateRegistration(NodelPoint),

    /// A unicast callback was set while another one was still installed.
    #[error("{0} callback is already set; clear it first")]
    SlotOccupied(&'static str),

    /// An event was emitted for a node that was never registered.
    #[error("node '{0}' has never been registered")]
    UnknownNode(SimpleName),

    /// Release or unregister of something that is not registered.
    #[error("{0} is not registered")]
    NotRegistered(NodelPoint),

    /// `start()` was called on a channel that already started.
    #[error("channel already started")]
    AlreadyStarted,

    /// The owning registry or channel has been shut down.
    #[error("shut down")]
    Shutdown,

    /// A background thread could not be spawned.
    #[error("failed to spawn thread: {0}")]
    Spawn(std::io::Error),
}

pub type Result<T> = std::result::Result<T, PeerError>;

/// Why a channel stopped working. Passed to the connection-fault callback.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The socket failed while reading or writing.
    #[error("connection I/O error: {0}")]
    Io(std::io::Error),

    /// The peer sent something that cannot be framed or decoded.
    #[error("corrupt stream: {0}")]
    Corrupt(FrameError),

    /// The peer closed the connection.
    #[error("peer closed the connection")]
    Closed,
}

impl From<FrameError> for ChannelError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(io) => ChannelError::Io(io),
            FrameError::ConnectionClosed => ChannelError::Closed,
            other => ChannelError::Corrupt(other),
        }
    }
}
