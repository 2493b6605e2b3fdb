/// Errors that can occur while framing, encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Something other than whitespace appeared before the opening brace.
    #[error("corrupt stream: unexpected byte 0x{found:02x} before message start")]
    CorruptStream { found: u8 },

    /// The message grew past the configured maximum before it balanced.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing messages.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream accepted no more bytes while writing.
    #[error("connection closed")]
    ConnectionClosed,

    /// The stream ended in the middle of a message.
    #[error("stream ended inside a message")]
    Truncated,

    /// The framed text is not valid UTF-8.
    #[error("message is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// The framed text is not a valid channel message.
    #[error("invalid message JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl FrameError {
    /// True when the error means the byte stream can no longer be trusted.
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            FrameError::CorruptStream { .. }
                | FrameError::MessageTooLarge { .. }
                | FrameError::Truncated
                | FrameError::InvalidUtf8(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
