use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use nodel_transport::ChannelStream;

use crate::codec::{decode_message, BraceScanner, FrameConfig};
use crate::error::{FrameError, Result};
use crate::message::ChannelMessage;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete JSON messages from any `Read` stream.
///
/// Handles partial reads internally — callers always get complete messages.
/// One reader serves a whole long-lived stream: call [`MessageReader::read_message`]
/// once per message until it returns `Ok(None)` at end of stream.
pub struct MessageReader<T> {
    inner: T,
    buf: BytesMut,
    scanner: BraceScanner,
    config: FrameConfig,
}

impl<T: Read> MessageReader<T> {
    /// Create a new message reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new message reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            scanner: BraceScanner::default(),
            config,
        }
    }

    /// Read the next complete `{...}` block as text (blocking).
    ///
    /// Returns `Ok(None)` only at a clean end of stream. A stream that ends
    /// inside a message yields [`FrameError::Truncated`].
    pub fn read_message(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(block) = self
                .scanner
                .scan(&mut self.buf, self.config.max_message_size)?
            {
                return Ok(Some(String::from_utf8(block.to_vec())?));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                if self.scanner.is_mid_message() {
                    return Err(FrameError::Truncated);
                }
                return Ok(None);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Read and decode the next message (blocking).
    pub fn read_channel_message(&mut self) -> Result<Option<ChannelMessage>> {
        match self.read_message()? {
            Some(text) => decode_message(&text).map(Some),
            None => Ok(None),
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl MessageReader<ChannelStream> {
    /// Create a reader for a `ChannelStream` and apply read timeout from config.
    pub fn with_config_stream(inner: ChannelStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: nodel_transport::TransportError) -> FrameError {
    match err {
        nodel_transport::TransportError::Io(io)
        | nodel_transport::TransportError::Accept(io) => FrameError::Io(io),
        nodel_transport::TransportError::Bind { source, .. }
        | nodel_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
