use std::io::{ErrorKind, Write};

use nodel_transport::ChannelStream;

use crate::codec::{encode_message, normalize_line_endings, FrameConfig, LINE_ENDING};
use crate::error::{FrameError, Result};
use crate::message::ChannelMessage;
use crate::reader::transport_to_frame_error;

/// Writes complete messages to any `Write` stream.
///
/// Each message is written with `\r\n` line endings followed by a blank line.
pub struct MessageWriter<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: Write> MessageWriter<T> {
    /// Create a new message writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new message writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Encode and send a message (blocking).
    pub fn send(&mut self, message: &ChannelMessage) -> Result<()> {
        let text = encode_message(message)?;
        self.write_text(&text)
    }

    /// Send already-encoded JSON text, normalising its line endings.
    pub fn write_text(&mut self, text: &str) -> Result<()> {
        let mut wire = normalize_line_endings(text.trim_end());
        wire.push_str(LINE_ENDING);
        wire.push_str(LINE_ENDING);

        if wire.len() > self.config.max_message_size {
            return Err(FrameError::MessageTooLarge {
                size: wire.len(),
                max: self.config.max_message_size,
            });
        }

        let bytes = wire.as_bytes();
        let mut offset = 0usize;
        while offset < bytes.len() {
            match self.inner.write(&bytes[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl MessageWriter<ChannelStream> {
    /// Create a writer for a `ChannelStream` and apply write timeout from config.
    pub fn with_config_stream(inner: ChannelStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}
