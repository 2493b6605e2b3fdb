use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{
    decode_message, encode_message, BraceScanner, FrameConfig, DEFAULT_MAX_MESSAGE, LINE_ENDING,
};
use crate::error::{FrameError, Result};
use crate::message::ChannelMessage;

/// `tokio_util` codec speaking the same brace-balanced JSON framing as
/// [`crate::MessageReader`] and [`crate::MessageWriter`].
#[derive(Debug)]
pub struct JsonMessageCodec {
    scanner: BraceScanner,
    max_message_size: usize,
}

impl JsonMessageCodec {
    pub fn new() -> Self {
        Self::with_max_message_size(DEFAULT_MAX_MESSAGE)
    }

    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            scanner: BraceScanner::default(),
            max_message_size,
        }
    }

    pub fn from_config(config: &FrameConfig) -> Self {
        Self::with_max_message_size(config.max_message_size)
    }
}

impl Default for JsonMessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonMessageCodec {
    type Item = ChannelMessage;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ChannelMessage>> {
        match self.scanner.scan(src, self.max_message_size)? {
            Some(block) => {
                let text = String::from_utf8(block.to_vec())?;
                decode_message(&text).map(Some)
            }
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<ChannelMessage>> {
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if self.scanner.is_mid_message() => Err(FrameError::Truncated),
            None => Ok(None),
        }
    }
}

impl Encoder<ChannelMessage> for JsonMessageCodec {
    type Error = FrameError;

    fn encode(&mut self, item: ChannelMessage, dst: &mut BytesMut) -> Result<()> {
        let text = encode_message(&item)?;
        let size = text.len() + 2 * LINE_ENDING.len();
        if size > self.max_message_size {
            return Err(FrameError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        dst.reserve(size);
        dst.extend_from_slice(text.as_bytes());
        dst.extend_from_slice(LINE_ENDING.as_bytes());
        dst.extend_from_slice(LINE_ENDING.as_bytes());
        Ok(())
    }
}
