//! Brace-balanced JSON message framing for Nodel channels.
//!
//! Every message on the wire is a single JSON object. There is no length
//! prefix: a message ends when the braces of the top-level object balance,
//! ignoring braces inside quoted strings and escaped characters. Outgoing
//! messages use `\r\n` line endings plus a trailing blank line so a Telnet
//! session can read and type them.
//!
//! No partial reads, no buffer management in user code.

#[cfg(feature = "async")]
pub mod async_codec;
pub mod codec;
pub mod error;
pub mod message;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub use async_codec::JsonMessageCodec;
pub use codec::{decode_message, encode_message, FrameConfig, DEFAULT_MAX_MESSAGE};
pub use error::{FrameError, Result};
pub use message::{Announcement, ChannelMessage, MessageKind};
pub use reader::MessageReader;
pub use writer::MessageWriter;
