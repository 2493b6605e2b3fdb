use bytes::{Buf, BytesMut};

use crate::error::{FrameError, Result};
use crate::message::ChannelMessage;

/// Default maximum accumulated message size: 10 MiB.
pub const DEFAULT_MAX_MESSAGE: usize = 10 * 1024 * 1024;

/// Line ending used on the wire.
pub const LINE_ENDING: &str = "\r\n";

/// Encode a message as wire text.
///
/// The JSON is pretty-printed and every line ends in `\r\n`. The trailing
/// blank line is added by the writer, not here.
pub fn encode_message(message: &ChannelMessage) -> Result<String> {
    let pretty = serde_json::to_string_pretty(message)?;
    Ok(normalize_line_endings(&pretty))
}

/// Decode one framed JSON block into a message.
pub fn decode_message(text: &str) -> Result<ChannelMessage> {
    serde_json::from_str(text).map_err(Into::into)
}

/// Rewrite bare `\n` as `\r\n`, leaving existing `\r\n` pairs alone.
pub fn normalize_line_endings(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 16);
    let mut prev = '\0';
    for c in text.chars() {
        if c == '\n' && prev != '\r' {
            out.push('\r');
        }
        out.push(c);
        prev = c;
    }
    out
}

/// Configuration for message framing.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum accumulated message size in bytes. Default: 10 MiB.
    pub max_message_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// Incremental brace-balance scanner shared by the blocking reader and the
/// async codec.
///
/// Scan state survives across calls, so a message split over many reads is
/// only examined once. Whitespace before a message is consumed from the
/// buffer; anything else before the opening brace is a corrupt stream.
#[derive(Debug, Default)]
pub(crate) struct BraceScanner {
    depth: usize,
    in_string: bool,
    escaped: bool,
    pos: usize,
}

impl BraceScanner {
    /// Try to split one complete top-level `{...}` block off the front of `buf`.
    pub(crate) fn scan(&mut self, buf: &mut BytesMut, max: usize) -> Result<Option<BytesMut>> {
        while self.pos < buf.len() {
            let byte = buf[self.pos];

            if self.depth == 0 {
                if byte == b'{' {
                    self.depth = 1;
                    self.pos = 1;
                } else if byte.is_ascii_whitespace() {
                    buf.advance(1);
                } else {
                    return Err(FrameError::CorruptStream { found: byte });
                }
                continue;
            }

            self.pos += 1;
            if self.pos > max {
                return Err(FrameError::MessageTooLarge {
                    size: self.pos,
                    max,
                });
            }

            if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = !self.in_string;
            } else if !self.in_string {
                if byte == b'{' {
                    self.depth += 1;
                } else if byte == b'}' {
                    self.depth -= 1;
                    if self.depth == 0 {
                        let block = buf.split_to(self.pos);
                        *self = Self::default();
                        return Ok(Some(block));
                    }
                }
            }
        }

        Ok(None)
    }

    /// True once an opening brace has been seen but not yet balanced.
    pub(crate) fn is_mid_message(&self) -> bool {
        self.depth > 0
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn scan_all(input: &str, max: usize) -> Result<Vec<String>> {
        let mut buf = BytesMut::from(input.as_bytes());
        let mut scanner = BraceScanner::default();
        let mut out = Vec::new();
        while let Some(block) = scanner.scan(&mut buf, max)? {
            out.push(String::from_utf8(block.to_vec()).unwrap());
        }
        Ok(out)
    }

    #[test]
    fn encode_uses_crlf() {
        let text = encode_message(&ChannelMessage::invoke("Lamp1", "TurnOn", None)).unwrap();
        assert!(text.contains("\r\n"));
        assert!(!text.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn decode_of_encode_keeps_awkward_strings() {
        let original = ChannelMessage::event(
            "Lamp{1}",
            "Say \"hi\"",
            Some(json!({ "text": "a } b { c \\ d \"e\"", "nested": { "x": [1, 2] } })),
        );
        let text = encode_message(&original).unwrap();
        let framed = scan_all(&text, DEFAULT_MAX_MESSAGE).unwrap();
        assert_eq!(framed.len(), 1);
        assert_eq!(decode_message(&framed[0]).unwrap(), original);
    }

    #[test]
    fn normalize_leaves_existing_crlf() {
        assert_eq!(normalize_line_endings("a\r\nb\nc"), "a\r\nb\r\nc");
    }

    #[test]
    fn scanner_skips_leading_whitespace() {
        let blocks = scan_all(" \r\n\t{\"node\":\"a\"}\r\n\r\n", 1024).unwrap();
        assert_eq!(blocks, vec![r#"{"node":"a"}"#.to_string()]);
    }

    #[test]
    fn scanner_rejects_garbage_before_brace() {
        let err = scan_all("  x{}", 1024).unwrap_err();
        assert!(matches!(err, FrameError::CorruptStream { found: b'x' }));
    }

    #[test]
    fn scanner_ignores_braces_in_strings() {
        let blocks = scan_all(r#"{"a":"}}}{"}{"b":1}"#, 1024).unwrap();
        assert_eq!(blocks, vec![r#"{"a":"}}}{"}"#.to_string(), r#"{"b":1}"#.to_string()]);
    }

    #[test]
    fn scanner_honours_escaped_quote() {
        let blocks = scan_all(r#"{"a":"x\"}"}"#, 1024).unwrap();
        assert_eq!(blocks, vec![r#"{"a":"x\"}"}"#.to_string()]);
    }

    #[test]
    fn scanner_enforces_max() {
        let err = scan_all(r#"{"a":"0123456789"}"#, 8).unwrap_err();
        assert!(matches!(err, FrameError::MessageTooLarge { max: 8, .. }));
    }

    #[test]
    fn scanner_resumes_across_chunks() {
        let mut scanner = BraceScanner::default();
        let mut buf = BytesMut::from(&b"{\"a\":{\"b\""[..]);
        assert!(scanner.scan(&mut buf, 1024).unwrap().is_none());
        assert!(scanner.is_mid_message());

        buf.extend_from_slice(b":1}}{");
        let block = scanner.scan(&mut buf, 1024).unwrap().unwrap();
        assert_eq!(block.as_ref(), b"{\"a\":{\"b\":1}}");
        assert!(scanner.scan(&mut buf, 1024).unwrap().is_none());
        assert!(scanner.is_mid_message());
    }
}
