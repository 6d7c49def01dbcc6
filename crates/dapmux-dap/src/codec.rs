//! DAP transport framing — Content-Length based message codec.
//!
//! The header section is ASCII; the body length counts bytes, not
//! characters. Payloads routinely contain non-ASCII (file paths, variable
//! values), so all slicing happens on bytes and UTF-8 decoding is left to
//! the JSON parser.

use crate::error::DapError;

const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

/// Encode a JSON value into a DAP wire-format message with Content-Length
/// header. The declared length is the UTF-8 byte length of the body.
pub fn encode_message(value: &serde_json::Value) -> Vec<u8> {
    let body = value.to_string();
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut buf = Vec::with_capacity(header.len() + body.len());
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(body.as_bytes());
    buf
}

/// Incremental decoder for a stream of DAP messages.
///
/// Bytes are fed in with [`FrameDecoder::extend`] in whatever chunks the
/// transport produces; [`FrameDecoder::try_parse`] yields the next complete
/// message or `None` when more data is needed.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from the transport.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered, not yet consumed bytes.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Try to parse the next complete message.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a full message.
    /// A header block without a usable `Content-Length` is discarded and
    /// parsing resynchronizes at the next block. A body that is not valid
    /// JSON is fatal: the stream is corrupted beyond recovery.
    pub fn try_parse(&mut self) -> Result<Option<serde_json::Value>, DapError> {
        loop {
            let sep_pos = match find_subslice(&self.buf, HEADER_SEPARATOR) {
                Some(pos) => pos,
                None => return Ok(None),
            };

            let body_start = sep_pos + HEADER_SEPARATOR.len();
            let content_length = parse_content_length(&self.buf[..sep_pos]);

            let length = match content_length {
                Some(len) => len,
                None => {
                    // Malformed header block: drop it and resync.
                    self.buf.drain(..body_start);
                    continue;
                }
            };

            if self.buf.len() < body_start + length {
                return Ok(None);
            }

            let body = &self.buf[body_start..body_start + length];
            let value = serde_json::from_slice(body).map_err(|e| {
                DapError::Codec(format!("message body is not valid JSON: {e}"))
            })?;
            self.buf.drain(..body_start + length);
            return Ok(Some(value));
        }
    }

    /// Drain every complete message currently buffered.
    pub fn parse_all(&mut self) -> Result<Vec<serde_json::Value>, DapError> {
        let mut messages = Vec::new();
        while let Some(msg) = self.try_parse()? {
            messages.push(msg);
        }
        Ok(messages)
    }
}

/// Extract `Content-Length` from a raw header section. Header names are
/// case-insensitive; all other headers are ignored.
fn parse_content_length(header: &[u8]) -> Option<usize> {
    let header = String::from_utf8_lossy(header);
    for line in header.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            return value.trim().parse::<usize>().ok();
        }
    }
    None
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
