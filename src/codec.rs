//! Percent-encoding and incremental line decoding for key listings.

use crate::error::DbError;
use crate::transport::ResponseBody;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::borrow::Cow;

/// Escape a key, prefix or form field for use in a URL.
///
/// Only the RFC 3986 unreserved characters are left as-is.
pub fn encode_component(s: &str) -> Cow<'_, str> {
    urlencoding::encode(s)
}

/// Decode one line of a listing body into a key.
///
/// Unlike a lenient URL decoder this rejects a `%` that is not followed by
/// two hex digits, and any result that is not UTF-8.
pub fn decode_key(line: &[u8]) -> Result<String, DbError> {
    let text = std::str::from_utf8(line)
        .map_err(|e| DbError::Decode(format!("listed key is not valid UTF-8: {e}")))?;

    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes
                .get(i + 1..i + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
            if !valid {
                return Err(DbError::Decode(format!(
                    "malformed percent-encoding at byte {i} in {text:?}"
                )));
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    urlencoding::decode(text)
        .map(Cow::into_owned)
        .map_err(|e| DbError::Decode(format!("decoded key {text:?} is not valid UTF-8: {e}")))
}

/// Decode an `application/x-www-form-urlencoded` component (`+` is a space).
pub(crate) fn decode_form_component(s: &str) -> Result<String, DbError> {
    urlencoding::decode(&s.replace('+', " "))
        .map(Cow::into_owned)
        .map_err(|e| DbError::Decode(e.to_string()))
}

/// Splits a chunked response body into lines, one per call.
///
/// Only as much of the body is pulled as is needed to complete the next
/// line. Lines end at `\n`; a trailing `\r` is stripped. A final line
/// without a terminator is still produced, but a terminator at the very end
/// of the body does not produce an extra empty line.
pub(crate) struct LineReader {
    body: ResponseBody,
    buf: BytesMut,
    // Bytes of `buf` already known to contain no newline.
    scanned: usize,
    eof: bool,
}

impl LineReader {
    pub(crate) fn new(body: ResponseBody) -> Self {
        Self {
            body,
            buf: BytesMut::new(),
            scanned: 0,
            eof: false,
        }
    }

    /// Read the next raw line, or `None` once the body is exhausted.
    pub(crate) async fn next_line(&mut self) -> Result<Option<Bytes>, DbError> {
        loop {
            if let Some(pos) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') {
                let end = self.scanned + pos;
                let mut line = self.buf.split_to(end + 1);
                line.truncate(end);
                self.scanned = 0;
                return Ok(Some(strip_cr(line)));
            }
            self.scanned = self.buf.len();

            if self.eof {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                self.scanned = 0;
                let line = self.buf.split();
                return Ok(Some(strip_cr(line)));
            }

            match self.body.next().await {
                Some(chunk) => self.buf.extend_from_slice(&chunk?),
                None => self.eof = true,
            }
        }
    }
}

fn strip_cr(mut line: BytesMut) -> Bytes {
    if line.last() == Some(&b'\r') {
        line.truncate(line.len() - 1);
    }
    line.freeze()
}
