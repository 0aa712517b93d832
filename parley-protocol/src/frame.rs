//! Length-delimited frame format.
//!
//! Frame layout (4 bytes header + body):
//!
//! ```text
//! +-------------------+----------------------------+
//! | body length       | body                       |
//! | 4 ASCII digits,   | 0..=MAX_BODY_LENGTH bytes  |
//! | right-aligned     |                            |
//! +-------------------+----------------------------+
//! ```
//!
//! The header has a fixed width so it can always be read before the body
//! length is known: a reader takes exactly `HEADER_LENGTH` bytes, decodes the
//! length, then takes exactly that many body bytes.

use crate::checksum;
use crate::error::ProtocolError;
use crate::MAX_BODY_LENGTH;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the fixed frame header in bytes.
pub const HEADER_LENGTH: usize = 4;

/// A single frame body, guaranteed to be at most `MAX_BODY_LENGTH` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    body: Bytes,
}

impl Frame {
    /// Creates a frame from a raw body.
    pub fn new(body: impl Into<Bytes>) -> Result<Self, ProtocolError> {
        let body = body.into();
        if body.len() > MAX_BODY_LENGTH {
            return Err(ProtocolError::BodyTooLarge {
                size: body.len(),
                max: MAX_BODY_LENGTH,
            });
        }
        Ok(Self { body })
    }

    /// Creates a frame whose body is `payload` behind a fresh checksum preamble.
    pub fn sealed(payload: &str) -> Result<Self, ProtocolError> {
        Self::new(checksum::seal(payload))
    }

    /// Returns the frame body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consumes the frame, returning its body.
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Returns the body length.
    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Encodes the header for a body of `len` bytes.
    pub fn encode_header(len: usize) -> Result<[u8; HEADER_LENGTH], ProtocolError> {
        if len > MAX_BODY_LENGTH {
            return Err(ProtocolError::BodyTooLarge {
                size: len,
                max: MAX_BODY_LENGTH,
            });
        }
        Ok(header_for(len))
    }

    /// Decodes a header into the body length that follows it.
    pub fn decode_header(header: &[u8]) -> Result<usize, ProtocolError> {
        if header.len() != HEADER_LENGTH {
            return Err(ProtocolError::InvalidHeader(header.to_vec()));
        }

        let digits = header
            .iter()
            .skip_while(|&&b| b == b' ')
            .copied()
            .collect::<Vec<u8>>();
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return Err(ProtocolError::InvalidHeader(header.to_vec()));
        }

        let len = digits
            .iter()
            .fold(0usize, |acc, d| acc * 10 + usize::from(d - b'0'));
        if len > MAX_BODY_LENGTH {
            return Err(ProtocolError::BodyTooLarge {
                size: len,
                max: MAX_BODY_LENGTH,
            });
        }
        Ok(len)
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_LENGTH + self.body.len());
        buf.put_slice(&header_for(self.body.len()));
        buf.put_slice(&self.body);
        buf
    }

    /// Decodes a frame from bytes.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on framing errors.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < HEADER_LENGTH {
            return Ok(None);
        }

        let body_len = Self::decode_header(&buf[..HEADER_LENGTH])?;
        if buf.len() < HEADER_LENGTH + body_len {
            return Ok(None);
        }

        buf.advance(HEADER_LENGTH);
        let body = buf.split_to(body_len).freeze();
        Ok(Some(Self { body }))
    }
}

/// Right-aligns `len` in a space-padded header. `len` must not exceed
/// `MAX_BODY_LENGTH`.
fn header_for(len: usize) -> [u8; HEADER_LENGTH] {
    let mut header = [b' '; HEADER_LENGTH];
    let digits = len.to_string();
    header[HEADER_LENGTH - digits.len()..].copy_from_slice(digits.as_bytes());
    header
}
