//! Integrity tokens carried at the front of every body.
//!
//! Body layout:
//!
//! ```text
//! <checksum> <timestamp> <payload>
//!  8 hex      13 digits   VERB[,arg]*
//! ```
//!
//! The checksum is the CRC32C of every byte after the checksum token and its
//! separating space, so the timestamp is covered as well as the payload.

use crate::error::ProtocolError;

/// Width of the checksum token (lowercase hex CRC32C).
pub const CHECKSUM_WIDTH: usize = 8;

/// Width of the timestamp token (zero-padded milliseconds since the epoch).
pub const TIMESTAMP_WIDTH: usize = 13;

/// Bytes taken by the preamble, separators included.
pub const PREAMBLE_LENGTH: usize = CHECKSUM_WIDTH + 1 + TIMESTAMP_WIDTH + 1;

/// Computes the checksum token for `data`.
pub fn compute(data: &[u8]) -> String {
    format!("{:08x}", crc32c::crc32c(data))
}

/// Returns whether `token` is the checksum of `data`.
pub fn verify(data: &[u8], token: &str) -> bool {
    compute(data).eq_ignore_ascii_case(token)
}

/// Builds a body carrying `payload`, stamped with the current time.
pub fn seal(payload: &str) -> String {
    seal_at(payload, chrono::Utc::now().timestamp_millis())
}

/// Builds a body carrying `payload`, stamped with `timestamp_ms`.
pub fn seal_at(payload: &str, timestamp_ms: i64) -> String {
    let covered = format!("{:0width$} {}", timestamp_ms, payload, width = TIMESTAMP_WIDTH);
    format!("{} {}", compute(covered.as_bytes()), covered)
}

/// A body that passed its integrity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sealed<'a> {
    /// The full body, preamble included.
    pub body: &'a str,
    /// Sender timestamp in milliseconds since the epoch.
    pub timestamp_ms: i64,
    /// Everything after the preamble.
    pub payload: &'a str,
}

/// Verifies a body and splits off its preamble.
pub fn open(body: &[u8]) -> Result<Sealed<'_>, ProtocolError> {
    let split = body
        .iter()
        .position(|&b| b == b' ')
        .ok_or(ProtocolError::MalformedPreamble)?;
    let (token, rest) = (&body[..split], &body[split + 1..]);

    let token = std::str::from_utf8(token).map_err(|_| ProtocolError::MalformedPreamble)?;
    if token.len() != CHECKSUM_WIDTH {
        return Err(ProtocolError::MalformedPreamble);
    }
    if !verify(rest, token) {
        return Err(ProtocolError::ChecksumMismatch {
            expected: token.to_string(),
            actual: compute(rest),
        });
    }

    let body = std::str::from_utf8(body).map_err(|_| ProtocolError::InvalidUtf8)?;
    let rest = &body[split + 1..];
    let (timestamp, payload) = rest
        .split_once(' ')
        .ok_or(ProtocolError::MalformedPreamble)?;
    let timestamp_ms = timestamp
        .parse()
        .map_err(|_| ProtocolError::MalformedPreamble)?;

    Ok(Sealed {
        body,
        timestamp_ms,
        payload,
    })
}
