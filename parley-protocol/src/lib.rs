//! # parley-protocol
//!
//! Wire protocol implementation for parley.
//!
//! This crate provides:
//! - Length-delimited framing with a fixed 4-byte ASCII header
//! - CRC32C integrity tokens carried in every body preamble
//! - One-pass parsing of command bodies into typed commands
//! - Reply formatting, including splitting long listings across frames

pub mod checksum;
pub mod codec;
pub mod command;
pub mod error;
pub mod frame;
pub mod reply;

pub use checksum::Sealed;
pub use codec::{Decoder, Encoder};
pub use command::{Command, Verb};
pub use error::{ErrorKind, ProtocolError};
pub use frame::{Frame, HEADER_LENGTH};
pub use reply::{Reply, ReplyChunk, UserEntry};

/// Maximum body length of a single frame, in bytes.
pub const MAX_BODY_LENGTH: usize = 512;

/// Bytes left for `VERB,args` once the preamble is accounted for.
pub const MAX_PAYLOAD_LENGTH: usize = MAX_BODY_LENGTH - checksum::PREAMBLE_LENGTH;

/// Length of a hyphenated participant UUID.
pub const UUID_LENGTH: usize = 36;

/// Maximum length of a nickname or room name.
pub const MAX_NAME_LENGTH: usize = 64;

/// Maximum length of chat text, chosen so that a `SENDTEXT,<uuid> <text>`
/// push and a `REQTEXT,<uuid> <text>;` reply both fit in one frame.
pub const MAX_TEXT_LENGTH: usize = MAX_PAYLOAD_LENGTH - "SENDTEXT,".len() - UUID_LENGTH - 2;

/// Default port for the parley server.
pub const DEFAULT_PORT: u16 = 7070;

/// Room every participant starts in.
pub const DEFAULT_ROOM: &str = "the lobby";
