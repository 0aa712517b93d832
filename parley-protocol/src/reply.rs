//! Server replies.
//!
//! Every reply payload is `VERB,<payload>`, reusing the verb of the command
//! that triggered it. Listing replies carry `;`-terminated items and are
//! split across as many frames as needed; an item is never split. Every
//! frame of a split listing except the last ends with an empty item
//! (`...;;`), so a reader knows more frames follow. Readers that skip empty
//! items see the same listing either way.

use crate::command::{Verb, ITEM_DELIMITER};
use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::MAX_PAYLOAD_LENGTH;
use std::fmt;

/// A `REQUSERS` listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub uuid: String,
    pub nickname: Option<String>,
}

impl fmt::Display for UserEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.uuid, self.nickname.as_deref().unwrap_or(""))
    }
}

/// A received reply frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyChunk {
    pub reply: Reply,
    /// More frames of the same listing follow.
    pub continued: bool,
}

/// A reply or push sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Identity of the session (`REQUUID`).
    Uuid(String),
    /// The session moved to a room (`CHANGECHATROOM`).
    RoomChanged(String),
    /// Members of the requester's room (`REQUSERS`).
    Users(Vec<UserEntry>),
    /// All known rooms (`REQCHATROOMS`).
    ChatRooms(Vec<String>),
    /// Room log entries past the requester's cursor (`REQTEXT`).
    Text(Vec<String>),
    /// A message fanned out to the room (`SENDTEXT`).
    Broadcast(String),
}

impl Reply {
    /// Returns the verb the reply is dispatched on.
    pub fn verb(&self) -> Verb {
        match self {
            Reply::Uuid(_) => Verb::RequestUuid,
            Reply::RoomChanged(_) => Verb::ChangeChatRoom,
            Reply::Users(_) => Verb::RequestUsers,
            Reply::ChatRooms(_) => Verb::RequestChatRooms,
            Reply::Text(_) => Verb::RequestText,
            Reply::Broadcast(_) => Verb::SendText,
        }
    }

    /// Formats the reply as one or more payloads, each fitting a frame.
    ///
    /// Listing replies always produce at least one payload, so an empty
    /// listing is still answered. Items that cannot fit a frame on their own
    /// are skipped; command validation keeps every item within that limit.
    pub fn to_payloads(&self) -> Vec<String> {
        let verb = self.verb();
        match self {
            Reply::Uuid(value) | Reply::RoomChanged(value) | Reply::Broadcast(value) => {
                vec![format!("{},{}", verb, value)]
            }
            Reply::Users(users) => pack(verb, users.iter().map(|u| u.to_string())),
            Reply::ChatRooms(rooms) => pack(verb, rooms.iter().cloned()),
            Reply::Text(entries) => pack(verb, entries.iter().cloned()),
        }
    }

    /// Formats the reply as sealed frames.
    pub fn to_frames(&self) -> Result<Vec<Frame>, ProtocolError> {
        self.to_payloads()
            .iter()
            .map(|payload| Frame::sealed(payload))
            .collect()
    }

    /// Parses a reply payload and reports whether the listing continues.
    pub fn chunk_from_payload(payload: &str) -> Result<ReplyChunk, ProtocolError> {
        let reply = Self::from_payload(payload)?;
        let continued = reply.is_listing() && payload.ends_with(CONTINUED_SUFFIX);
        Ok(ReplyChunk { reply, continued })
    }

    /// Returns whether the reply is a listing that may span frames.
    pub fn is_listing(&self) -> bool {
        matches!(self, Reply::Users(_) | Reply::ChatRooms(_) | Reply::Text(_))
    }

    /// Parses a reply payload (preamble already removed).
    pub fn from_payload(payload: &str) -> Result<Self, ProtocolError> {
        let (verb, rest) = payload.split_once(',').unwrap_or((payload, ""));
        let verb: Verb = verb.parse()?;

        let reply = match verb {
            Verb::RequestUuid => Reply::Uuid(rest.to_string()),
            Verb::ChangeChatRoom => Reply::RoomChanged(rest.to_string()),
            Verb::SendText => Reply::Broadcast(rest.to_string()),
            Verb::RequestText => Reply::Text(items(rest).map(str::to_string).collect()),
            Verb::RequestChatRooms => {
                Reply::ChatRooms(items(rest).map(str::to_string).collect())
            }
            Verb::RequestUsers => Reply::Users(
                items(rest)
                    .map(|item| {
                        let (uuid, nickname) = item.split_once(',').unwrap_or((item, ""));
                        UserEntry {
                            uuid: uuid.to_string(),
                            nickname: (!nickname.is_empty()).then(|| nickname.to_string()),
                        }
                    })
                    .collect(),
            ),
            Verb::Nick | Verb::NameChatRoom => {
                return Err(ProtocolError::BadArguments {
                    verb,
                    reason: "verb has no reply",
                })
            }
        };
        Ok(reply)
    }
}

/// Trailing empty item on every frame of a listing but the last.
const CONTINUED_SUFFIX: &str = ";;";

fn items(listing: &str) -> impl Iterator<Item = &str> {
    listing.split(ITEM_DELIMITER).filter(|item| !item.is_empty())
}

fn pack(verb: Verb, items: impl Iterator<Item = String>) -> Vec<String> {
    let prefix = format!("{},", verb);
    // Every frame keeps one byte free for the continuation marker.
    let limit = MAX_PAYLOAD_LENGTH - 1;
    let mut payloads = Vec::new();
    let mut current = prefix.clone();

    for item in items {
        let needed = item.len() + 1;
        if prefix.len() + needed > limit {
            continue;
        }
        if current.len() + needed > limit {
            let mut full = std::mem::replace(&mut current, prefix.clone());
            full.push(ITEM_DELIMITER);
            payloads.push(full);
        }
        current.push_str(&item);
        current.push(ITEM_DELIMITER);
    }

    payloads.push(current);
    payloads
}
