//! High-level client API.

use crate::connection::{CommandSender, Connection, ConnectionConfig};
use crate::error::ClientError;
use parley_protocol::{Command, Reply, ReplyChunk, UserEntry, Verb};
use std::collections::VecDeque;

/// High-level client for parley.
///
/// The protocol has no request ids: replies reuse the verb of the command
/// that triggered them and arrive in command order. Methods that expect a
/// reply wait for the next one with that verb and keep everything else,
/// broadcast pushes included, in a backlog. Listings are read up to the
/// frame that carries no continuation marker.
pub struct Client {
    conn: Connection,
    backlog: VecDeque<Reply>,
}

impl Client {
    /// Wraps an open connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            backlog: VecDeque::new(),
        }
    }

    /// Connects to the server.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, ClientError> {
        Ok(Self::new(Connection::connect(config).await?))
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.conn.close().await
    }

    /// Returns the underlying connection.
    pub fn connection(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Returns a sender usable from other tasks, e.g. a [`crate::Poller`].
    pub fn sender(&self) -> CommandSender {
        self.conn.sender()
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    async fn expect(&mut self, verb: Verb) -> Result<ReplyChunk, ClientError> {
        loop {
            let chunk = self.conn.recv_chunk().await?;
            if chunk.reply.verb() == verb {
                return Ok(chunk);
            }
            self.backlog.push_back(chunk.reply);
        }
    }

    async fn listing(&mut self, command: Command) -> Result<Vec<Reply>, ClientError> {
        let verb = command.verb();
        self.conn.send(&command).await?;
        let mut parts = Vec::new();
        loop {
            let chunk = self.expect(verb).await?;
            parts.push(chunk.reply);
            if !chunk.continued {
                return Ok(parts);
            }
        }
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Requests this connection's identity.
    pub async fn request_uuid(&mut self) -> Result<String, ClientError> {
        self.conn.send(&Command::RequestUuid).await?;
        match self.expect(Verb::RequestUuid).await?.reply {
            Reply::Uuid(uuid) => Ok(uuid),
            _ => Err(ClientError::UnexpectedReply(Verb::RequestUuid)),
        }
    }

    /// Sets the nickname. The server does not acknowledge it.
    pub async fn nick(&mut self, nickname: &str) -> Result<(), ClientError> {
        self.conn.send(&Command::Nick(nickname.to_string())).await
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Sends a message to the current room.
    pub async fn send_text(&mut self, text: &str) -> Result<(), ClientError> {
        self.conn.send(&Command::SendText(text.to_string())).await
    }

    /// Returns the room log entries not yet polled.
    pub async fn poll_text(&mut self) -> Result<Vec<String>, ClientError> {
        let mut entries = Vec::new();
        for part in self.listing(Command::RequestText).await? {
            if let Reply::Text(chunk) = part {
                entries.extend(chunk);
            }
        }
        Ok(entries)
    }

    /// Waits for the next broadcast push (`<uuid> <text>`).
    pub async fn next_broadcast(&mut self) -> Result<String, ClientError> {
        if let Some(index) = self.backlog.iter().position(|r| matches!(r, Reply::Broadcast(_))) {
            if let Some(Reply::Broadcast(entry)) = self.backlog.remove(index) {
                return Ok(entry);
            }
        }
        match self.expect(Verb::SendText).await?.reply {
            Reply::Broadcast(entry) => Ok(entry),
            _ => Err(ClientError::UnexpectedReply(Verb::SendText)),
        }
    }

    /// Drains every reply received but not yet consumed.
    pub fn take_backlog(&mut self) -> Vec<Reply> {
        while let Some(reply) = self.conn.try_recv() {
            self.backlog.push_back(reply);
        }
        self.backlog.drain(..).collect()
    }

    // =========================================================================
    // Rooms
    // =========================================================================

    /// Creates a room. The server does not acknowledge it.
    pub async fn name_room(&mut self, name: &str) -> Result<(), ClientError> {
        self.conn.send(&Command::NameChatRoom(name.to_string())).await
    }

    /// Moves to a room and returns its name once the server confirms.
    ///
    /// Unknown rooms get no reply, so this ends in `ClientError::Timeout`.
    pub async fn change_room(&mut self, name: &str) -> Result<String, ClientError> {
        self.conn.send(&Command::ChangeChatRoom(name.to_string())).await?;
        match self.expect(Verb::ChangeChatRoom).await?.reply {
            Reply::RoomChanged(room) => Ok(room),
            _ => Err(ClientError::UnexpectedReply(Verb::ChangeChatRoom)),
        }
    }

    /// Lists the identified members of the current room.
    pub async fn users(&mut self) -> Result<Vec<UserEntry>, ClientError> {
        let mut users = Vec::new();
        for part in self.listing(Command::RequestUsers).await? {
            if let Reply::Users(chunk) = part {
                users.extend(chunk);
            }
        }
        Ok(users)
    }

    /// Lists every room.
    pub async fn rooms(&mut self) -> Result<Vec<String>, ClientError> {
        let mut rooms = Vec::new();
        for part in self.listing(Command::RequestChatRooms).await? {
            if let Reply::ChatRooms(chunk) = part {
                rooms.extend(chunk);
            }
        }
        Ok(rooms)
    }
}
