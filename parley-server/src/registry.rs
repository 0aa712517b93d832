//! Room registry.
//!
//! The registry owns every room and is also the arena of connected
//! participants, keyed by connection id. Every operation takes the id and
//! checks that the participant is still registered, so a late call for a
//! closed connection is a harmless no-op.
//!
//! Delivery is pull-based: each room keeps a bounded, append-only log and
//! every participant keeps a cursor into the log of its current room.
//! `broadcast` appends and then pushes the new entry to the room's members;
//! `poll` hands out everything past the cursor and advances it. All state
//! sits behind a single mutex so an append and its fan-out are observed
//! together.

use crate::config::RoomsConfig;
use crate::error::RegistryError;
use parking_lot::Mutex;
use parley_protocol::{Frame, Reply, UserEntry};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

/// Stable id of a connection for its whole lifetime.
pub type ConnectionId = u64;

/// Outbound capability of a participant.
pub trait Deliver: Send + Sync {
    /// Queues a reply to the peer's own command. Returns false if the peer
    /// is gone.
    fn deliver(&self, frame: Frame) -> bool;

    /// Queues a broadcast push. A peer that has fallen behind may lose it;
    /// the entry stays in the room log for its next `REQTEXT`.
    fn push(&self, frame: Frame) -> bool {
        self.deliver(frame)
    }
}

struct Participant {
    uuid: Option<Uuid>,
    nickname: Option<String>,
    room: String,
    /// Sequence number of the next entry this participant has not polled.
    cursor: u64,
    outbound: Arc<dyn Deliver>,
}

struct Room {
    log: VecDeque<String>,
    /// Sequence number of `log[0]`. Grows by one per evicted entry.
    first_seq: u64,
    members: BTreeSet<ConnectionId>,
}

impl Room {
    fn new() -> Self {
        Self {
            log: VecDeque::new(),
            first_seq: 0,
            members: BTreeSet::new(),
        }
    }

    fn next_seq(&self) -> u64 {
        self.first_seq + self.log.len() as u64
    }

    fn append(&mut self, entry: String, capacity: usize) {
        self.log.push_back(entry);
        while self.log.len() > capacity {
            self.log.pop_front();
            self.first_seq += 1;
        }
    }

    fn since(&self, cursor: u64) -> impl Iterator<Item = &String> {
        let skip = cursor.saturating_sub(self.first_seq) as usize;
        self.log.iter().skip(skip)
    }
}

#[derive(Default)]
struct RegistryState {
    rooms: BTreeMap<String, Room>,
    participants: HashMap<ConnectionId, Participant>,
}

/// Shared registry of rooms and participants.
pub struct RoomRegistry {
    state: Mutex<RegistryState>,
    default_room: String,
    history_capacity: usize,
}

impl RoomRegistry {
    /// Creates a registry holding only the default room.
    pub fn new(config: &RoomsConfig) -> Self {
        let mut state = RegistryState::default();
        state.rooms.insert(config.default_room.clone(), Room::new());
        Self {
            state: Mutex::new(state),
            default_room: config.default_room.clone(),
            history_capacity: config.history_capacity.max(1),
        }
    }

    /// Returns the room new participants join.
    pub fn default_room(&self) -> &str {
        &self.default_room
    }

    /// Returns the per-room history capacity.
    pub fn history_capacity(&self) -> usize {
        self.history_capacity
    }

    /// Registers a connection and places it in the default room.
    ///
    /// Returns false if the id was already registered.
    pub fn register(&self, id: ConnectionId, outbound: Arc<dyn Deliver>) -> bool {
        let mut state = self.state.lock();
        if state.participants.contains_key(&id) {
            return false;
        }
        state.participants.insert(
            id,
            Participant {
                uuid: None,
                nickname: None,
                room: self.default_room.clone(),
                cursor: 0,
                outbound,
            },
        );
        state
            .rooms
            .entry(self.default_room.clone())
            .or_insert_with(Room::new)
            .members
            .insert(id);
        tracing::debug!("Connection {} joined '{}'", id, self.default_room);
        true
    }

    /// Removes a connection from its room and from the arena.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let mut state = self.state.lock();
        let Some(participant) = state.participants.remove(&id) else {
            return false;
        };
        if let Some(room) = state.rooms.get_mut(&participant.room) {
            room.members.remove(&id);
        }
        tracing::debug!("Connection {} left '{}'", id, participant.room);
        true
    }

    /// Returns whether the connection is still registered.
    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.state.lock().participants.contains_key(&id)
    }

    /// Returns the number of registered connections.
    pub fn participant_count(&self) -> usize {
        self.state.lock().participants.len()
    }

    /// Returns the participant's identity, assigning one on first use.
    pub fn assign_uuid(&self, id: ConnectionId) -> Result<Uuid, RegistryError> {
        let mut state = self.state.lock();
        let participant = state
            .participants
            .get_mut(&id)
            .ok_or(RegistryError::UnknownParticipant(id))?;
        Ok(*participant.uuid.get_or_insert_with(Uuid::new_v4))
    }

    /// Returns the participant's identity, if assigned.
    pub fn uuid(&self, id: ConnectionId) -> Option<Uuid> {
        self.state.lock().participants.get(&id).and_then(|p| p.uuid)
    }

    /// Sets a nickname unless another connected participant holds it.
    pub fn set_nickname(&self, id: ConnectionId, nickname: &str) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        let taken = state
            .participants
            .iter()
            .any(|(&other, p)| other != id && p.nickname.as_deref() == Some(nickname));
        if taken {
            return Err(RegistryError::NameConflict(nickname.to_string()));
        }

        let participant = state
            .participants
            .get_mut(&id)
            .ok_or(RegistryError::UnknownParticipant(id))?;
        participant.nickname = Some(nickname.to_string());
        Ok(())
    }

    /// Returns the participant's nickname, if set.
    pub fn nickname(&self, id: ConnectionId) -> Option<String> {
        self.state
            .lock()
            .participants
            .get(&id)
            .and_then(|p| p.nickname.clone())
    }

    /// Creates a room. Returns false if it already existed.
    pub fn create(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        if state.rooms.contains_key(name) {
            return false;
        }
        state.rooms.insert(name.to_string(), Room::new());
        tracing::info!("Room created: '{}'", name);
        true
    }

    /// Returns whether a room exists.
    pub fn exists(&self, name: &str) -> bool {
        self.state.lock().rooms.contains_key(name)
    }

    /// Moves a participant into an existing room and rewinds its cursor.
    pub fn join(&self, id: ConnectionId, name: &str) -> Result<(), RegistryError> {
        let mut guard = self.state.lock();
        let RegistryState {
            rooms,
            participants,
        } = &mut *guard;

        if !rooms.contains_key(name) {
            return Err(RegistryError::RoomNotFound(name.to_string()));
        }
        let participant = participants
            .get_mut(&id)
            .ok_or(RegistryError::UnknownParticipant(id))?;

        if let Some(old) = rooms.get_mut(&participant.room) {
            old.members.remove(&id);
        }
        if let Some(room) = rooms.get_mut(name) {
            room.members.insert(id);
        }
        participant.room = name.to_string();
        participant.cursor = 0;
        tracing::debug!("Connection {} joined '{}'", id, name);
        Ok(())
    }

    /// Returns the participant's current room.
    pub fn current_room(&self, id: ConnectionId) -> Option<String> {
        self.state.lock().participants.get(&id).map(|p| p.room.clone())
    }

    /// Appends `<uuid> <text>` to the sender's room log and pushes it to
    /// every member of that room, the sender included.
    ///
    /// Returns the number of members the entry was delivered to.
    pub fn broadcast(&self, id: ConnectionId, text: &str) -> Result<usize, RegistryError> {
        let mut guard = self.state.lock();
        let RegistryState {
            rooms,
            participants,
        } = &mut *guard;

        let sender = participants
            .get(&id)
            .ok_or(RegistryError::UnknownParticipant(id))?;
        let uuid = sender.uuid.ok_or(RegistryError::Unidentified(id))?;
        let room = rooms
            .get_mut(&sender.room)
            .ok_or_else(|| RegistryError::RoomNotFound(sender.room.clone()))?;

        let entry = format!("{} {}", uuid, text);
        let frames = match Reply::Broadcast(entry.clone()).to_frames() {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!("Connection {} message not fanned out: {}", id, e);
                Vec::new()
            }
        };
        room.append(entry, self.history_capacity);

        let mut delivered = 0;
        for member in &room.members {
            let Some(participant) = participants.get(member) else {
                continue;
            };
            let mut ok = !frames.is_empty();
            for frame in &frames {
                ok &= participant.outbound.push(frame.clone());
            }
            if ok {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Returns the identified members of a room. Unknown rooms list nobody.
    pub fn list_users(&self, name: &str) -> Vec<UserEntry> {
        let state = self.state.lock();
        let Some(room) = state.rooms.get(name) else {
            return Vec::new();
        };
        room.members
            .iter()
            .filter_map(|member| state.participants.get(member))
            .filter_map(|p| {
                p.uuid.map(|uuid| UserEntry {
                    uuid: uuid.to_string(),
                    nickname: p.nickname.clone(),
                })
            })
            .collect()
    }

    /// Returns every room name, sorted.
    pub fn list_rooms(&self) -> Vec<String> {
        self.state.lock().rooms.keys().cloned().collect()
    }

    /// Returns the log entries past the participant's cursor and advances it.
    pub fn poll(&self, id: ConnectionId) -> Result<Vec<String>, RegistryError> {
        let mut guard = self.state.lock();
        let RegistryState {
            rooms,
            participants,
        } = &mut *guard;

        let participant = participants
            .get_mut(&id)
            .ok_or(RegistryError::UnknownParticipant(id))?;
        let room = rooms
            .get(&participant.room)
            .ok_or_else(|| RegistryError::RoomNotFound(participant.room.clone()))?;

        let entries = room.since(participant.cursor).cloned().collect();
        participant.cursor = room.next_seq();
        Ok(entries)
    }

    /// Returns the number of entries retained in a room's log.
    pub fn history_len(&self, name: &str) -> Option<usize> {
        self.state.lock().rooms.get(name).map(|r| r.log.len())
    }

    /// Returns the number of members of a room.
    pub fn member_count(&self, name: &str) -> Option<usize> {
        self.state.lock().rooms.get(name).map(|r| r.members.len())
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(&RoomsConfig::default())
    }
}
