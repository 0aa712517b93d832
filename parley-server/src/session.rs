//! Session management.

use crate::error::RegistryError;
use crate::registry::{ConnectionId, Deliver, RoomRegistry};
use parley_protocol::{checksum, Command, ProtocolError, Reply, Verb};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, not yet registered with the room registry.
    Connecting,
    /// Registered and placed in the default room, no identity yet.
    Established,
    /// Identity assigned by `REQUUID`.
    Identified,
    /// At least one command processed after identification.
    Active,
    /// Unregistered; further frames are ignored.
    Closed,
}

/// What happened to a single inbound frame.
#[derive(Debug)]
pub enum Outcome {
    /// The command was applied.
    Handled(Verb),
    /// The command parsed but had no effect.
    Ignored { verb: Verb, reason: RegistryError },
    /// The frame was dropped before dispatch.
    Rejected(ProtocolError),
}

impl Outcome {
    /// Returns whether the command was applied.
    pub fn is_handled(&self) -> bool {
        matches!(self, Outcome::Handled(_))
    }
}

/// A client session.
///
/// The session owns no room state. It turns frames into commands and
/// applies them to the shared registry under its connection id; replies go
/// out through the same outbound queue the registry fans broadcasts into.
pub struct Session {
    /// Connection id, also the key in the registry arena.
    pub id: ConnectionId,

    /// Remote address.
    pub remote_addr: SocketAddr,

    state: SessionState,
    registry: Arc<RoomRegistry>,
    outbound: Arc<dyn Deliver>,

    /// Frames read from the peer, dropped ones included.
    frames_received: u64,

    created_at: Instant,
}

impl Session {
    /// Creates a new session in the `Connecting` state.
    pub fn new(
        id: ConnectionId,
        remote_addr: SocketAddr,
        registry: Arc<RoomRegistry>,
        outbound: Arc<dyn Deliver>,
    ) -> Self {
        Self {
            id,
            remote_addr,
            state: SessionState::Connecting,
            registry,
            outbound,
            frames_received: 0,
            created_at: Instant::now(),
        }
    }

    /// Returns the session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the number of frames received.
    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Returns how long the session has existed.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Registers the session with the registry, joining the default room.
    pub fn establish(&mut self) {
        if self.state != SessionState::Connecting {
            return;
        }
        self.registry.register(self.id, self.outbound.clone());
        self.state = SessionState::Established;
        tracing::debug!(
            "[{}] Session {} joined '{}'",
            self.remote_addr,
            self.id,
            self.registry.default_room()
        );
    }

    /// Handles one frame body: integrity check, parse, dispatch.
    pub fn handle_frame(&mut self, body: &[u8]) -> Outcome {
        self.frames_received += 1;

        let sealed = match checksum::open(body) {
            Ok(sealed) => sealed,
            Err(e) => {
                tracing::warn!("[{}] Dropping frame: {}", self.remote_addr, e);
                return Outcome::Rejected(e);
            }
        };

        match Command::parse(sealed.body) {
            Ok(command) => self.dispatch(command),
            Err(e) => {
                tracing::debug!("[{}] Ignoring frame: {}", self.remote_addr, e);
                Outcome::Rejected(e)
            }
        }
    }

    /// Applies a parsed command.
    pub fn dispatch(&mut self, command: Command) -> Outcome {
        let verb = command.verb();
        tracing::debug!("[{}] Command: {}", self.remote_addr, verb);

        if matches!(self.state, SessionState::Connecting | SessionState::Closed) {
            return self.ignored(verb, RegistryError::UnknownParticipant(self.id));
        }

        match self.apply(command) {
            Ok(()) => {
                self.advance(verb);
                Outcome::Handled(verb)
            }
            Err(reason) => {
                // Anything processed after identification activates the session.
                if self.state == SessionState::Identified {
                    self.state = SessionState::Active;
                }
                self.ignored(verb, reason)
            }
        }
    }

    fn apply(&mut self, command: Command) -> Result<(), RegistryError> {
        let id = self.id;
        match command {
            Command::RequestUuid => {
                let uuid = self.registry.assign_uuid(id)?;
                self.reply(Reply::Uuid(uuid.to_string()));
            }
            Command::Nick(nickname) => {
                self.require_identity()?;
                self.registry.set_nickname(id, &nickname)?;
            }
            Command::SendText(text) => {
                self.require_identity()?;
                self.registry.broadcast(id, &text)?;
            }
            Command::NameChatRoom(name) => {
                self.require_registered()?;
                self.registry.create(&name);
            }
            Command::ChangeChatRoom(name) => {
                self.registry.join(id, &name)?;
                self.reply(Reply::RoomChanged(name));
            }
            Command::RequestUsers => {
                let room = self
                    .registry
                    .current_room(id)
                    .ok_or(RegistryError::UnknownParticipant(id))?;
                self.reply(Reply::Users(self.registry.list_users(&room)));
            }
            Command::RequestChatRooms => {
                self.require_registered()?;
                self.reply(Reply::ChatRooms(self.registry.list_rooms()));
            }
            Command::RequestText => {
                let entries = self.registry.poll(id)?;
                self.reply(Reply::Text(entries));
            }
        }
        Ok(())
    }

    fn advance(&mut self, verb: Verb) {
        self.state = match (self.state, verb) {
            (SessionState::Established, Verb::RequestUuid) => SessionState::Identified,
            (SessionState::Identified, _) => SessionState::Active,
            (state, _) => state,
        };
    }

    fn require_registered(&self) -> Result<(), RegistryError> {
        if self.registry.is_registered(self.id) {
            Ok(())
        } else {
            Err(RegistryError::UnknownParticipant(self.id))
        }
    }

    fn require_identity(&self) -> Result<(), RegistryError> {
        if self.state == SessionState::Established {
            return Err(RegistryError::Unidentified(self.id));
        }
        Ok(())
    }

    fn ignored(&self, verb: Verb, reason: RegistryError) -> Outcome {
        tracing::debug!("[{}] {} ignored: {}", self.remote_addr, verb, reason);
        Outcome::Ignored { verb, reason }
    }

    fn reply(&self, reply: Reply) {
        let frames = match reply.to_frames() {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!("[{}] Cannot encode {} reply: {}", self.remote_addr, reply.verb(), e);
                return;
            }
        };
        for frame in frames {
            if !self.outbound.deliver(frame) {
                tracing::debug!("[{}] Outbound queue closed", self.remote_addr);
                return;
            }
        }
    }

    /// Unregisters the session. Safe to call more than once.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if self.state != SessionState::Connecting {
            self.registry.unregister(self.id);
        }
        self.state = SessionState::Closed;
        tracing::debug!(
            "[{}] Session {} closed after {} frames",
            self.remote_addr,
            self.id,
            self.frames_received
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoomsConfig;
    use crate::registry::test_support::Recorder;
    use parley_protocol::UserEntry;

    fn addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn open_session(registry: &Arc<RoomRegistry>, id: ConnectionId) -> (Session, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let mut session = Session::new(id, addr(), registry.clone(), recorder.clone());
        session.establish();
        (session, recorder)
    }

    fn send(session: &mut Session, command: &Command) -> Outcome {
        let body = checksum::seal(&command.to_payload());
        session.handle_frame(body.as_bytes())
    }

    fn identify(session: &mut Session, recorder: &Recorder) -> String {
        assert!(send(session, &Command::RequestUuid).is_handled());
        match recorder.take().as_slice() {
            [Reply::Uuid(uuid)] => uuid.clone(),
            other => panic!("unexpected replies {:?}", other),
        }
    }

    #[test]
    fn test_state_transitions() {
        let registry = Arc::new(RoomRegistry::default());
        let recorder = Arc::new(Recorder::default());
        let mut session = Session::new(1, addr(), registry.clone(), recorder.clone());
        assert_eq!(session.state(), SessionState::Connecting);

        session.establish();
        assert_eq!(session.state(), SessionState::Established);
        assert!(registry.is_registered(1));

        identify(&mut session, &recorder);
        assert_eq!(session.state(), SessionState::Identified);

        send(&mut session, &Command::RequestText);
        assert_eq!(session.state(), SessionState::Active);

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!registry.is_registered(1));

        let outcome = send(&mut session, &Command::RequestText);
        assert!(matches!(outcome, Outcome::Ignored { .. }));
        assert_eq!(session.frames_received(), 3);
    }

    #[test]
    fn test_uuid_is_stable_across_requests() {
        let registry = Arc::new(RoomRegistry::default());
        let (mut session, recorder) = open_session(&registry, 1);

        let first = identify(&mut session, &recorder);
        let second = identify(&mut session, &recorder);
        assert_eq!(first, second);
        assert_eq!(first.len(), parley_protocol::UUID_LENGTH);
    }

    #[test]
    fn test_identity_required_for_nick_and_text() {
        let registry = Arc::new(RoomRegistry::default());
        let (mut session, _recorder) = open_session(&registry, 1);

        let outcome = send(&mut session, &Command::Nick("alice".to_string()));
        assert!(matches!(
            outcome,
            Outcome::Ignored {
                verb: Verb::Nick,
                reason: RegistryError::Unidentified(1),
            }
        ));

        let outcome = send(&mut session, &Command::SendText("hi".to_string()));
        assert!(matches!(outcome, Outcome::Ignored { verb: Verb::SendText, .. }));
        assert_eq!(registry.history_len("the lobby"), Some(0));
        assert_eq!(session.state(), SessionState::Established);
    }

    #[test]
    fn test_corrupted_frame_is_dropped() {
        let registry = Arc::new(RoomRegistry::default());
        let (mut session, recorder) = open_session(&registry, 1);

        let mut body = checksum::seal("REQUUID").into_bytes();
        body[0] = if body[0] == b'0' { b'1' } else { b'0' };

        let outcome = session.handle_frame(&body);
        assert!(matches!(
            outcome,
            Outcome::Rejected(ProtocolError::ChecksumMismatch { .. })
        ));
        assert!(recorder.take().is_empty());
        assert!(registry.uuid(1).is_none());

        // The session keeps going
        identify(&mut session, &recorder);
    }

    #[test]
    fn test_unknown_verb_is_rejected() {
        let registry = Arc::new(RoomRegistry::default());
        let (mut session, recorder) = open_session(&registry, 1);

        let body = checksum::seal("SHOUT,hello");
        let outcome = session.handle_frame(body.as_bytes());
        assert!(matches!(
            outcome,
            Outcome::Rejected(ProtocolError::UnknownVerb(ref verb)) if verb == "SHOUT"
        ));
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_scenario_send_then_poll() {
        let registry = Arc::new(RoomRegistry::default());
        let (mut a, a_out) = open_session(&registry, 1);
        let u1 = identify(&mut a, &a_out);

        assert!(send(&mut a, &Command::Nick("alice".to_string())).is_handled());
        assert!(send(&mut a, &Command::SendText("hi".to_string())).is_handled());
        assert_eq!(a_out.take(), vec![Reply::Broadcast(format!("{} hi", u1))]);

        let (mut b, b_out) = open_session(&registry, 2);
        identify(&mut b, &b_out);

        assert!(send(&mut b, &Command::RequestText).is_handled());
        assert_eq!(b_out.take(), vec![Reply::Text(vec![format!("{} hi", u1)])]);

        // Drained: the next poll is empty but still answered
        send(&mut b, &Command::RequestText);
        assert_eq!(b_out.take(), vec![Reply::Text(Vec::new())]);
    }

    #[test]
    fn test_scenario_create_and_change_room() {
        let registry = Arc::new(RoomRegistry::default());
        let (mut a, a_out) = open_session(&registry, 1);
        let (mut b, b_out) = open_session(&registry, 2);
        let u1 = identify(&mut a, &a_out);
        identify(&mut b, &b_out);

        assert!(send(&mut a, &Command::NameChatRoom("dev".to_string())).is_handled());
        assert!(a_out.take().is_empty());

        assert!(send(&mut a, &Command::ChangeChatRoom("dev".to_string())).is_handled());
        assert_eq!(a_out.take(), vec![Reply::RoomChanged("dev".to_string())]);

        send(&mut a, &Command::RequestChatRooms);
        match a_out.take().as_slice() {
            [Reply::ChatRooms(rooms)] => assert!(rooms.contains(&"dev".to_string())),
            other => panic!("unexpected replies {:?}", other),
        }

        send(&mut a, &Command::RequestUsers);
        assert_eq!(
            a_out.take(),
            vec![Reply::Users(vec![UserEntry {
                uuid: u1,
                nickname: None,
            }])]
        );
    }

    #[test]
    fn test_change_to_unknown_room_is_noop() {
        let registry = Arc::new(RoomRegistry::default());
        let (mut a, a_out) = open_session(&registry, 1);
        identify(&mut a, &a_out);

        let outcome = send(&mut a, &Command::ChangeChatRoom("nowhere".to_string()));
        match outcome {
            Outcome::Ignored { verb, reason } => {
                assert_eq!(verb, Verb::ChangeChatRoom);
                assert_eq!(reason, RegistryError::RoomNotFound("nowhere".to_string()));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(a_out.take().is_empty());
        assert_eq!(registry.current_room(1).as_deref(), Some("the lobby"));
    }

    #[test]
    fn test_broadcast_stays_in_room() {
        let registry = Arc::new(RoomRegistry::new(&RoomsConfig::default()));
        let (mut a, a_out) = open_session(&registry, 1);
        let (mut b, b_out) = open_session(&registry, 2);
        identify(&mut a, &a_out);
        identify(&mut b, &b_out);

        send(&mut a, &Command::NameChatRoom("dev".to_string()));
        send(&mut a, &Command::ChangeChatRoom("dev".to_string()));
        a_out.take();

        send(&mut a, &Command::SendText("only dev hears this".to_string()));
        assert_eq!(a_out.take().len(), 1);
        assert!(b_out.take().is_empty());

        send(&mut b, &Command::RequestText);
        assert_eq!(b_out.take(), vec![Reply::Text(Vec::new())]);
    }

    #[test]
    fn test_nickname_conflict_is_ignored() {
        let registry = Arc::new(RoomRegistry::default());
        let (mut a, a_out) = open_session(&registry, 1);
        let (mut b, b_out) = open_session(&registry, 2);
        identify(&mut a, &a_out);
        identify(&mut b, &b_out);

        assert!(send(&mut a, &Command::Nick("alice".to_string())).is_handled());
        let outcome = send(&mut b, &Command::Nick("alice".to_string()));
        assert!(matches!(
            outcome,
            Outcome::Ignored {
                reason: RegistryError::NameConflict(_),
                ..
            }
        ));
        assert!(registry.nickname(2).is_none());
    }
}
