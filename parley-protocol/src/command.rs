//! Typed commands and the one-pass body parser.
//!
//! A command body looks like `<checksum> <timestamp> VERB[,arg]*`. The parser
//! splits on commas and spaces, drops empty tokens, skips the two preamble
//! tokens and reads the verb. Free-text arguments are rebuilt by joining the
//! remaining tokens with single spaces.

use crate::error::ProtocolError;
use crate::{MAX_NAME_LENGTH, MAX_TEXT_LENGTH};
use std::fmt;
use std::str::FromStr;

/// Number of tokens in front of the verb.
const PREAMBLE_TOKENS: usize = 2;

/// Characters that separate tokens in a body.
const SEPARATORS: [char; 2] = [',', ' '];

/// Delimiter between items of a listing reply. Never allowed in arguments.
pub const ITEM_DELIMITER: char = ';';

/// Command verbs. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    RequestUuid,
    Nick,
    SendText,
    NameChatRoom,
    ChangeChatRoom,
    RequestUsers,
    RequestChatRooms,
    RequestText,
}

impl Verb {
    /// Returns the wire name of the verb.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::RequestUuid => "REQUUID",
            Verb::Nick => "NICK",
            Verb::SendText => "SENDTEXT",
            Verb::NameChatRoom => "NAMECHATROOM",
            Verb::ChangeChatRoom => "CHANGECHATROOM",
            Verb::RequestUsers => "REQUSERS",
            Verb::RequestChatRooms => "REQCHATROOMS",
            Verb::RequestText => "REQTEXT",
        }
    }
}

impl FromStr for Verb {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REQUUID" => Ok(Verb::RequestUuid),
            "NICK" => Ok(Verb::Nick),
            "SENDTEXT" => Ok(Verb::SendText),
            "NAMECHATROOM" => Ok(Verb::NameChatRoom),
            // Older clients spell it JOINCHATROOM.
            "CHANGECHATROOM" | "JOINCHATROOM" => Ok(Verb::ChangeChatRoom),
            "REQUSERS" => Ok(Verb::RequestUsers),
            "REQCHATROOMS" => Ok(Verb::RequestChatRooms),
            "REQTEXT" => Ok(Verb::RequestText),
            other => Err(ProtocolError::UnknownVerb(other.to_string())),
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    RequestUuid,
    Nick(String),
    SendText(String),
    NameChatRoom(String),
    ChangeChatRoom(String),
    RequestUsers,
    RequestChatRooms,
    RequestText,
}

impl Command {
    /// Parses a verified body (preamble included) into a command.
    pub fn parse(body: &str) -> Result<Self, ProtocolError> {
        let mut tokens = body
            .split(SEPARATORS)
            .filter(|t| !t.is_empty())
            .skip(PREAMBLE_TOKENS);

        let verb: Verb = tokens.next().ok_or(ProtocolError::MissingVerb)?.parse()?;
        let args: Vec<&str> = tokens.collect();

        let command = match verb {
            Verb::RequestUuid => no_args(verb, &args, Command::RequestUuid)?,
            Verb::RequestUsers => no_args(verb, &args, Command::RequestUsers)?,
            Verb::RequestChatRooms => no_args(verb, &args, Command::RequestChatRooms)?,
            Verb::RequestText => no_args(verb, &args, Command::RequestText)?,
            Verb::Nick => match args.as_slice() {
                [name] => Command::Nick(name.to_string()),
                _ => return Err(bad(verb, "expected exactly one name")),
            },
            Verb::SendText => Command::SendText(rejoin(verb, &args, "missing text")?),
            Verb::NameChatRoom => Command::NameChatRoom(rejoin(verb, &args, "missing room name")?),
            Verb::ChangeChatRoom => {
                Command::ChangeChatRoom(rejoin(verb, &args, "missing room name")?)
            }
        };

        command.validate()?;
        Ok(command)
    }

    /// Returns the verb of this command.
    pub fn verb(&self) -> Verb {
        match self {
            Command::RequestUuid => Verb::RequestUuid,
            Command::Nick(_) => Verb::Nick,
            Command::SendText(_) => Verb::SendText,
            Command::NameChatRoom(_) => Verb::NameChatRoom,
            Command::ChangeChatRoom(_) => Verb::ChangeChatRoom,
            Command::RequestUsers => Verb::RequestUsers,
            Command::RequestChatRooms => Verb::RequestChatRooms,
            Command::RequestText => Verb::RequestText,
        }
    }

    /// Checks argument limits shared by the parser and by senders.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let verb = self.verb();
        match self {
            Command::Nick(name) => {
                check_name(verb, name)?;
                if name.contains(SEPARATORS) {
                    return Err(bad(verb, "nickname contains a separator"));
                }
            }
            Command::NameChatRoom(name) | Command::ChangeChatRoom(name) => {
                check_name(verb, name)?;
                if name.contains(',') {
                    return Err(bad(verb, "room name contains a comma"));
                }
            }
            Command::SendText(text) => {
                if text.trim().is_empty() {
                    return Err(bad(verb, "missing text"));
                }
                if text.len() > MAX_TEXT_LENGTH {
                    return Err(bad(verb, "text too long"));
                }
                if text.contains(ITEM_DELIMITER) {
                    return Err(bad(verb, "text contains ';'"));
                }
            }
            Command::RequestUuid
            | Command::RequestUsers
            | Command::RequestChatRooms
            | Command::RequestText => {}
        }
        Ok(())
    }

    /// Formats the command as a payload (`VERB[,arg]`), without preamble.
    pub fn to_payload(&self) -> String {
        match self {
            Command::Nick(arg)
            | Command::SendText(arg)
            | Command::NameChatRoom(arg)
            | Command::ChangeChatRoom(arg) => format!("{},{}", self.verb(), arg),
            _ => self.verb().as_str().to_string(),
        }
    }
}

fn bad(verb: Verb, reason: &'static str) -> ProtocolError {
    ProtocolError::BadArguments { verb, reason }
}

fn no_args(verb: Verb, args: &[&str], command: Command) -> Result<Command, ProtocolError> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(bad(verb, "takes no arguments"))
    }
}

fn rejoin(verb: Verb, args: &[&str], missing: &'static str) -> Result<String, ProtocolError> {
    if args.is_empty() {
        return Err(bad(verb, missing));
    }
    Ok(args.join(" "))
}

fn check_name(verb: Verb, name: &str) -> Result<(), ProtocolError> {
    if name.trim().is_empty() {
        return Err(bad(verb, "empty name"));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(bad(verb, "name too long"));
    }
    if name.contains(ITEM_DELIMITER) {
        return Err(bad(verb, "name contains ';'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum;

    fn body(payload: &str) -> String {
        checksum::seal_at(payload, 1_700_000_000_000)
    }

    #[test]
    fn test_parse_argumentless_verbs() {
        assert_eq!(Command::parse(&body("REQUUID")).unwrap(), Command::RequestUuid);
        assert_eq!(Command::parse(&body("REQUSERS")).unwrap(), Command::RequestUsers);
        assert_eq!(
            Command::parse(&body("REQCHATROOMS")).unwrap(),
            Command::RequestChatRooms
        );
        assert_eq!(Command::parse(&body("REQTEXT")).unwrap(), Command::RequestText);
    }

    #[test]
    fn test_trailing_separator_is_ignored() {
        // Clients format empty arguments as a trailing comma.
        assert_eq!(Command::parse(&body("REQTEXT,")).unwrap(), Command::RequestText);
    }

    #[test]
    fn test_parse_nick() {
        assert_eq!(
            Command::parse(&body("NICK,alice")).unwrap(),
            Command::Nick("alice".to_string())
        );

        let result = Command::parse(&body("NICK,alice,bob"));
        assert!(matches!(
            result,
            Err(ProtocolError::BadArguments { verb: Verb::Nick, .. })
        ));

        let result = Command::parse(&body("NICK"));
        assert!(matches!(result, Err(ProtocolError::BadArguments { .. })));
    }

    #[test]
    fn test_sendtext_rejoins_tokens() {
        let command = Command::parse(&body("SENDTEXT,hello,  big  world")).unwrap();
        assert_eq!(command, Command::SendText("hello big world".to_string()));
    }

    #[test]
    fn test_room_names_may_contain_spaces() {
        assert_eq!(
            Command::parse(&body("CHANGECHATROOM,the lobby")).unwrap(),
            Command::ChangeChatRoom("the lobby".to_string())
        );
        assert_eq!(
            Command::parse(&body("NAMECHATROOM,dev")).unwrap(),
            Command::NameChatRoom("dev".to_string())
        );
    }

    #[test]
    fn test_joinchatroom_alias() {
        assert_eq!(
            Command::parse(&body("JOINCHATROOM,dev")).unwrap(),
            Command::ChangeChatRoom("dev".to_string())
        );
    }

    #[test]
    fn test_unknown_verb() {
        let result = Command::parse(&body("SHOUT,hello"));
        assert!(matches!(result, Err(ProtocolError::UnknownVerb(v)) if v == "SHOUT"));

        // Verbs are case-sensitive
        let result = Command::parse(&body("reqtext"));
        assert!(matches!(result, Err(ProtocolError::UnknownVerb(_))));
    }

    #[test]
    fn test_missing_verb() {
        let result = Command::parse("deadbeef 1700000000000");
        assert!(matches!(result, Err(ProtocolError::MissingVerb)));
    }

    #[test]
    fn test_argumentless_verbs_reject_arguments() {
        let result = Command::parse(&body("REQUUID,extra"));
        assert!(matches!(
            result,
            Err(ProtocolError::BadArguments {
                verb: Verb::RequestUuid,
                ..
            })
        ));
    }

    #[test]
    fn test_delimiter_rejected_in_arguments() {
        assert!(Command::parse(&body("SENDTEXT,a;b")).is_err());
        assert!(Command::parse(&body("NICK,al;ice")).is_err());
        assert!(Command::parse(&body("NAMECHATROOM,dev;ops")).is_err());
    }

    #[test]
    fn test_length_limits() {
        let long_name = "n".repeat(MAX_NAME_LENGTH + 1);
        assert!(Command::parse(&body(&format!("NICK,{}", long_name))).is_err());

        let text = "t".repeat(MAX_TEXT_LENGTH);
        assert!(Command::parse(&body(&format!("SENDTEXT,{}", text))).is_ok());

        let text = "t".repeat(MAX_TEXT_LENGTH + 1);
        assert!(Command::parse(&body(&format!("SENDTEXT,{}", text))).is_err());
    }

    #[test]
    fn test_payload_roundtrip() {
        let commands = [
            Command::RequestUuid,
            Command::Nick("alice".to_string()),
            Command::SendText("hi there".to_string()),
            Command::NameChatRoom("dev".to_string()),
            Command::ChangeChatRoom("the lobby".to_string()),
            Command::RequestUsers,
            Command::RequestChatRooms,
            Command::RequestText,
        ];
        for command in commands {
            let parsed = Command::parse(&body(&command.to_payload())).unwrap();
            assert_eq!(parsed, command);
        }
    }

    #[test]
    fn test_validate_rejects_separator_in_nick() {
        assert!(Command::Nick("al ice".to_string()).validate().is_err());
        assert!(Command::ChangeChatRoom("a,b".to_string()).validate().is_err());
        assert!(Command::SendText("   ".to_string()).validate().is_err());
    }

    #[test]
    fn test_verb_display() {
        assert_eq!(Verb::RequestChatRooms.to_string(), "REQCHATROOMS");
        assert_eq!("CHANGECHATROOM".parse::<Verb>().unwrap(), Verb::ChangeChatRoom);
    }
}
