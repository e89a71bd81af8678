//! Wire codec for room messages.
//!
//! Every frame is a JSON object `{"t": <code>, "p": <payload>}` where the
//! code is a single character naming the message type:
//!
//! | type       | code |
//! |------------|------|
//! | signalling | `s`  |
//! | message    | `m`  |
//! | leave      | `l`  |
//! | join       | `j`  |
//! | announce   | `a`  |
//! | action     | `A`  |
//! | event      | `e`  |
//!
//! The table is part of the protocol. Changing it breaks every client.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Action names a client may dispatch through an `action` message.
pub const ACTION_TYPES: [&str; 3] = ["start_recording", "stop_recording", "kick"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Signalling,
    Message,
    Leave,
    Join,
    Announce,
    Action,
    Event,
}

impl MessageType {
    pub const ALL: [MessageType; 7] = [
        MessageType::Signalling,
        MessageType::Message,
        MessageType::Leave,
        MessageType::Join,
        MessageType::Announce,
        MessageType::Action,
        MessageType::Event,
    ];

    pub fn code(self) -> char {
        use MessageType::*;
        match self {
            Signalling => 's',
            Message => 'm',
            Leave => 'l',
            Join => 'j',
            Announce => 'a',
            Action => 'A',
            Event => 'e',
        }
    }

    pub fn from_code(code: char) -> Option<MessageType> {
        use MessageType::*;
        Some(match code {
            's' => Signalling,
            'm' => Message,
            'l' => Leave,
            'j' => Join,
            'a' => Announce,
            'A' => Action,
            'e' => Event,
            _ => return None,
        })
    }

    /// Name stored in the message log.
    pub fn name(self) -> &'static str {
        use MessageType::*;
        match self {
            Signalling => "signalling",
            Message => "message",
            Leave => "leave",
            Join => "join",
            Announce => "announce",
            Action => "action",
            Event => "event",
        }
    }

    pub fn from_name(name: &str) -> Option<MessageType> {
        MessageType::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A room message as the engine sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageType,
    pub payload: Value,
}

impl Message {
    pub fn new(kind: MessageType, payload: Value) -> Message {
        Message { kind, payload }
    }

    /// Subtype of an `event` message, read from `payload.type`.
    pub fn event_type(&self) -> Option<&str> {
        match self.kind {
            MessageType::Event => self.payload.get("type")?.as_str(),
            _ => None,
        }
    }

    /// Name of an `action` message, read from `payload.name`.
    pub fn action_name(&self) -> Option<&str> {
        match self.kind {
            MessageType::Action => self.payload.get("name")?.as_str(),
            _ => None,
        }
    }
}

pub fn is_valid_action(name: &str) -> bool {
    ACTION_TYPES.contains(&name)
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    t: String,
    p: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("could not encode {kind} message: {source}")]
    Encoding {
        kind: MessageType,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("unrecognized message code {0:?}")]
    UnknownCode(String),
}

impl CodecError {
    /// True for the failures raised while reading a frame.
    pub fn is_decoding(&self) -> bool {
        matches!(self, CodecError::Malformed(_) | CodecError::UnknownCode(_))
    }
}

pub fn encode(message: &Message) -> Result<String, CodecError> {
    let envelope = Envelope {
        t: message.kind.code().to_string(),
        p: message.payload.clone(),
    };
    serde_json::to_string(&envelope).map_err(|source| CodecError::Encoding {
        kind: message.kind,
        source,
    })
}

pub fn decode(wire: &str) -> Result<Message, CodecError> {
    let Envelope { t, p } = serde_json::from_str(wire).map_err(CodecError::Malformed)?;

    let mut chars = t.chars();
    let kind = match (chars.next(), chars.next()) {
        (Some(code), None) => MessageType::from_code(code),
        _ => None,
    }
    .ok_or(CodecError::UnknownCode(t.clone()))?;

    Ok(Message::new(kind, p))
}
