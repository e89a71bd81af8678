use std::fmt;

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Symbols a room id is drawn from. `O` and `l` are left out so ids read unambiguously.
pub const ROOM_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz0123456789";
pub const ROOM_ID_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn generate() -> RoomId {
        let mut rng = rand::rng();
        let id = (0..ROOM_ID_LEN)
            .filter_map(|_| ROOM_ID_ALPHABET.choose(&mut rng))
            .map(|&b| b as char)
            .collect();
        RoomId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        RoomId(id.to_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    pub fn new() -> ParticipantId {
        ParticipantId(Uuid::now_v7())
    }
}

/// Opaque token naming one live connection inside a room.
///
/// Drawn from a v4 uuid (122 random bits) and carried as its hex form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn generate() -> PeerId {
        PeerId(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        PeerId(id.to_owned())
    }
}

/// Address of a connection on the broadcast/direct-send facility.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportHandle(pub String);

impl TransportHandle {
    pub fn generate() -> TransportHandle {
        TransportHandle(format!("conn.{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TransportHandle {
    fn from(handle: &str) -> Self {
        TransportHandle(handle.to_owned())
    }
}

macro_rules! display_impl {
    ($T:ty) => {
        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

display_impl!(RoomId);
display_impl!(ParticipantId);
display_impl!(PeerId);
display_impl!(TransportHandle);
