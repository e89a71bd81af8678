//! Per (room, participant) presence state machine.
//!
//! | state         | join                                   | leave     |
//! |---------------|----------------------------------------|-----------|
//! | `NotMember`   | create membership, claim peer id -> `Online` | no-op |
//! | `Offline`     | claim peer id -> `Online`              | no-op     |
//! | `Online(p)`   | reuse `p`, rebind transport -> `Online`| `Offline` |
//!
//! Both creation steps are atomic in their stores, so two joins racing
//! from `NotMember` still end with one membership and one peer.

use crate::ids::PeerId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    NotMember,
    Offline,
    Online(PeerId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerStep {
    /// Take the participant's bound id, or bind a fresh one.
    Claim,
    /// Reconnect under the live id.
    Reuse(PeerId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPlan {
    pub create_membership: bool,
    pub peer: PeerStep,
}

impl Presence {
    pub fn join_plan(&self) -> JoinPlan {
        match self {
            Presence::NotMember => JoinPlan {
                create_membership: true,
                peer: PeerStep::Claim,
            },
            Presence::Offline => JoinPlan {
                create_membership: false,
                peer: PeerStep::Claim,
            },
            Presence::Online(peer_id) => JoinPlan {
                create_membership: false,
                peer: PeerStep::Reuse(peer_id.clone()),
            },
        }
    }

    pub fn peer_id(&self) -> Option<&PeerId> {
        match self {
            Presence::Online(peer_id) => Some(peer_id),
            _ => None,
        }
    }
}
