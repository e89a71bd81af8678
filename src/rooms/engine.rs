//! The room engine: binds connections to participants, broadcasts presence
//! changes and routes every room message through one dispatch primitive.
//!
//! ```text
//! join ──► MembershipStore::get_or_create ──► PeerRegistry::claim + connect ──► announce
//! leave ─► PeerRegistry::disconnect ─────────────────────────────────────────► leave
//! send ──► action whitelist ─► room lookup ─► encode ─► MessageLog (policy) ─► Transport
//! ```
//!
//! No room-wide lock is taken. Correctness rests on the atomic unique
//! insert in the membership table and the atomic single-key claim in the
//! registry.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    msg::{self, MessageLog},
    presence::{PeerStep, Presence},
    room::RoomStore,
};
use crate::{
    Error, Result,
    ids::{ParticipantId, PeerId, RoomId, TransportHandle},
    memberships::{Membership, MembershipStore, Role},
    participants::ParticipantStore,
    protocol::{self, CodecError, Message, MessageType},
    recordings::RecordingStore,
    registry::{EphemeralStore, PeerRegistry},
    transport::Transport,
};

/// Addressing and persistence for one [`RoomEngine::send`].
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub from: Option<ParticipantId>,
    /// `None` is the whole room.
    pub to: Option<PeerId>,
    /// `None` lets the persistence policy decide for room-wide sends.
    /// Direct sends are only persisted when this is `Some(true)`.
    pub persist: Option<bool>,
}

impl SendOptions {
    pub fn broadcast() -> Self {
        Self::default()
    }

    pub fn direct(peer_id: PeerId) -> Self {
        Self {
            to: Some(peer_id),
            ..Self::default()
        }
    }

    pub fn sent_by(mut self, participant: ParticipantId) -> Self {
        self.from = Some(participant);
        self
    }

    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = Some(persist);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Broadcast { recipients: usize },
    Direct,
    /// The target peer is no longer live. Not an error.
    PeerGone,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerInfo {
    pub name: Option<String>,
    pub role: Role,
    pub current_recording_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerDescriptor {
    pub peer_id: Option<PeerId>,
    pub uid: ParticipantId,
    pub info: PeerInfo,
}

/// Snapshot sent to a peer right after it joins.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitialRoomData {
    #[serde(rename = "self")]
    pub self_: Option<PeerDescriptor>,
    pub members: Vec<PeerDescriptor>,
}

pub struct RoomEngine {
    rooms: RoomStore,
    memberships: MembershipStore,
    participants: ParticipantStore,
    messages: MessageLog,
    recordings: RecordingStore,
    registry: PeerRegistry,
    transport: Arc<dyn Transport>,
}

impl RoomEngine {
    pub fn new(
        db_pool: SqlitePool,
        ephemeral: Arc<dyn EphemeralStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            rooms: RoomStore::new(db_pool.clone()),
            memberships: MembershipStore::new(db_pool.clone()),
            participants: ParticipantStore::new(db_pool.clone()),
            messages: MessageLog::new(db_pool.clone()),
            recordings: RecordingStore::new(db_pool),
            registry: PeerRegistry::new(ephemeral),
            transport,
        }
    }

    pub fn rooms(&self) -> &RoomStore {
        &self.rooms
    }

    pub fn memberships(&self) -> &MembershipStore {
        &self.memberships
    }

    pub fn participants(&self) -> &ParticipantStore {
        &self.participants
    }

    pub fn messages(&self) -> &MessageLog {
        &self.messages
    }

    pub fn recordings(&self) -> &RecordingStore {
        &self.recordings
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Wipes all live peer state. Bootstrap and tests only.
    pub async fn flush_ephemeral(&self) -> Result<()> {
        warn!("flushing ephemeral peer registry");
        self.registry.store().flush().await?;
        Ok(())
    }

    pub async fn create_room(&self, owner: ParticipantId) -> Result<RoomId> {
        Ok(self.rooms.create_with_owner(owner).await?.id)
    }

    pub async fn is_admin(&self, room_id: &RoomId, participant: ParticipantId) -> Result<bool> {
        Ok(self.rooms.get(room_id).await?.owner == participant)
    }

    pub async fn presence(&self, room_id: &RoomId, participant: ParticipantId) -> Result<Presence> {
        let is_member = self.memberships.find(room_id, participant).await?.is_some();
        self.presence_of(room_id, participant, is_member).await
    }

    async fn presence_of(
        &self,
        room_id: &RoomId,
        participant: ParticipantId,
        is_member: bool,
    ) -> Result<Presence> {
        if !is_member {
            return Ok(Presence::NotMember);
        }
        Ok(match self.live_peer_of(room_id, participant).await? {
            Some(peer_id) => Presence::Online(peer_id),
            None => Presence::Offline,
        })
    }

    async fn live_peer_of(&self, room_id: &RoomId, participant: ParticipantId) -> Result<Option<PeerId>> {
        match self.registry.get_peer_id(room_id, participant).await? {
            Some(peer_id) if self.registry.is_live(room_id, &peer_id).await? => Ok(Some(peer_id)),
            _ => Ok(None),
        }
    }

    /// Connects `participant` to the room over `handle` and announces it.
    ///
    /// Joining again while online is a reconnect: same membership, same
    /// peer id, the new handle replaces the old one.
    pub async fn join(
        &self,
        room_id: &RoomId,
        participant: ParticipantId,
        handle: &TransportHandle,
    ) -> Result<PeerId> {
        let room = self.rooms.get(room_id).await?;
        let existing = self.memberships.find(room_id, participant).await?;
        let presence = self
            .presence_of(room_id, participant, existing.is_some())
            .await?;
        let plan = presence.join_plan();

        let membership = match existing {
            Some(membership) if !plan.create_membership => membership,
            _ => {
                let role = if participant == room.owner {
                    Role::Owner
                } else {
                    Role::Guest
                };
                self.memberships
                    .get_or_create(room_id, participant, role)
                    .await?
            }
        };

        let peer_id = match plan.peer {
            PeerStep::Reuse(peer_id) => peer_id,
            PeerStep::Claim => self.registry.claim_peer_id(room_id, participant).await?,
        };

        let replaced = self
            .registry
            .connect(room_id, &peer_id, handle, participant)
            .await?;
        self.transport.group_add(room_id, handle).await;
        if let Some(replaced) = replaced {
            self.transport.group_discard(room_id, &replaced).await;
        }

        // a concurrent join for the same participant may have rebound the peer
        // between our connect and group_add
        let current = self.registry.resolve_transport(room_id, &peer_id).await?;
        if current.as_ref() != Some(handle) {
            self.transport.group_discard(room_id, handle).await;
            debug!(room = %room_id, %participant, %peer_id, %handle, "join superseded by a concurrent join");
            return Ok(peer_id);
        }

        let reconnect = presence.peer_id().is_some();
        if let Err(err) = self.announce(&membership, &peer_id).await {
            if !reconnect {
                self.undo_connect(room_id, &peer_id, handle).await;
            }
            return Err(err);
        }

        info!(room = %room_id, %participant, %peer_id, reconnect, "peer joined");
        Ok(peer_id)
    }

    async fn undo_connect(&self, room_id: &RoomId, peer_id: &PeerId, handle: &TransportHandle) {
        if let Err(err) = self.registry.disconnect(room_id, peer_id).await {
            warn!(room = %room_id, %peer_id, %err, "could not roll back peer");
        }
        self.transport.group_discard(room_id, handle).await;
    }

    async fn announce(&self, membership: &Membership, peer_id: &PeerId) -> Result<Delivery> {
        let peer = self.describe(membership, Some(peer_id.clone())).await?;
        let message = Message::new(
            MessageType::Announce,
            json!({ "peer": to_payload(MessageType::Announce, &peer)? }),
        );
        self.send(
            &membership.room_id,
            message,
            SendOptions::broadcast().sent_by(membership.participant_id),
        )
        .await
    }

    /// Takes the peer out of the room and tells everyone else. Repeating it is a no-op.
    pub async fn leave(&self, room_id: &RoomId, peer_id: &PeerId) -> Result<()> {
        let handle = self.registry.resolve_transport(room_id, peer_id).await?;
        let Some(participant) = self.registry.disconnect(room_id, peer_id).await? else {
            debug!(room = %room_id, %peer_id, "leave for peer that is not live");
            return Ok(());
        };
        if let Some(handle) = handle {
            self.transport.group_discard(room_id, &handle).await;
        }

        let message = Message::new(MessageType::Leave, json!({ "id": peer_id }));
        self.send(room_id, message, SendOptions::broadcast().sent_by(participant))
            .await?;

        info!(room = %room_id, %participant, %peer_id, "peer left");
        Ok(())
    }

    /// Called when the connection behind `handle` closes. A connection that a
    /// reconnect already replaced only drops out of the group.
    pub async fn close_connection(
        &self,
        room_id: &RoomId,
        peer_id: &PeerId,
        handle: &TransportHandle,
    ) -> Result<()> {
        match self.registry.resolve_transport(room_id, peer_id).await? {
            Some(current) if &current != handle => {
                self.transport.group_discard(room_id, handle).await;
                debug!(room = %room_id, %peer_id, %handle, "superseded connection closed");
                Ok(())
            }
            _ => self.leave(room_id, peer_id).await,
        }
    }

    /// Dispatches one message to the room or to a single peer.
    ///
    /// When the message is persisted the log write happens before delivery.
    pub async fn send(
        &self,
        room_id: &RoomId,
        message: Message,
        options: SendOptions,
    ) -> Result<Delivery> {
        if message.kind == MessageType::Action {
            let name = message.action_name().unwrap_or_default();
            if !protocol::is_valid_action(name) {
                return Err(Error::InvalidAction(name.to_owned()));
            }
        }
        if !self.rooms.exists(room_id).await? {
            return Err(Error::RoomNotFound(room_id.clone()));
        }
        let frame = protocol::encode(&message)?;

        let persist = match (&options.to, options.persist) {
            (_, Some(explicit)) => explicit,
            (None, None) => msg::should_persist(&message),
            (Some(_), None) => false,
        };
        if persist {
            self.messages
                .append(room_id, &message, options.from, None)
                .await?;
        }
        debug!(room = %room_id, kind = %message.kind, persist, to = ?options.to, "dispatch");

        let Some(peer_id) = options.to else {
            let recipients = self.transport.group_send(room_id, &frame).await;
            return Ok(Delivery::Broadcast { recipients });
        };

        let Some(handle) = self.registry.resolve_transport(room_id, &peer_id).await? else {
            debug!(room = %room_id, %peer_id, "target peer gone, dropping direct message");
            return Ok(Delivery::PeerGone);
        };
        if self.transport.send(&handle, &frame).await {
            Ok(Delivery::Direct)
        } else {
            debug!(room = %room_id, %peer_id, %handle, "transport closed, dropping direct message");
            Ok(Delivery::PeerGone)
        }
    }

    async fn describe(&self, membership: &Membership, peer_id: Option<PeerId>) -> Result<PeerDescriptor> {
        let participant = self.participants.get(membership.participant_id).await?;
        let name = membership.display_name(participant.as_ref().and_then(|p| p.name.as_deref()));
        let current_recording_id = self
            .recordings
            .latest_for(&membership.room_id, membership.participant_id)
            .await?
            .map(|recording| recording.id);

        Ok(PeerDescriptor {
            peer_id,
            uid: membership.participant_id,
            info: PeerInfo {
                name,
                role: membership.role,
                current_recording_id,
            },
        })
    }

    /// Memberships whose participant currently has a live peer.
    pub async fn connected_memberships(&self, room_id: &RoomId) -> Result<Vec<Membership>> {
        self.rooms.get(room_id).await?;
        let live = self.registry.live_participants(room_id).await?;
        Ok(self
            .memberships
            .list(room_id)
            .await?
            .into_iter()
            .filter(|m| live.contains(&m.participant_id))
            .collect())
    }

    /// Room snapshot for `participant`: itself plus every other member with its live peer id.
    pub async fn initial_data(&self, room_id: &RoomId, participant: ParticipantId) -> Result<InitialRoomData> {
        self.rooms.get(room_id).await?;

        let mut data = InitialRoomData {
            self_: None,
            members: Vec::new(),
        };
        for membership in self.memberships.list(room_id).await? {
            let peer_id = self.live_peer_of(room_id, membership.participant_id).await?;
            let descriptor = self.describe(&membership, peer_id).await?;
            if membership.participant_id == participant {
                data.self_ = Some(descriptor);
            } else {
                data.members.push(descriptor);
            }
        }
        Ok(data)
    }

    /// Sends the joining peer its initial room snapshot as a `join` message.
    pub async fn send_initial_data(
        &self,
        room_id: &RoomId,
        participant: ParticipantId,
        peer_id: &PeerId,
    ) -> Result<Delivery> {
        let data = self.initial_data(room_id, participant).await?;
        let message = Message::new(MessageType::Join, to_payload(MessageType::Join, &data)?);
        self.send(room_id, message, SendOptions::direct(peer_id.clone()))
            .await
    }
}

fn to_payload(kind: MessageType, value: &impl Serialize) -> Result<Value> {
    serde_json::to_value(value).map_err(|source| CodecError::Encoding { kind, source }.into())
}
