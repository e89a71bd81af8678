//! Live peer bookkeeping per room.
//!
//! Key layout in the ephemeral store:
//! - `rooms:{room}:peers` hash, peer id -> participant id
//! - `rooms:{room}:peers:{peer}` hash, metadata key -> JSON value (the transport handle lives under `channel`)
//! - `rooms:{room}:participants:{participant}:peer_id` participant -> peer id
//!
//! Nothing here is authoritative. Wiping the store only forces connected
//! participants to join again.

mod store;

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

pub use store::{EphemeralStore, MemoryStore, StoreError, StoreResult};

use crate::ids::{ParticipantId, PeerId, RoomId, TransportHandle};

const CHANNEL_KEY: &str = "channel";

fn peers_key(room: &RoomId) -> String {
    format!("rooms:{room}:peers")
}

fn peer_data_key(room: &RoomId, peer_id: &PeerId) -> String {
    format!("rooms:{room}:peers:{peer_id}")
}

fn participant_key(room: &RoomId, participant: ParticipantId) -> String {
    format!("rooms:{room}:participants:{participant}:peer_id")
}

#[derive(Clone)]
pub struct PeerRegistry {
    store: Arc<dyn EphemeralStore>,
}

impl PeerRegistry {
    pub fn new(store: Arc<dyn EphemeralStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn EphemeralStore> {
        &self.store
    }

    pub async fn get_peer_id(
        &self,
        room: &RoomId,
        participant: ParticipantId,
    ) -> StoreResult<Option<PeerId>> {
        Ok(self
            .store
            .get(&participant_key(room, participant))
            .await?
            .map(PeerId))
    }

    /// Binds a fresh peer id to the participant, replacing any previous one.
    pub async fn assign_peer_id(
        &self,
        room: &RoomId,
        participant: ParticipantId,
    ) -> StoreResult<PeerId> {
        let peer_id = PeerId::generate();
        self.store
            .set(&participant_key(room, participant), peer_id.as_str())
            .await?;
        Ok(peer_id)
    }

    /// Returns the participant's current peer id, binding a fresh one if there is none.
    ///
    /// Concurrent claims for the same participant all get the same id.
    pub async fn claim_peer_id(
        &self,
        room: &RoomId,
        participant: ParticipantId,
    ) -> StoreResult<PeerId> {
        let fresh = PeerId::generate();
        let stored = self
            .store
            .set_if_absent(&participant_key(room, participant), fresh.as_str())
            .await?;
        Ok(PeerId(stored))
    }

    /// Binds the peer to `handle`. Returns the handle this replaced, if any.
    ///
    /// The swap is atomic, so of several racing connects for one peer each
    /// displaced handle is reported to exactly one caller.
    pub async fn connect(
        &self,
        room: &RoomId,
        peer_id: &PeerId,
        handle: &TransportHandle,
        participant: ParticipantId,
    ) -> StoreResult<Option<TransportHandle>> {
        self.store
            .hset(&peers_key(room), peer_id.as_str(), &participant.to_string())
            .await?;
        self.store
            .set(&participant_key(room, participant), peer_id.as_str())
            .await?;
        let replaced = self
            .set_metadata(room, peer_id, CHANNEL_KEY, &Value::from(handle.as_str()))
            .await?;
        debug!(%room, %peer_id, %handle, "peer connected");
        Ok(replaced
            .as_ref()
            .and_then(Value::as_str)
            .map(TransportHandle::from)
            .filter(|previous| previous != handle))
    }

    /// Removes every record of the peer. Returns the participant it belonged to, if it was live.
    pub async fn disconnect(
        &self,
        room: &RoomId,
        peer_id: &PeerId,
    ) -> StoreResult<Option<ParticipantId>> {
        let removed = self.store.hdel(&peers_key(room), peer_id.as_str()).await?;
        self.store.delete(&peer_data_key(room, peer_id)).await?;

        let participant = removed.and_then(|p| Uuid::parse_str(&p).ok()).map(ParticipantId);
        if let Some(participant) = participant {
            self.store
                .delete_if_eq(&participant_key(room, participant), peer_id.as_str())
                .await?;
            debug!(%room, %peer_id, "peer disconnected");
        }
        Ok(participant)
    }

    pub async fn set_metadata(
        &self,
        room: &RoomId,
        peer_id: &PeerId,
        key: &str,
        value: &Value,
    ) -> StoreResult<Option<Value>> {
        let previous = self
            .store
            .hset(&peer_data_key(room, peer_id), key, &value.to_string())
            .await?;
        Ok(previous.and_then(|raw| serde_json::from_str(&raw).ok()))
    }

    pub async fn get_metadata(
        &self,
        room: &RoomId,
        peer_id: &PeerId,
        key: &str,
    ) -> StoreResult<Option<Value>> {
        let raw = self.store.hget(&peer_data_key(room, peer_id), key).await?;
        Ok(raw.and_then(|raw| serde_json::from_str(&raw).ok()))
    }

    pub async fn participant_for(
        &self,
        room: &RoomId,
        peer_id: &PeerId,
    ) -> StoreResult<Option<ParticipantId>> {
        let raw = self.store.hget(&peers_key(room), peer_id.as_str()).await?;
        Ok(raw.and_then(|p| Uuid::parse_str(&p).ok()).map(ParticipantId))
    }

    pub async fn is_live(&self, room: &RoomId, peer_id: &PeerId) -> StoreResult<bool> {
        Ok(self.participant_for(room, peer_id).await?.is_some())
    }

    pub async fn list_live_peers(&self, room: &RoomId) -> StoreResult<HashSet<PeerId>> {
        let keys = self.store.hkeys(&peers_key(room)).await?;
        Ok(keys.into_iter().map(PeerId).collect())
    }

    /// Participants that currently have a live peer in the room.
    pub async fn live_participants(&self, room: &RoomId) -> StoreResult<HashSet<ParticipantId>> {
        let vals = self.store.hvals(&peers_key(room)).await?;
        Ok(vals
            .iter()
            .filter_map(|p| Uuid::parse_str(p).ok())
            .map(ParticipantId)
            .collect())
    }

    /// `None` means the peer has gone away, which is not an error.
    pub async fn resolve_transport(
        &self,
        room: &RoomId,
        peer_id: &PeerId,
    ) -> StoreResult<Option<TransportHandle>> {
        if !self.is_live(room, peer_id).await? {
            return Ok(None);
        }
        let handle = self.get_metadata(room, peer_id, CHANNEL_KEY).await?;
        Ok(handle
            .as_ref()
            .and_then(Value::as_str)
            .map(TransportHandle::from))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn registry() -> PeerRegistry {
        PeerRegistry::new(Arc::new(MemoryStore::new()))
    }

    fn room() -> RoomId {
        RoomId::from("abc123")
    }

    #[tokio::test]
    async fn connect_then_resolve() {
        let reg = registry();
        let alice = ParticipantId::new();
        let peer = reg.assign_peer_id(&room(), alice).await.unwrap();
        assert_eq!(reg.get_peer_id(&room(), alice).await.unwrap(), Some(peer.clone()));

        // assigned but not yet connected
        assert_eq!(reg.resolve_transport(&room(), &peer).await.unwrap(), None);

        let handle = TransportHandle::from("conn.1");
        reg.connect(&room(), &peer, &handle, alice).await.unwrap();
        assert_eq!(reg.resolve_transport(&room(), &peer).await.unwrap(), Some(handle));
        assert_eq!(reg.participant_for(&room(), &peer).await.unwrap(), Some(alice));
        assert!(reg.list_live_peers(&room()).await.unwrap().contains(&peer));
    }

    #[tokio::test]
    async fn reconnect_last_write_wins() {
        let reg = registry();
        let alice = ParticipantId::new();
        let peer = reg.claim_peer_id(&room(), alice).await.unwrap();
        assert_eq!(reg.connect(&room(), &peer, &"conn.1".into(), alice).await.unwrap(), None);
        assert_eq!(
            reg.connect(&room(), &peer, &"conn.2".into(), alice).await.unwrap(),
            Some(TransportHandle::from("conn.1"))
        );
        // same handle again replaces nothing
        assert_eq!(reg.connect(&room(), &peer, &"conn.2".into(), alice).await.unwrap(), None);

        assert_eq!(
            reg.resolve_transport(&room(), &peer).await.unwrap(),
            Some(TransportHandle::from("conn.2"))
        );
        assert_eq!(reg.list_live_peers(&room()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn claim_reuses_bound_id() {
        let reg = registry();
        let alice = ParticipantId::new();
        let first = reg.claim_peer_id(&room(), alice).await.unwrap();
        let second = reg.claim_peer_id(&room(), alice).await.unwrap();
        assert_eq!(first, second);

        let replaced = reg.assign_peer_id(&room(), alice).await.unwrap();
        assert_ne!(first, replaced);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let reg = registry();
        let alice = ParticipantId::new();
        let peer = reg.claim_peer_id(&room(), alice).await.unwrap();
        reg.connect(&room(), &peer, &"conn.1".into(), alice).await.unwrap();
        reg.set_metadata(&room(), &peer, "status", &json!({"recorder": "ready"}))
            .await
            .unwrap();

        assert_eq!(reg.disconnect(&room(), &peer).await.unwrap(), Some(alice));
        assert_eq!(reg.disconnect(&room(), &peer).await.unwrap(), None);

        assert_eq!(reg.get_peer_id(&room(), alice).await.unwrap(), None);
        assert_eq!(reg.get_metadata(&room(), &peer, "status").await.unwrap(), None);
        assert_eq!(reg.resolve_transport(&room(), &peer).await.unwrap(), None);
        assert!(reg.list_live_peers(&room()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn disconnect_keeps_newer_binding() {
        let reg = registry();
        let alice = ParticipantId::new();
        let old = reg.claim_peer_id(&room(), alice).await.unwrap();
        reg.connect(&room(), &old, &"conn.1".into(), alice).await.unwrap();

        let new = reg.assign_peer_id(&room(), alice).await.unwrap();
        reg.connect(&room(), &new, &"conn.2".into(), alice).await.unwrap();
        reg.disconnect(&room(), &old).await.unwrap();

        assert_eq!(reg.get_peer_id(&room(), alice).await.unwrap(), Some(new));
    }

    #[tokio::test]
    async fn metadata_roundtrip() {
        let reg = registry();
        let peer = PeerId::generate();
        reg.set_metadata(&room(), &peer, "resources", &json!({"audio": true}))
            .await
            .unwrap();
        assert_eq!(
            reg.get_metadata(&room(), &peer, "resources").await.unwrap(),
            Some(json!({"audio": true}))
        );
        assert_eq!(reg.get_metadata(&room(), &peer, "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let reg = registry();
        let alice = ParticipantId::new();
        let other = RoomId::from("zzz999");
        let peer = reg.claim_peer_id(&room(), alice).await.unwrap();
        reg.connect(&room(), &peer, &"conn.1".into(), alice).await.unwrap();

        assert!(reg.list_live_peers(&other).await.unwrap().is_empty());
        assert_eq!(reg.get_peer_id(&other, alice).await.unwrap(), None);
    }

    #[tokio::test]
    async fn wipe_forgets_everyone() {
        let reg = registry();
        let alice = ParticipantId::new();
        let peer = reg.claim_peer_id(&room(), alice).await.unwrap();
        reg.connect(&room(), &peer, &"conn.1".into(), alice).await.unwrap();

        reg.store().flush().await.unwrap();
        assert!(reg.list_live_peers(&room()).await.unwrap().is_empty());
        assert_eq!(reg.get_peer_id(&room(), alice).await.unwrap(), None);
    }
}
