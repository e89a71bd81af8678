//! Broadcast and direct-send facility.
//!
//! The engine only ever talks to [`Transport`]. [`ChannelLayer`] is the
//! in-process implementation the host binary and the tests use: one
//! unbounded queue per connection, so a slow reader never holds up a
//! broadcast and each connection sees frames in send order.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;

use crate::ids::{RoomId, TransportHandle};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn group_add(&self, room: &RoomId, handle: &TransportHandle);
    async fn group_discard(&self, room: &RoomId, handle: &TransportHandle);
    /// Delivers to every handle in the room's group. Returns how many accepted the frame.
    async fn group_send(&self, room: &RoomId, frame: &str) -> usize;
    /// Returns false when the handle is gone.
    async fn send(&self, handle: &TransportHandle, frame: &str) -> bool;
}

#[derive(Clone, Default)]
pub struct ChannelLayer {
    channels: Arc<DashMap<TransportHandle, mpsc::UnboundedSender<String>>>,
    groups: Arc<DashMap<RoomId, HashSet<TransportHandle>>>,
}

impl ChannelLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a queue for a new connection.
    pub fn register(&self, handle: TransportHandle) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.insert(handle, tx);
        rx
    }

    pub fn unregister(&self, handle: &TransportHandle) {
        self.channels.remove(handle);
    }

    pub fn group_len(&self, room: &RoomId) -> usize {
        self.groups.get(room).map_or(0, |g| g.len())
    }
}

#[async_trait]
impl Transport for ChannelLayer {
    async fn group_add(&self, room: &RoomId, handle: &TransportHandle) {
        self.groups
            .entry(room.clone())
            .or_default()
            .insert(handle.clone());
    }

    async fn group_discard(&self, room: &RoomId, handle: &TransportHandle) {
        if let Some(mut group) = self.groups.get_mut(room) {
            group.remove(handle);
        }
        self.groups.remove_if(room, |_, group| group.is_empty());
    }

    async fn group_send(&self, room: &RoomId, frame: &str) -> usize {
        // snapshot so no shard lock is held while sending
        let audience: Vec<TransportHandle> = self
            .groups
            .get(room)
            .map(|g| g.iter().cloned().collect())
            .unwrap_or_default();

        let mut delivered = 0;
        for handle in &audience {
            if self.send(handle, frame).await {
                delivered += 1;
            } else {
                warn!(%room, %handle, "dropping frame for closed connection");
            }
        }
        delivered
    }

    async fn send(&self, handle: &TransportHandle, frame: &str) -> bool {
        let Some(tx) = self.channels.get(handle).map(|tx| tx.clone()) else {
            return false;
        };
        tx.send(frame.to_owned()).is_ok()
    }
}
