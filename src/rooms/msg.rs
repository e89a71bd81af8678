use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::{
    Result, db,
    ids::{ParticipantId, RoomId},
    protocol::{Message, MessageType},
};

/// High-frequency telemetry events that never reach the message log.
pub const TRANSIENT_EVENTS: [&str; 3] = ["recording_progress", "upload_progress", "meter_update"];

/// Whether a room-wide message is kept in the durable log.
pub fn should_persist(message: &Message) -> bool {
    use MessageType::*;
    match message.kind {
        Leave | Announce | Message => true,
        Join | Signalling | Action => false,
        Event => match message.event_type() {
            Some(event_type) => !TRANSIENT_EVENTS.contains(&event_type),
            None => true,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMessage {
    pub id: i64,
    pub room_id: RoomId,
    pub participant: Option<ParticipantId>,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    #[serde(with = "time::serde::timestamp")]
    pub timestamp: OffsetDateTime,
}

impl StoredMessage {
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_name(&self.kind)
    }
}

type MessageRow = (i64, String, Option<String>, String, String, i64);

fn from_row((id, room_id, participant, kind, payload, timestamp): MessageRow) -> Result<StoredMessage> {
    let payload = serde_json::from_str(&payload).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    Ok(StoredMessage {
        id,
        room_id: RoomId(room_id),
        participant: participant.as_deref().map(db::participant_id).transpose()?,
        kind,
        payload,
        timestamp: db::from_micros(timestamp),
    })
}

/// Append-only log of room events.
#[derive(Clone)]
pub struct MessageLog {
    db_pool: SqlitePool,
}

impl MessageLog {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn append(
        &self,
        room: &RoomId,
        message: &Message,
        from: Option<ParticipantId>,
        timestamp: Option<OffsetDateTime>,
    ) -> Result<StoredMessage> {
        let timestamp = timestamp.unwrap_or_else(db::now);
        let inserted = sqlx::query(
            "INSERT INTO messages (room_id,participant_id,type,payload,timestamp) VALUES (?,?,?,?,?)",
        )
        .bind(room.as_str())
        .bind(from.map(|p| p.to_string()))
        .bind(message.kind.name())
        .bind(message.payload.to_string())
        .bind(db::to_micros(timestamp))
        .execute(&self.db_pool)
        .await;
        let result = match inserted {
            Ok(result) => result,
            Err(err) => return Err(db::missing_reference(&self.db_pool, err, room, from).await),
        };

        Ok(StoredMessage {
            id: result.last_insert_rowid(),
            room_id: room.clone(),
            participant: from,
            kind: message.kind.name().to_owned(),
            payload: message.payload.clone(),
            timestamp: db::from_micros(db::to_micros(timestamp)),
        })
    }

    /// Newest first, strictly older than `until` when given.
    pub async fn list(
        &self,
        room: &RoomId,
        until: Option<OffsetDateTime>,
        limit: u32,
    ) -> Result<Vec<StoredMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id,room_id,participant_id,type,payload,timestamp FROM messages
             WHERE room_id=? AND timestamp < ?
             ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(room.as_str())
        .bind(until.map_or(i64::MAX, db::to_micros))
        .bind(limit)
        .fetch_all(&self.db_pool)
        .await?;
        rows.into_iter().map(from_row).collect()
    }

    pub async fn count(&self, room: &RoomId) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages WHERE room_id=?")
            .bind(room.as_str())
            .fetch_one(&self.db_pool)
            .await?;
        Ok(count)
    }
}
