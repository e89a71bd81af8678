//! Metadata for finished recordings. Rows are written once and never changed.

use serde::Serialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::{
    Result, db,
    ids::{ParticipantId, RoomId},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recording {
    pub id: Uuid,
    pub room_id: RoomId,
    pub participant: ParticipantId,
    /// Codec or mime type, e.g. `audio/wav`.
    #[serde(rename = "type")]
    pub kind: String,
    pub filesize: u32,
    pub duration: u32,
    #[serde(with = "time::serde::timestamp")]
    pub created: OffsetDateTime,
}

type RecordingRow = (String, String, String, String, u32, u32, i64);

const COLUMNS: &str = "id,room_id,participant_id,type,filesize,duration,created";

fn from_row((id, room_id, participant, kind, filesize, duration, created): RecordingRow) -> Result<Recording> {
    Ok(Recording {
        id: Uuid::parse_str(&id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        room_id: RoomId(room_id),
        participant: db::participant_id(&participant)?,
        kind,
        filesize,
        duration,
        created: db::from_micros(created),
    })
}

#[derive(Clone)]
pub struct RecordingStore {
    db_pool: SqlitePool,
}

impl RecordingStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn record(
        &self,
        room: &RoomId,
        participant: ParticipantId,
        kind: &str,
        filesize: u32,
        duration: u32,
    ) -> Result<Recording> {
        let recording = Recording {
            id: Uuid::new_v4(),
            room_id: room.clone(),
            participant,
            kind: kind.to_owned(),
            filesize,
            duration,
            created: db::now(),
        };

        let inserted = sqlx::query(&format!("INSERT INTO recordings ({COLUMNS}) VALUES (?,?,?,?,?,?,?)"))
            .bind(recording.id.to_string())
            .bind(room.as_str())
            .bind(participant.to_string())
            .bind(kind)
            .bind(filesize)
            .bind(duration)
            .bind(db::to_micros(recording.created))
            .execute(&self.db_pool)
            .await;
        if let Err(err) = inserted {
            return Err(db::missing_reference(&self.db_pool, err, room, Some(participant)).await);
        }

        info!(%room, %participant, recording = %recording.id, filesize, duration, "recording stored");
        Ok(recording)
    }

    /// Most recent recording; ties on `created` go to the later insert.
    pub async fn latest_for(&self, room: &RoomId, participant: ParticipantId) -> Result<Option<Recording>> {
        let row: Option<RecordingRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM recordings WHERE room_id=? AND participant_id=?
             ORDER BY created DESC, rowid DESC LIMIT 1"
        ))
        .bind(room.as_str())
        .bind(participant.to_string())
        .fetch_optional(&self.db_pool)
        .await?;
        row.map(from_row).transpose()
    }

    pub async fn list_for_room(&self, room: &RoomId) -> Result<Vec<Recording>> {
        let rows: Vec<RecordingRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM recordings WHERE room_id=? ORDER BY created, rowid"
        ))
        .bind(room.as_str())
        .fetch_all(&self.db_pool)
        .await?;
        rows.into_iter().map(from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, participants::ParticipantStore, rooms::RoomStore};

    async fn setup() -> (RecordingStore, SqlitePool, RoomId, ParticipantId) {
        let db_pool = db::connect_in_memory().await.unwrap();
        let ana = ParticipantStore::new(db_pool.clone()).create(Some("Ana")).await.unwrap();
        let room = RoomStore::new(db_pool.clone()).create_with_owner(ana.id).await.unwrap();
        (RecordingStore::new(db_pool.clone()), db_pool, room.id, ana.id)
    }

    #[tokio::test]
    async fn record_and_fetch_latest() {
        let (store, _, room, ana) = setup().await;
        assert_eq!(store.latest_for(&room, ana).await.unwrap(), None);

        let first = store.record(&room, ana, "audio/wav", 1856, 12).await.unwrap();
        let second = store.record(&room, ana, "audio/wav", 5552, 30).await.unwrap();

        assert_eq!(store.latest_for(&room, ana).await.unwrap(), Some(second.clone()));
        assert_eq!(store.list_for_room(&room).await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn latest_breaks_timestamp_ties_by_insertion() {
        let (store, db_pool, room, ana) = setup().await;
        let a = store.record(&room, ana, "audio/wav", 1, 1).await.unwrap();
        let b = store.record(&room, ana, "audio/ogg", 2, 2).await.unwrap();

        // force identical timestamps
        sqlx::query("UPDATE recordings SET created=?")
            .bind(db::to_micros(a.created))
            .execute(&db_pool)
            .await
            .unwrap();

        let latest = store.latest_for(&room, ana).await.unwrap().unwrap();
        assert_eq!(latest.id, b.id);
    }

    #[tokio::test]
    async fn latest_is_per_participant() {
        let (store, db_pool, room, ana) = setup().await;
        let bob = ParticipantStore::new(db_pool).create(Some("Bob")).await.unwrap();
        let mine = store.record(&room, ana, "audio/wav", 10, 1).await.unwrap();
        store.record(&room, bob.id, "audio/wav", 20, 2).await.unwrap();

        assert_eq!(store.latest_for(&room, ana).await.unwrap(), Some(mine));
    }

    #[tokio::test]
    async fn unknown_room() {
        let (store, _, _, ana) = setup().await;
        let err = store
            .record(&RoomId::from("nope00"), ana, "audio/wav", 1, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RoomNotFound(_)));
    }

    #[tokio::test]
    async fn unknown_participant() {
        let (store, _, room, _) = setup().await;
        let ghost = ParticipantId::new();
        let err = store
            .record(&room, ghost, "audio/wav", 1, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ParticipantNotFound(p) if p == ghost));
    }
}
