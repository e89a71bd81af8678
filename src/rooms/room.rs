use serde::Serialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::{
    Error, Result, db,
    ids::{ParticipantId, RoomId},
    memberships::{self, Role},
};

/// Generation attempts before giving up on finding a free room id.
pub const MAX_ID_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Room {
    pub id: RoomId,
    pub owner: ParticipantId,
    #[serde(with = "time::serde::timestamp")]
    pub created: OffsetDateTime,
}

#[derive(Clone)]
pub struct RoomStore {
    db_pool: SqlitePool,
}

impl RoomStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    /// Creates the room together with its owner membership.
    pub async fn create_with_owner(&self, owner: ParticipantId) -> Result<Room> {
        self.create_with_ids(owner, RoomId::generate).await
    }

    pub(crate) async fn create_with_ids(
        &self,
        owner: ParticipantId,
        mut next_id: impl FnMut() -> RoomId,
    ) -> Result<Room> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let room = Room {
                id: next_id(),
                owner,
                created: db::now(),
            };

            let mut tx = self.db_pool.begin().await?;
            let inserted = sqlx::query("INSERT INTO rooms (id,owner_id,created) VALUES (?,?,?)")
                .bind(room.id.as_str())
                .bind(owner.to_string())
                .bind(db::to_micros(room.created))
                .execute(&mut *tx)
                .await;

            match inserted {
                Ok(_) => {}
                Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                    return Err(Error::ParticipantNotFound(owner));
                }
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                    debug!(room = %room.id, "room id taken, generating another");
                    tx.rollback().await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            memberships::insert(&mut *tx, &room.id, owner, Role::Owner, room.created).await?;
            tx.commit().await?;

            info!(room = %room.id, %owner, "room created");
            return Ok(room);
        }
        Err(Error::RoomIdExhausted(MAX_ID_ATTEMPTS))
    }

    pub async fn find(&self, id: &RoomId) -> Result<Option<Room>> {
        let row: Option<(String, String, i64)> =
            sqlx::query_as("SELECT id,owner_id,created FROM rooms WHERE id=?")
                .bind(id.as_str())
                .fetch_optional(&self.db_pool)
                .await?;

        let Some((id, owner, created)) = row else {
            return Ok(None);
        };
        Ok(Some(Room {
            id: RoomId(id),
            owner: db::participant_id(&owner)?,
            created: db::from_micros(created),
        }))
    }

    pub async fn get(&self, id: &RoomId) -> Result<Room> {
        self.find(id)
            .await?
            .ok_or_else(|| Error::RoomNotFound(id.clone()))
    }

    pub async fn exists(&self, id: &RoomId) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM rooms WHERE id=?")
            .bind(id.as_str())
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(row.is_some())
    }
}
