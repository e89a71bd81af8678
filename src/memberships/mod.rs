//! Durable room membership.
//!
//! A membership is created the first time a participant joins a room and
//! is never deleted. Its role is fixed at creation.

use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use time::OffsetDateTime;

use crate::{
    Result, db,
    ids::{ParticipantId, RoomId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Guest,
}

impl Role {
    fn code(self) -> &'static str {
        match self {
            Role::Owner => "o",
            Role::Guest => "g",
        }
    }

    fn from_code(code: &str) -> Result<Role> {
        match code {
            "o" => Ok(Role::Owner),
            "g" => Ok(Role::Guest),
            other => Err(sqlx::Error::Decode(format!("unknown role {other:?}").into()).into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Membership {
    pub room_id: RoomId,
    pub participant_id: ParticipantId,
    /// Per-room override of the participant's name.
    pub name: Option<String>,
    pub role: Role,
    #[serde(with = "time::serde::timestamp")]
    pub joined: OffsetDateTime,
}

impl Membership {
    pub fn display_name(&self, participant_name: Option<&str>) -> Option<String> {
        self.name
            .as_deref()
            .or(participant_name)
            .map(str::to_owned)
    }
}

type MembershipRow = (String, String, Option<String>, String, i64);

const COLUMNS: &str = "room_id,participant_id,name,role,joined";

fn from_row((room_id, participant_id, name, role, joined): MembershipRow) -> Result<Membership> {
    Ok(Membership {
        room_id: RoomId(room_id),
        participant_id: db::participant_id(&participant_id)?,
        name,
        role: Role::from_code(&role)?,
        joined: db::from_micros(joined),
    })
}

/// Inserts a membership that must not exist yet. Used when creating a room.
pub(crate) async fn insert(
    conn: &mut SqliteConnection,
    room: &RoomId,
    participant: ParticipantId,
    role: Role,
    joined: OffsetDateTime,
) -> Result<()> {
    sqlx::query("INSERT INTO memberships (room_id,participant_id,name,role,joined) VALUES (?,?,NULL,?,?)")
        .bind(room.as_str())
        .bind(participant.to_string())
        .bind(role.code())
        .bind(db::to_micros(joined))
        .execute(conn)
        .await?;
    Ok(())
}

#[derive(Clone)]
pub struct MembershipStore {
    db_pool: SqlitePool,
}

impl MembershipStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    /// Returns the membership for (room, participant), creating it with `role` if there is none.
    ///
    /// Relies on the unique constraint: a concurrent insert for the same pair
    /// is absorbed and the row that won is returned. An existing row keeps its role.
    pub async fn get_or_create(
        &self,
        room: &RoomId,
        participant: ParticipantId,
        role: Role,
    ) -> Result<Membership> {
        let inserted = sqlx::query(
            "INSERT INTO memberships (room_id,participant_id,name,role,joined) VALUES (?,?,NULL,?,?)
             ON CONFLICT(room_id,participant_id) DO NOTHING",
        )
        .bind(room.as_str())
        .bind(participant.to_string())
        .bind(role.code())
        .bind(db::to_micros(db::now()))
        .execute(&self.db_pool)
        .await;
        if let Err(err) = inserted {
            return Err(db::missing_reference(&self.db_pool, err, room, Some(participant)).await);
        }

        let row: MembershipRow = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM memberships WHERE room_id=? AND participant_id=?"
        ))
        .bind(room.as_str())
        .bind(participant.to_string())
        .fetch_one(&self.db_pool)
        .await?;
        from_row(row)
    }

    pub async fn find(&self, room: &RoomId, participant: ParticipantId) -> Result<Option<Membership>> {
        let row: Option<MembershipRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM memberships WHERE room_id=? AND participant_id=?"
        ))
        .bind(room.as_str())
        .bind(participant.to_string())
        .fetch_optional(&self.db_pool)
        .await?;
        row.map(from_row).transpose()
    }

    /// All memberships of a room, oldest first.
    pub async fn list(&self, room: &RoomId) -> Result<Vec<Membership>> {
        let rows: Vec<MembershipRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM memberships WHERE room_id=? ORDER BY joined, rowid"
        ))
        .bind(room.as_str())
        .fetch_all(&self.db_pool)
        .await?;
        rows.into_iter().map(from_row).collect()
    }

    pub async fn set_display_name(
        &self,
        room: &RoomId,
        participant: ParticipantId,
        name: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE memberships SET name=? WHERE room_id=? AND participant_id=?")
            .bind(name)
            .bind(room.as_str())
            .bind(participant.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
