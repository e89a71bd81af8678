use std::str::FromStr;

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use time::OffsetDateTime;
use tracing::info;

use crate::{
    Error, Result,
    ids::{ParticipantId, RoomId},
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let db_pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    MIGRATOR.run(&db_pool).await?;
    info!(database_url, "database ready");
    Ok(db_pool)
}

/// A private in-memory database behind a single long-lived connection.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    MIGRATOR.run(&db_pool).await?;
    Ok(db_pool)
}

pub(crate) fn participant_id(raw: &str) -> Result<ParticipantId> {
    let id = uuid::Uuid::parse_str(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    Ok(ParticipantId(id))
}

/// Turns a foreign key failure on an insert into the reference that is missing.
///
/// Rows point at both a room and a participant, so the room is looked up
/// before blaming it.
pub(crate) async fn missing_reference(
    db_pool: &SqlitePool,
    err: sqlx::Error,
    room: &RoomId,
    participant: Option<ParticipantId>,
) -> Error {
    let is_fk = matches!(&err, sqlx::Error::Database(e) if e.is_foreign_key_violation());
    if !is_fk {
        return err.into();
    }

    let room_row: std::result::Result<Option<(i64,)>, sqlx::Error> =
        sqlx::query_as("SELECT 1 FROM rooms WHERE id=?")
            .bind(room.as_str())
            .fetch_optional(db_pool)
            .await;
    match (room_row, participant) {
        (Ok(None), _) => Error::RoomNotFound(room.clone()),
        (Ok(Some(_)), Some(participant)) => Error::ParticipantNotFound(participant),
        (Ok(Some(_)), None) => err.into(),
        (Err(lookup), _) => lookup.into(),
    }
}

// timestamps are stored as integer microseconds since the epoch, UTC

pub(crate) fn now() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    // truncate so a value survives the trip through the database unchanged
    from_micros(to_micros(now))
}

pub(crate) fn to_micros(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000) as i64
}

pub(crate) fn from_micros(micros: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(micros as i128 * 1_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
