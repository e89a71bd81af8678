use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;

use crate::{Result, db, ids::ParticipantId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub session_key: Option<String>,
    pub name: Option<String>,
}

type ParticipantRow = (String, Option<String>, Option<String>);

fn from_row((id, session_key, name): ParticipantRow) -> Result<Participant> {
    Ok(Participant {
        id: db::participant_id(&id)?,
        session_key,
        name,
    })
}

#[derive(Clone)]
pub struct ParticipantStore {
    db_pool: SqlitePool,
}

impl ParticipantStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn create(&self, name: Option<&str>) -> Result<Participant> {
        let id = ParticipantId::new();
        sqlx::query("INSERT INTO participants (id,session_key,name) VALUES (?,NULL,?)")
            .bind(id.to_string())
            .bind(name)
            .execute(&self.db_pool)
            .await?;

        info!(participant = %id, "participant created");
        Ok(Participant {
            id,
            session_key: None,
            name: name.map(str::to_owned),
        })
    }

    pub async fn get(&self, id: ParticipantId) -> Result<Option<Participant>> {
        let row: Option<ParticipantRow> =
            sqlx::query_as("SELECT id,session_key,name FROM participants WHERE id=?")
                .bind(id.to_string())
                .fetch_optional(&self.db_pool)
                .await?;
        row.map(from_row).transpose()
    }

    /// Participant bound to a browser session, created on first sight.
    pub async fn resolve_session(&self, session_key: &str, name: Option<&str>) -> Result<Participant> {
        sqlx::query(
            "INSERT INTO participants (id,session_key,name) VALUES (?,?,?)
             ON CONFLICT(session_key) DO NOTHING",
        )
        .bind(ParticipantId::new().to_string())
        .bind(session_key)
        .bind(name)
        .execute(&self.db_pool)
        .await?;

        let row: ParticipantRow =
            sqlx::query_as("SELECT id,session_key,name FROM participants WHERE session_key=?")
                .bind(session_key)
                .fetch_one(&self.db_pool)
                .await?;
        from_row(row)
    }

    pub async fn rename(&self, id: ParticipantId, name: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE participants SET name=? WHERE id=?")
            .bind(name)
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }
}
