use crate::{
    ids::{ParticipantId, RoomId},
    protocol::CodecError,
    registry::StoreError,
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("room {0} not found")]
    RoomNotFound(RoomId),

    #[error("participant {0} not found")]
    ParticipantNotFound(ParticipantId),

    #[error("action {0:?} is not allowed")]
    InvalidAction(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("durable store unavailable: {0}")]
    Database(#[from] sqlx::Error),

    #[error("ephemeral store unavailable: {0}")]
    Ephemeral(#[from] StoreError),

    #[error("no free room id after {0} attempts")]
    RoomIdExhausted(usize),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl Error {
    /// Backend failures the caller may retry with backoff.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Ephemeral(_))
    }
}
