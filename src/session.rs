use tower_sessions::Session;
use uuid::Uuid;

use crate::{
    AppResult,
    participants::{Participant, ParticipantStore},
};

pub const SESSION_KEY: &str = "session_key";
pub const DISPLAY_NAME: &str = "display_name";

/// The participant bound to this browser session, created on first request.
pub async fn participant(session: &Session, participants: &ParticipantStore) -> AppResult<Participant> {
    let key = match session.get::<String>(SESSION_KEY).await? {
        Some(key) => key,
        None => {
            let key = Uuid::new_v4().simple().to_string();
            session.insert(SESSION_KEY, &key).await?;
            key
        }
    };
    let name = session.get::<String>(DISPLAY_NAME).await?;

    Ok(participants.resolve_session(&key, name.as_deref()).await?)
}
