use std::sync::Arc;

use axum::{Json, debug_handler, extract::State, http::StatusCode};
use serde::Serialize;
use tower_sessions::Session;

use super::RoomEngine;
use crate::{
    AppResult,
    ids::{ParticipantId, RoomId},
    session,
};

#[derive(Debug, Serialize)]
pub(crate) struct NewRoom {
    room_id: RoomId,
    owner: ParticipantId,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn new_room(
    State(engine): State<Arc<RoomEngine>>,
    session: Session,
) -> AppResult<(StatusCode, Json<NewRoom>)> {
    let owner = session::participant(&session, engine.participants()).await?;
    let room_id = engine.create_room(owner.id).await?;

    Ok((
        StatusCode::CREATED,
        Json(NewRoom {
            room_id,
            owner: owner.id,
        }),
    ))
}
