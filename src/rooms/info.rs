use std::sync::Arc;

use axum::{
    Json, debug_handler,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{Room, RoomEngine, StoredMessage};
use crate::{AppResult, ids::RoomId, memberships::Membership};

const DEFAULT_HISTORY: u32 = 50;
const MAX_HISTORY: u32 = 500;

#[derive(Debug, Serialize)]
pub(crate) struct RoomInfo {
    room: Room,
    connected: Vec<Membership>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn room(
    Path(room_id): Path<String>,
    State(engine): State<Arc<RoomEngine>>,
) -> AppResult<Json<RoomInfo>> {
    let room_id = RoomId(room_id);
    let room = engine.rooms().get(&room_id).await?;
    let connected = engine.connected_memberships(&room_id).await?;

    Ok(Json(RoomInfo { room, connected }))
}

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryQuery {
    /// Unix seconds; only messages strictly older are returned.
    until: Option<i64>,
    limit: Option<u32>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn history(
    Path(room_id): Path<String>,
    Query(HistoryQuery { until, limit }): Query<HistoryQuery>,
    State(engine): State<Arc<RoomEngine>>,
) -> AppResult<Json<Vec<StoredMessage>>> {
    let room_id = RoomId(room_id);
    engine.rooms().get(&room_id).await?;

    let until = until.map(OffsetDateTime::from_unix_timestamp).transpose()?;
    let limit = limit.unwrap_or(DEFAULT_HISTORY).min(MAX_HISTORY);
    Ok(Json(engine.messages().list(&room_id, until, limit).await?))
}
