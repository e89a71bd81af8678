mod engine;
mod info;
mod msg;
mod new;
mod presence;
mod room;
mod ws;

use axum::{
    Router,
    routing::{get, post},
};

pub use engine::{Delivery, InitialRoomData, PeerDescriptor, PeerInfo, RoomEngine, SendOptions};
pub use msg::{MessageLog, StoredMessage, TRANSIENT_EVENTS, should_persist};
pub use presence::{JoinPlan, PeerStep, Presence};
pub use room::{MAX_ID_ATTEMPTS, Room, RoomStore};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/new", post(new::new_room))
        .route("/{room_id}", get(info::room))
        .route("/{room_id}/messages", get(info::history))
        .route("/{room_id}/ws", get(ws::room_ws))
}
