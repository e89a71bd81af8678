pub mod config;
pub mod db;
pub mod ids;
pub mod memberships;
pub mod participants;
pub mod protocol;
pub mod recordings;
pub mod registry;
pub mod rooms;
pub mod session;
pub mod transport;

mod appresult;
mod error;

use std::sync::Arc;

use axum::{Router, extract::FromRef};
use sqlx::SqlitePool;

pub use appresult::{AppError, AppResult};
pub use error::{Error, Result};

use registry::EphemeralStore;
use rooms::RoomEngine;
use transport::ChannelLayer;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub engine: Arc<RoomEngine>,
    pub channels: ChannelLayer,
}

impl AppState {
    /// Wires the engine to an in-process [`ChannelLayer`].
    pub fn new(db_pool: SqlitePool, ephemeral: Arc<dyn EphemeralStore>) -> Self {
        let channels = ChannelLayer::new();
        let engine = RoomEngine::new(db_pool, ephemeral, Arc::new(channels.clone()));
        Self {
            engine: Arc::new(engine),
            channels,
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().nest("/r", rooms::router())
}
