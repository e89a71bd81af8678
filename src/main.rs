use std::sync::Arc;

use fireside::{AppState, config::Config, db, registry::MemoryStore};
use tower_sessions::{Expiry, SessionManagerLayer, cookie::SameSite};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fireside=info")),
        )
        .init();

    let config = Config::from_env()?;

    let session_store = tower_sessions::MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(config.session_idle));

    let db_pool = db::connect(&config.database_url, config.db_max_connections).await?;
    let app_state = AppState::new(db_pool, Arc::new(MemoryStore::new()));
    if config.flush_ephemeral_on_start {
        app_state.engine.flush_ephemeral().await?;
    }

    let app = fireside::router()
        .with_state(app_state)
        .layer(session_layer);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
