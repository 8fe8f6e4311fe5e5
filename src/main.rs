use std::sync::Arc;

use murmur::{AppState, auth::JwtAuthenticator, config::Config, db, router, store::SqliteStore};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("murmur=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    tracing::info!("murmur v{} starting", env!("CARGO_PKG_VERSION"));
    if config.ephemeral_secret {
        tracing::warn!("JWT_SECRET not set, issued tokens will not survive a restart");
    }

    let db_pool = db::connect(&config.database_url, config.db_max_connections).await?;
    db::init_schema(&db_pool).await?;

    let (app_state, dispatcher) = AppState::new(
        Arc::new(SqliteStore::new(db_pool)),
        Arc::new(JwtAuthenticator::new(&config.jwt_secret)),
        config.dispatch_backlog_warn,
    );
    tokio::spawn(dispatcher.run());

    let app = router(app_state);
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!("listening on {}", config.bind_address);
    axum::serve(listener, app).await?;

    Ok(())
}
