use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS conversations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at TEXT NOT NULL,
        deleted_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS conversation_participants (
        conversation_id INTEGER NOT NULL REFERENCES conversations(id),
        user_id INTEGER NOT NULL,
        joined_at TEXT NOT NULL,
        left_at TEXT
    )",
    // unique: conversation_id, user_id while left_at is null
    "CREATE UNIQUE INDEX IF NOT EXISTS conversation_participants_active
        ON conversation_participants (conversation_id, user_id) WHERE left_at IS NULL",
    "CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        conversation_id INTEGER NOT NULL REFERENCES conversations(id),
        sender_id INTEGER NOT NULL,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS messages_by_conversation ON messages (conversation_id, id)",
];

/// Open a pool. An in-memory database lives only as long as its one connection,
/// so it is pinned to a single connection that never idles out.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqlitePoolOptions::new();
    let options = if database_url.contains(":memory:") {
        options
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        options.max_connections(max_connections)
    };

    options.connect(database_url).await
}

pub async fn init_schema(db_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(db_pool).await?;
    }
    tracing::debug!(tables = 3, "schema ready");
    Ok(())
}
