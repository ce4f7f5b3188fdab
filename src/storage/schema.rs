use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Persistence failure. Fatal for the current cycle's commit only: the
/// in-memory merge is discarded and the feed is retried unchanged at the
/// next cycle.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection pool and run migrations.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to
        // release before returning SQLITE_BUSY, which absorbs transient
        // contention between concurrent feed commits.
        let options = SqliteConnectOptions::from_str(&url)?.pragma("busy_timeout", "5000");

        // An in-memory database exists per connection, so the pool must
        // not open a second one.
        let max_connections = if path == ":memory:" { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Run schema migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<(), StoreError> {
        // Per-connection setting, must be outside the transaction
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                name TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                link TEXT NOT NULL,
                language TEXT NOT NULL,
                description TEXT NOT NULL,
                image TEXT NOT NULL,
                last_build_date TEXT
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                feed_name TEXT NOT NULL REFERENCES feeds(name) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                url TEXT NOT NULL,
                PRIMARY KEY (feed_name, url)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS episodes (
                id INTEGER PRIMARY KEY,
                feed_name TEXT NOT NULL REFERENCES feeds(name) ON DELETE CASCADE,
                title TEXT NOT NULL,
                link TEXT NOT NULL,
                enclosure_length TEXT NOT NULL,
                enclosure_type TEXT NOT NULL,
                enclosure_url TEXT NOT NULL,
                published TEXT,
                description TEXT NOT NULL,
                duration TEXT NOT NULL,
                image TEXT NOT NULL,
                author TEXT NOT NULL,
                UNIQUE (feed_name, title, link)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_episodes_feed ON episodes(feed_name)")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_episodes_published ON episodes(published DESC)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
