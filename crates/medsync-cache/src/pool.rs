//! SQLite pool for the local store
//!
//! File databases run in WAL mode so UI reads never wait on a sync cycle.
//! The schema is versioned through `PRAGMA user_version`; opening a
//! database applies every migration newer than the stored version.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::{debug, info};

use crate::CacheError;

/// Ordered schema migrations, `(version, sql)`
const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("migrations/20260901_initial.sql"))];

/// Readers share the pool; writes are serialised by the store itself
const FILE_MAX_CONNECTIONS: u32 = 5;

/// How long a connection waits on a locked database
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Owner of the SQLite connections behind [`SqliteLocalStore`](crate::SqliteLocalStore)
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Opens (or creates) the database file at `db_path` and migrates it
    ///
    /// Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// `CacheError::ConnectionFailed` if the file cannot be opened,
    /// `CacheError::MigrationFailed` if the schema cannot be applied.
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "cannot create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(FILE_MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!("cannot open {}: {}", db_path.display(), e))
            })?;

        let version = Self::migrate(&pool).await?;
        info!(path = %db_path.display(), schema_version = version, "Local store opened");
        Ok(Self { pool })
    }

    /// Opens a private in-memory database
    ///
    /// The pool holds exactly one connection that is never recycled: an
    /// in-memory database lives and dies with its connection.
    pub async fn in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| CacheError::ConnectionFailed(format!("in-memory database: {}", e)))?;

        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Schema version currently recorded in the database
    pub async fn schema_version(&self) -> Result<i64, CacheError> {
        Self::read_version(&self.pool).await
    }

    async fn read_version(pool: &SqlitePool) -> Result<i64, CacheError> {
        sqlx::query_scalar::<_, i64>("PRAGMA user_version")
            .fetch_one(pool)
            .await
            .map_err(|e| CacheError::MigrationFailed(format!("cannot read schema version: {}", e)))
    }

    /// Applies pending migrations, returning the resulting version
    async fn migrate(pool: &SqlitePool) -> Result<i64, CacheError> {
        let stored = Self::read_version(pool).await?;
        let mut current = stored;

        for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > stored) {
            sqlx::raw_sql(sql).execute(pool).await.map_err(|e| {
                CacheError::MigrationFailed(format!("migration {} failed: {}", version, e))
            })?;
            // PRAGMA does not accept bound parameters
            sqlx::raw_sql(&format!("PRAGMA user_version = {}", version))
                .execute(pool)
                .await
                .map_err(|e| {
                    CacheError::MigrationFailed(format!("cannot record version {}: {}", version, e))
                })?;
            debug!(version, "Applied schema migration");
            current = *version;
        }

        Ok(current)
    }
}
