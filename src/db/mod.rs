pub mod models;
pub mod queries;
pub mod schema;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::genres::GenreTree;

/// Type alias for the database pool. All query modules take this instead of
/// a concrete pool type.
pub type DbPool = SqlitePool;

/// Open (creating if missing) the library database, apply the tuning
/// pragmas, and bring the schema up to date.
pub async fn create_pool(path: &str, taxonomy: &GenreTree) -> Result<DbPool, sqlx::Error> {
    let options = connect_options(path)?;
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    schema::init(&pool, taxonomy).await?;
    info!("Database initialized: {path}");
    Ok(pool)
}

fn connect_options(path: &str) -> Result<SqliteConnectOptions, sqlx::Error> {
    // page_size must be set before the database file is first written;
    // the remaining pragmas are applied on every new connection.
    Ok(SqliteConnectOptions::from_str(path)?
        .create_if_missing(true)
        .page_size(4096)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(10))
        .foreign_keys(true)
        .pragma("cache_size", "-65536")
        .pragma("mmap_size", "268435456"))
}

/// Lightweight liveness probe used by the keep-alive task.
pub async fn ping(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Re-apply the per-database pragmas after a keep-alive failure; the pool
/// reconnects on its own, but a fresh database handle may have lost WAL.
pub async fn reapply_pragmas(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;
    sqlx::query("PRAGMA synchronous=NORMAL").execute(pool).await?;
    Ok(())
}

/// Relax durability for a bulk load on a single connection. Must be paired
/// with `restore_bulk_pragmas` on every exit path.
pub async fn apply_bulk_pragmas(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query("PRAGMA synchronous=OFF").execute(&mut *conn).await?;
    sqlx::query("PRAGMA journal_mode=MEMORY")
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn restore_bulk_pragmas(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query("PRAGMA journal_mode=WAL").execute(&mut *conn).await?;
    sqlx::query("PRAGMA synchronous=NORMAL")
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Create an in-memory pool for testing, with the full schema applied.
/// A single connection keeps the in-memory database alive for the pool's
/// lifetime.
pub async fn create_test_pool() -> DbPool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("memory options")
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .expect("Failed to create test pool");

    schema::init(&pool, &GenreTree::load_embedded())
        .await
        .expect("Failed to initialize schema");

    pool
}
