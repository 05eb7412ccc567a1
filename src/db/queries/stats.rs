use crate::db::DbPool;
use crate::db::models::StatRow;

pub async fn get_all(pool: &DbPool) -> Result<Vec<StatRow>, sqlx::Error> {
    sqlx::query_as::<_, StatRow>("SELECT * FROM library_stats ORDER BY key")
        .fetch_all(pool)
        .await
}

pub async fn get(pool: &DbPool, key: &str) -> Result<Option<StatRow>, sqlx::Error> {
    sqlx::query_as::<_, StatRow>("SELECT * FROM library_stats WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
}

pub async fn set(pool: &DbPool, key: &str, value: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO library_stats (key, value, updated_at) VALUES (?, ?, datetime('now')) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Set a statistic together with its window qualifier (the `new_books`
/// key carries the period in days).
pub async fn set_with_period(
    pool: &DbPool,
    key: &str,
    value: i64,
    period_days: u32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO library_stats (key, value, updated_at, period_days) \
         VALUES (?, ?, datetime('now'), ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, \
             updated_at = excluded.updated_at, period_days = excluded.period_days",
    )
    .bind(key)
    .bind(value)
    .bind(period_days as i64)
    .execute(pool)
    .await?;
    Ok(())
}
