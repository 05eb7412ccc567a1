use chrono::{DateTime, Utc};

use crate::db::DbPool;
use crate::db::models::DownloadRow;

/// Append a download/read event and stamp the book's last-download date.
pub async fn record(
    pool: &DbPool,
    book_id: &str,
    kind: &str,
    format: Option<&str>,
    client: Option<&str>,
) -> Result<(), sqlx::Error> {
    let now: DateTime<Utc> = Utc::now();
    sqlx::query("INSERT INTO downloads (book_id, ts, kind, format, client) VALUES (?, ?, ?, ?, ?)")
        .bind(book_id)
        .bind(now)
        .bind(kind)
        .bind(format)
        .bind(client)
        .execute(pool)
        .await?;
    sqlx::query("UPDATE books SET last_download_date = ? WHERE id = ?")
        .bind(now)
        .bind(book_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_for_book(pool: &DbPool, book_id: &str) -> Result<Vec<DownloadRow>, sqlx::Error> {
    sqlx::query_as::<_, DownloadRow>(
        "SELECT * FROM downloads WHERE book_id = ? ORDER BY ts DESC",
    )
    .bind(book_id)
    .fetch_all(pool)
    .await
}

pub async fn count(pool: &DbPool) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM downloads")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
