use sqlx::SqliteConnection;

use crate::db::DbPool;
use crate::db::models::GenreRow;
use crate::genres::MAIN_TAG_PREFIX;

pub async fn get_by_tag(pool: &DbPool, tag: &str) -> Result<Option<GenreRow>, sqlx::Error> {
    sqlx::query_as::<_, GenreRow>("SELECT * FROM genres WHERE tag = ?")
        .bind(tag)
        .fetch_optional(pool)
        .await
}

/// All taggable subgenres (parent pseudo-rows excluded).
pub async fn get_all(pool: &DbPool) -> Result<Vec<GenreRow>, sqlx::Error> {
    sqlx::query_as::<_, GenreRow>(
        "SELECT * FROM genres WHERE substr(tag, 1, 6) <> ? ORDER BY parent, name",
    )
    .bind(MAIN_TAG_PREFIX)
    .fetch_all(pool)
    .await
}

/// Replace all genre links for a book. Unknown tags are stored as-is; a
/// later validation pass reconciles them against the taxonomy.
pub async fn set_book_genres(
    conn: &mut SqliteConnection,
    book_id: &str,
    tags: &[String],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM book_genres WHERE book_id = ?")
        .bind(book_id)
        .execute(&mut *conn)
        .await?;
    for tag in tags {
        sqlx::query("INSERT OR IGNORE INTO book_genres (book_id, genre_tag) VALUES (?, ?)")
            .bind(book_id)
            .bind(tag)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

pub async fn get_for_book(pool: &DbPool, book_id: &str) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT genre_tag FROM book_genres WHERE book_id = ? ORDER BY genre_tag")
            .bind(book_id)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(tag,)| tag).collect())
}

/// Active-book counts per genre tag, genre-by-genre statistics for the
/// navigation tree.
pub async fn get_tag_counts(pool: &DbPool) -> Result<Vec<(String, i64)>, sqlx::Error> {
    sqlx::query_as(
        "SELECT bg.genre_tag, COUNT(DISTINCT bg.book_id) AS cnt \
         FROM book_genres bg \
         JOIN books b ON b.id = bg.book_id AND b.replaced_by_id IS NULL \
         GROUP BY bg.genre_tag \
         ORDER BY bg.genre_tag",
    )
    .fetch_all(pool)
    .await
}

/// Book tags not present in the taxonomy (kept but flagged on insert).
pub async fn get_unknown_tags(pool: &DbPool) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT DISTINCT bg.genre_tag FROM book_genres bg \
         WHERE bg.genre_tag NOT IN (SELECT tag FROM genres) \
         ORDER BY bg.genre_tag",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(tag,)| tag).collect())
}
