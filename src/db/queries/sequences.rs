use sqlx::SqliteConnection;

use crate::book::normalize_name;
use crate::db::DbPool;
use crate::db::models::SequenceRow;
use crate::db::queries::authors::fts_escape;

pub async fn get_or_insert(conn: &mut SqliteConnection, name: &str) -> Result<i64, sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO sequences (name, search_name) VALUES (?, ?)")
        .bind(name)
        .bind(normalize_name(name))
        .execute(&mut *conn)
        .await?;
    let (id,): (i64,) = sqlx::query_as("SELECT id FROM sequences WHERE name = ?")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

/// Replace all series memberships for a book, then drop series left
/// without books.
pub async fn set_book_sequences(
    conn: &mut SqliteConnection,
    book_id: &str,
    entries: &[(String, u32)],
) -> Result<(), sqlx::Error> {
    let old_ids: Vec<(i64,)> =
        sqlx::query_as("SELECT sequence_id FROM book_sequences WHERE book_id = ?")
            .bind(book_id)
            .fetch_all(&mut *conn)
            .await?;

    sqlx::query("DELETE FROM book_sequences WHERE book_id = ?")
        .bind(book_id)
        .execute(&mut *conn)
        .await?;

    let mut new_ids = Vec::with_capacity(entries.len());
    for (name, number) in entries {
        let sequence_id = get_or_insert(conn, name).await?;
        new_ids.push(sequence_id);
        sqlx::query(
            "INSERT OR IGNORE INTO book_sequences (book_id, sequence_id, number_in_sequence) \
             VALUES (?, ?, ?)",
        )
        .bind(book_id)
        .bind(sequence_id)
        .bind(*number as i64)
        .execute(&mut *conn)
        .await?;
    }

    for (old_id,) in old_ids {
        if !new_ids.contains(&old_id) {
            delete_if_orphaned(conn, old_id).await?;
        }
    }
    Ok(())
}

pub async fn delete_if_orphaned(
    conn: &mut SqliteConnection,
    sequence_id: i64,
) -> Result<(), sqlx::Error> {
    let (links,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM book_sequences WHERE sequence_id = ?")
            .bind(sequence_id)
            .fetch_one(&mut *conn)
            .await?;
    if links == 0 {
        sqlx::query("DELETE FROM sequences WHERE id = ?")
            .bind(sequence_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

pub async fn get_all(pool: &DbPool) -> Result<Vec<SequenceRow>, sqlx::Error> {
    sqlx::query_as::<_, SequenceRow>("SELECT * FROM sequences ORDER BY name")
        .fetch_all(pool)
        .await
}

pub async fn get_by_prefix(pool: &DbPool, prefix: &str) -> Result<Vec<SequenceRow>, sqlx::Error> {
    let pattern = format!("{}%", normalize_name(prefix));
    sqlx::query_as::<_, SequenceRow>(
        "SELECT * FROM sequences WHERE search_name LIKE ? ORDER BY name",
    )
    .bind(&pattern)
    .fetch_all(pool)
    .await
}

pub async fn find_by_name(pool: &DbPool, name: &str) -> Result<Option<SequenceRow>, sqlx::Error> {
    sqlx::query_as::<_, SequenceRow>("SELECT * FROM sequences WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await
}

/// Series with active-book counts, sorted by name.
pub async fn get_with_counts(pool: &DbPool) -> Result<Vec<(SequenceRow, i64)>, sqlx::Error> {
    let rows: Vec<(i64, String, String, i64)> = sqlx::query_as(
        "SELECT s.id, s.name, s.search_name, COUNT(DISTINCT bs.book_id) AS cnt \
         FROM sequences s \
         JOIN book_sequences bs ON bs.sequence_id = s.id \
         JOIN books b ON b.id = bs.book_id AND b.replaced_by_id IS NULL \
         GROUP BY s.id, s.name, s.search_name \
         ORDER BY s.name",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(id, name, search_name, cnt)| {
            (
                SequenceRow {
                    id,
                    name,
                    search_name,
                },
                cnt,
            )
        })
        .collect())
}

/// Series with at least one active book.
pub async fn count_active(pool: &DbPool) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(DISTINCT bs.sequence_id) FROM book_sequences bs \
         JOIN books b ON b.id = bs.book_id \
         WHERE b.replaced_by_id IS NULL",
    )
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// FTS search over series names, per-token prefix match.
pub async fn open_search(pool: &DbPool, pattern: &str) -> Result<Vec<SequenceRow>, sqlx::Error> {
    let tokens: Vec<String> = pattern
        .split_whitespace()
        .map(fts_escape)
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        return get_all(pool).await;
    }
    let query = tokens
        .iter()
        .map(|t| format!("\"{t}\"*"))
        .collect::<Vec<_>>()
        .join(" ");
    sqlx::query_as::<_, SequenceRow>(
        "SELECT s.* FROM sequences s \
         JOIN sequences_fts ON sequences_fts.sequence_id = s.id \
         WHERE sequences_fts MATCH ? ORDER BY s.name",
    )
    .bind(&query)
    .fetch_all(pool)
    .await
}
