use sqlx::SqliteConnection;

use crate::db::DbPool;
use crate::db::models::TranslatorRow;

pub async fn get_or_insert(conn: &mut SqliteConnection, name: &str) -> Result<i64, sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO translators (name) VALUES (?)")
        .bind(name)
        .execute(&mut *conn)
        .await?;
    let (id,): (i64,) = sqlx::query_as("SELECT id FROM translators WHERE name = ?")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

pub async fn set_book_translators(
    conn: &mut SqliteConnection,
    book_id: &str,
    names: &[String],
) -> Result<(), sqlx::Error> {
    let old_ids: Vec<(i64,)> =
        sqlx::query_as("SELECT translator_id FROM book_translators WHERE book_id = ?")
            .bind(book_id)
            .fetch_all(&mut *conn)
            .await?;

    sqlx::query("DELETE FROM book_translators WHERE book_id = ?")
        .bind(book_id)
        .execute(&mut *conn)
        .await?;

    let mut new_ids = Vec::with_capacity(names.len());
    for name in names {
        let translator_id = get_or_insert(conn, name).await?;
        new_ids.push(translator_id);
        sqlx::query(
            "INSERT OR IGNORE INTO book_translators (book_id, translator_id) VALUES (?, ?)",
        )
        .bind(book_id)
        .bind(translator_id)
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
    translator_id: i64,
) -> Result<(), sqlx::Error> {
    let (links,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM book_translators WHERE translator_id = ?")
            .bind(translator_id)
            .fetch_one(&mut *conn)
            .await?;
    if links == 0 {
        sqlx::query("DELETE FROM translators WHERE id = ?")
            .bind(translator_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

pub async fn get_for_book(pool: &DbPool, book_id: &str) -> Result<Vec<TranslatorRow>, sqlx::Error> {
    sqlx::query_as::<_, TranslatorRow>(
        "SELECT t.* FROM translators t \
         JOIN book_translators bt ON bt.translator_id = t.id \
         WHERE bt.book_id = ? ORDER BY t.name",
    )
    .bind(book_id)
    .fetch_all(pool)
    .await
}
