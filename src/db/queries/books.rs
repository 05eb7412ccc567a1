use std::time::Instant;

use chrono::{DateTime, Utc};
use sqlx::{Connection, SqliteConnection};
use tracing::{debug, warn};

use crate::book::{Book, PrefixSource};
use crate::db::models::{BookRow, BookSequenceRow};
use crate::db::queries::authors::fts_escape;
use crate::db::queries::{authors, genres, sequences, translators};
use crate::db::{DbPool, apply_bulk_pragmas, restore_bulk_pragmas};
use crate::dedup;
use crate::translit::{self, Translit, has_latin};

/// Outcome of a batch insert. Individual failures never abort the batch;
/// a transaction-level failure accounts every book as erroneous.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct BatchResult {
    pub total_processed: u64,
    pub added: u64,
    pub duplicates: u64,
    pub errors: u64,
    pub fb2_count: u64,
    pub epub_count: u64,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub error_messages: Vec<String>,
}

/// Insert or update a single book with full duplicate resolution, in its
/// own transaction. Returns `true` when the book was stored, `false` on a
/// duplicate skip.
pub async fn add(
    pool: &DbPool,
    book: &mut Book,
    prefix: Option<&mut dyn PrefixSource>,
) -> Result<bool, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    let mut tx = conn.begin().await?;
    let check = dedup::check(&mut tx, book, prefix).await?;
    let store = dedup::process(&mut tx, &check, &book.id).await?;
    if store {
        insert_with(&mut tx, book).await?;
    }
    tx.commit().await?;
    Ok(store)
}

/// Batch insert with relaxed-durability pragmas on one connection, one
/// transaction, and a savepoint per book so a broken record cannot take
/// the batch down with it.
pub async fn add_batch(pool: &DbPool, books: Vec<Book>) -> Result<BatchResult, sqlx::Error> {
    let started = Instant::now();
    let mut result = BatchResult {
        total_processed: books.len() as u64,
        ..Default::default()
    };
    if books.is_empty() {
        result.processing_time_ms = started.elapsed().as_millis() as u64;
        return Ok(result);
    }

    let mut conn = pool.acquire().await?;
    apply_bulk_pragmas(&mut conn).await?;

    let batch_outcome = run_batch(&mut conn, books, &mut result).await;

    // Cleanup step: pragmas are restored on every exit path.
    if let Err(e) = restore_bulk_pragmas(&mut conn).await {
        warn!("Failed to restore pragmas after batch: {e}");
    }

    if let Err(e) = batch_outcome {
        warn!("Batch transaction failed, rolled back: {e}");
        result.errors = result.total_processed;
        result.added = 0;
        result.duplicates = 0;
        result.fb2_count = 0;
        result.epub_count = 0;
        result.error_messages.push(format!("transaction failed: {e}"));
    }

    result.processing_time_ms = started.elapsed().as_millis() as u64;
    Ok(result)
}

async fn run_batch(
    conn: &mut SqliteConnection,
    books: Vec<Book>,
    result: &mut BatchResult,
) -> Result<(), sqlx::Error> {
    let mut tx = conn.begin().await?;

    for mut book in books {
        if !book.is_valid() {
            debug!("Skipping invalid book record: {}", book.file_name);
            result.errors += 1;
            result
                .error_messages
                .push(format!("{}: invalid record", book.file_name));
            continue;
        }
        if book.added_date.is_none() {
            book.added_date = Some(Utc::now());
        }

        let file_name = book.file_name.clone();
        let book_type = book.book_type;
        let per_book: Result<bool, sqlx::Error> = async {
            let mut sp = tx.begin().await?;
            let check = dedup::check(&mut sp, &mut book, None).await?;
            let store = dedup::process(&mut sp, &check, &book.id).await?;
            if store {
                insert_with(&mut sp, &book).await?;
            }
            sp.commit().await?;
            Ok(store)
        }
        .await;

        match per_book {
            Ok(true) => {
                result.added += 1;
                match book_type {
                    crate::book::BookType::Fb2 => result.fb2_count += 1,
                    crate::book::BookType::Epub => result.epub_count += 1,
                }
            }
            Ok(false) => result.duplicates += 1,
            Err(e) => {
                debug!("Error storing {file_name}: {e}");
                result.errors += 1;
                result.error_messages.push(format!("{file_name}: {e}"));
            }
        }
    }

    tx.commit().await
}

/// Upsert the book row and rewrite every junction table wholesale.
pub async fn insert_with(conn: &mut SqliteConnection, book: &Book) -> Result<(), sqlx::Error> {
    let added = book.added_date.unwrap_or_else(Utc::now);
    sqlx::query(
        "INSERT INTO books (id, version, file_name, title, lang, book_date, doc_date, \
         annotation, doc_size, added_date, last_download_date, book_type, id_trusted, \
         duplicate_key, replaced_by_id, content_hash) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET \
             version = excluded.version, file_name = excluded.file_name, \
             title = excluded.title, lang = excluded.lang, \
             book_date = excluded.book_date, doc_date = excluded.doc_date, \
             annotation = excluded.annotation, doc_size = excluded.doc_size, \
             book_type = excluded.book_type, id_trusted = excluded.id_trusted, \
             duplicate_key = excluded.duplicate_key, content_hash = excluded.content_hash",
    )
    .bind(&book.id)
    .bind(book.version as f64)
    .bind(&book.file_name)
    .bind(&book.title)
    .bind(book.language.to_lowercase())
    .bind(&book.book_date)
    .bind(book.document_date)
    .bind(&book.annotation)
    .bind(book.document_size as i64)
    .bind(added)
    .bind(book.last_download_date)
    .bind(book.book_type.as_i32())
    .bind(book.id_trusted)
    .bind(&book.duplicate_key)
    .bind(&book.replaced_by_id)
    .bind(&book.content_hash)
    .execute(&mut *conn)
    .await?;

    authors::set_book_authors(conn, &book.id, &book.authors).await?;
    translators::set_book_translators(conn, &book.id, &book.translators).await?;
    genres::set_book_genres(conn, &book.id, &book.genres).await?;
    let entries: Vec<(String, u32)> = book
        .sequences
        .iter()
        .map(|s| (s.name.clone(), s.number))
        .collect();
    sequences::set_book_sequences(conn, &book.id, &entries).await?;
    Ok(())
}

pub async fn get_by_id(pool: &DbPool, id: &str) -> Result<Option<Book>, sqlx::Error> {
    let row: Option<BookRow> = sqlx::query_as("SELECT * FROM books WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    match row {
        Some(row) => Ok(Some(load_full(pool, row).await?)),
        None => Ok(None),
    }
}

pub async fn get_by_file_name(pool: &DbPool, file_name: &str) -> Result<Option<Book>, sqlx::Error> {
    let row: Option<BookRow> = sqlx::query_as("SELECT * FROM books WHERE file_name = ?")
        .bind(file_name)
        .fetch_optional(pool)
        .await?;
    match row {
        Some(row) => Ok(Some(load_full(pool, row).await?)),
        None => Ok(None),
    }
}

pub async fn exists(pool: &DbPool, file_name: &str) -> Result<bool, sqlx::Error> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM books WHERE file_name = ?")
        .bind(file_name)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Delete a book and clean up orphaned authors, series and translators.
pub async fn delete(pool: &DbPool, id: &str) -> Result<bool, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    let mut tx = conn.begin().await?;

    let author_ids: Vec<(i64,)> =
        sqlx::query_as("SELECT author_id FROM book_authors WHERE book_id = ?")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;
    let sequence_ids: Vec<(i64,)> =
        sqlx::query_as("SELECT sequence_id FROM book_sequences WHERE book_id = ?")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;
    let translator_ids: Vec<(i64,)> =
        sqlx::query_as("SELECT translator_id FROM book_translators WHERE book_id = ?")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;

    let affected = sqlx::query("DELETE FROM books WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    if affected > 0 {
        // Successor links pointing at the deleted record would dangle;
        // the predecessors become active again.
        sqlx::query("UPDATE books SET replaced_by_id = NULL WHERE replaced_by_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for (author_id,) in author_ids {
            authors::delete_if_orphaned(&mut tx, author_id).await?;
        }
        for (sequence_id,) in sequence_ids {
            sequences::delete_if_orphaned(&mut tx, sequence_id).await?;
        }
        for (translator_id,) in translator_ids {
            translators::delete_if_orphaned(&mut tx, translator_id).await?;
        }
    }

    tx.commit().await?;
    Ok(affected > 0)
}

pub async fn delete_by_file_name(pool: &DbPool, file_name: &str) -> Result<bool, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as("SELECT id FROM books WHERE file_name = ?")
        .bind(file_name)
        .fetch_optional(pool)
        .await?;
    match row {
        Some((id,)) => delete(pool, &id).await,
        None => Ok(false),
    }
}

/// Attach all relationship sets to a row.
pub async fn load_full(pool: &DbPool, row: BookRow) -> Result<Book, sqlx::Error> {
    let id = row.id.clone();
    let mut book = row.into_book();

    book.authors = authors::get_for_book(pool, &id)
        .await?
        .into_iter()
        .map(|a| a.name)
        .collect();
    book.translators = translators::get_for_book(pool, &id)
        .await?
        .into_iter()
        .map(|t| t.name)
        .collect();
    book.genres = genres::get_for_book(pool, &id).await?;

    let seq_rows: Vec<BookSequenceRow> = sqlx::query_as(
        "SELECT s.name, bs.number_in_sequence FROM sequences s \
         JOIN book_sequences bs ON bs.sequence_id = s.id \
         WHERE bs.book_id = ? ORDER BY bs.number_in_sequence, s.name",
    )
    .bind(&id)
    .fetch_all(pool)
    .await?;
    book.sequences = seq_rows.into_iter().map(|r| r.into_entry()).collect();

    Ok(book)
}

async fn load_many(pool: &DbPool, rows: Vec<BookRow>) -> Result<Vec<Book>, sqlx::Error> {
    let mut books = Vec::with_capacity(rows.len());
    for row in rows {
        books.push(load_full(pool, row).await?);
    }
    Ok(books)
}

// ---------------------------------------------------------------------------
// Navigation queries (active books only)
// ---------------------------------------------------------------------------

pub async fn get_by_author(pool: &DbPool, author_name: &str) -> Result<Vec<Book>, sqlx::Error> {
    let rows: Vec<BookRow> = sqlx::query_as(
        "SELECT b.* FROM books b \
         JOIN book_authors ba ON ba.book_id = b.id \
         JOIN authors a ON a.id = ba.author_id \
         WHERE a.name = ? AND b.replaced_by_id IS NULL \
         ORDER BY b.title",
    )
    .bind(author_name)
    .fetch_all(pool)
    .await?;
    load_many(pool, rows).await
}

/// Books of a series, in series order.
pub async fn get_by_sequence(pool: &DbPool, sequence_name: &str) -> Result<Vec<Book>, sqlx::Error> {
    let rows: Vec<BookRow> = sqlx::query_as(
        "SELECT b.* FROM books b \
         JOIN book_sequences bs ON bs.book_id = b.id \
         JOIN sequences s ON s.id = bs.sequence_id \
         WHERE s.name = ? AND b.replaced_by_id IS NULL \
         ORDER BY bs.number_in_sequence, b.title",
    )
    .bind(sequence_name)
    .fetch_all(pool)
    .await?;
    load_many(pool, rows).await
}

pub async fn get_by_genre(pool: &DbPool, tag: &str) -> Result<Vec<Book>, sqlx::Error> {
    let rows: Vec<BookRow> = sqlx::query_as(
        "SELECT b.* FROM books b \
         JOIN book_genres bg ON bg.book_id = b.id \
         WHERE bg.genre_tag = ? AND b.replaced_by_id IS NULL \
         ORDER BY b.title",
    )
    .bind(tag)
    .fetch_all(pool)
    .await?;
    load_many(pool, rows).await
}

pub async fn get_by_title(pool: &DbPool, term: &str) -> Result<Vec<Book>, sqlx::Error> {
    let pattern = format!("%{term}%");
    let rows: Vec<BookRow> = sqlx::query_as(
        "SELECT * FROM books WHERE title LIKE ? COLLATE NOCASE AND replaced_by_id IS NULL \
         ORDER BY title",
    )
    .bind(&pattern)
    .fetch_all(pool)
    .await?;
    load_many(pool, rows).await
}

pub async fn get_by_file_name_prefix(
    pool: &DbPool,
    prefix: &str,
) -> Result<Vec<Book>, sqlx::Error> {
    let pattern = format!("{prefix}%");
    let rows: Vec<BookRow> = sqlx::query_as(
        "SELECT * FROM books WHERE file_name LIKE ? AND replaced_by_id IS NULL \
         ORDER BY file_name",
    )
    .bind(&pattern)
    .fetch_all(pool)
    .await?;
    load_many(pool, rows).await
}

pub async fn get_new(pool: &DbPool, cutoff: DateTime<Utc>) -> Result<Vec<Book>, sqlx::Error> {
    let rows: Vec<BookRow> = sqlx::query_as(
        "SELECT * FROM books WHERE added_date >= ? AND replaced_by_id IS NULL \
         ORDER BY added_date DESC",
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;
    load_many(pool, rows).await
}

/// One page of new books, date-descending or title-ascending.
pub async fn get_new_page(
    pool: &DbPool,
    cutoff: DateTime<Utc>,
    sort_by_date: bool,
    limit: i64,
    offset: i64,
) -> Result<Vec<Book>, sqlx::Error> {
    let sql = if sort_by_date {
        "SELECT * FROM books WHERE added_date >= ? AND replaced_by_id IS NULL \
         ORDER BY added_date DESC LIMIT ? OFFSET ?"
    } else {
        "SELECT * FROM books WHERE added_date >= ? AND replaced_by_id IS NULL \
         ORDER BY title LIMIT ? OFFSET ?"
    };
    let rows: Vec<BookRow> = sqlx::query_as(sql)
        .bind(cutoff)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    load_many(pool, rows).await
}

// ---------------------------------------------------------------------------
// Counts
// ---------------------------------------------------------------------------

pub async fn count(pool: &DbPool) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM active_books")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn count_fb2(pool: &DbPool) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM books WHERE file_name LIKE '%.fb2%' AND replaced_by_id IS NULL",
    )
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn count_epub(pool: &DbPool) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM books WHERE file_name LIKE '%.epub%' AND replaced_by_id IS NULL",
    )
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn count_new(pool: &DbPool, cutoff: DateTime<Utc>) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM books WHERE added_date >= ? AND replaced_by_id IS NULL",
    )
    .bind(cutoff)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

// ---------------------------------------------------------------------------
// OpenSearch
// ---------------------------------------------------------------------------

/// Book search: per-token prefix FTS ranked by a starts-with bonus, then
/// BM25, then title; LIKE-anywhere fallback; transliterated retries on
/// all-Latin input.
pub async fn open_search(pool: &DbPool, pattern: &str) -> Result<Vec<Book>, sqlx::Error> {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return get_by_title(pool, "").await;
    }

    let mut variants = vec![pattern.to_string()];
    if has_latin(pattern) {
        let lower = pattern.to_lowercase();
        variants.push(translit::back(&lower, Translit::Gost));
        variants.push(translit::back(&lower, Translit::Iso));
    }

    for variant in &variants {
        let hits = fts_search(pool, variant).await?;
        if !hits.is_empty() {
            return load_many(pool, hits).await;
        }
    }
    for variant in &variants {
        let hits = get_by_title(pool, variant).await?;
        if !hits.is_empty() {
            return Ok(hits);
        }
    }
    Ok(Vec::new())
}

async fn fts_search(pool: &DbPool, pattern: &str) -> Result<Vec<BookRow>, sqlx::Error> {
    let tokens: Vec<String> = pattern
        .split_whitespace()
        .map(fts_escape)
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        return Ok(Vec::new());
    }
    let query = tokens
        .iter()
        .map(|t| format!("\"{t}\"*"))
        .collect::<Vec<_>>()
        .join(" ");

    sqlx::query_as::<_, BookRow>(
        "SELECT b.* FROM books b \
         JOIN books_fts ON books_fts.book_id = b.id \
         WHERE books_fts MATCH ? AND b.replaced_by_id IS NULL \
         ORDER BY CASE WHEN b.title LIKE ? || '%' THEN 0 ELSE 1 END, \
                  bm25(books_fts), b.title",
    )
    .bind(&query)
    .bind(pattern)
    .fetch_all(pool)
    .await
}
