//! Schema management: idempotent DDL, trigger-maintained FTS tables,
//! taxonomy and statistics seeding.
//!
//! Startup never deletes rows. The genre seed is additive and only fires
//! when the embedded taxonomy carries strictly more subgenres than the
//! store; existing rows keep their book references. `reload_taxonomy` is
//! the explicit destructive counterpart.

use sqlx::Row;
use tracing::{debug, info};

use super::DbPool;
use super::models::ALL_STAT_KEYS;
use crate::genres::{GenreTree, MAIN_TAG_PREFIX};

const DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS books (
        id TEXT PRIMARY KEY,
        version REAL NOT NULL DEFAULT 1.0,
        file_name TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        lang TEXT NOT NULL DEFAULT '',
        book_date TEXT NOT NULL DEFAULT '',
        doc_date TEXT,
        annotation TEXT NOT NULL DEFAULT '',
        doc_size INTEGER NOT NULL DEFAULT 0,
        added_date TEXT NOT NULL,
        last_download_date TEXT,
        book_type INTEGER NOT NULL DEFAULT 0,
        id_trusted INTEGER NOT NULL DEFAULT 0,
        duplicate_key TEXT NOT NULL DEFAULT '',
        replaced_by_id TEXT,
        content_hash TEXT NOT NULL DEFAULT ''
    )",
    "CREATE TABLE IF NOT EXISTS authors (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        first_name TEXT NOT NULL DEFAULT '',
        middle_name TEXT NOT NULL DEFAULT '',
        last_name TEXT NOT NULL DEFAULT '',
        search_name TEXT NOT NULL DEFAULT '',
        last_name_soundex TEXT NOT NULL DEFAULT '',
        name_translit TEXT NOT NULL DEFAULT ''
    )",
    "CREATE TABLE IF NOT EXISTS sequences (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        search_name TEXT NOT NULL DEFAULT ''
    )",
    "CREATE TABLE IF NOT EXISTS translators (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS genres (
        tag TEXT PRIMARY KEY,
        parent TEXT NOT NULL DEFAULT '',
        name TEXT NOT NULL DEFAULT '',
        translation TEXT NOT NULL DEFAULT ''
    )",
    "CREATE TABLE IF NOT EXISTS book_authors (
        book_id TEXT NOT NULL REFERENCES books(id) ON DELETE CASCADE,
        author_id INTEGER NOT NULL REFERENCES authors(id),
        PRIMARY KEY (book_id, author_id)
    )",
    "CREATE TABLE IF NOT EXISTS book_sequences (
        book_id TEXT NOT NULL REFERENCES books(id) ON DELETE CASCADE,
        sequence_id INTEGER NOT NULL REFERENCES sequences(id),
        number_in_sequence INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (book_id, sequence_id)
    )",
    "CREATE TABLE IF NOT EXISTS book_genres (
        book_id TEXT NOT NULL REFERENCES books(id) ON DELETE CASCADE,
        genre_tag TEXT NOT NULL,
        PRIMARY KEY (book_id, genre_tag)
    )",
    "CREATE TABLE IF NOT EXISTS book_translators (
        book_id TEXT NOT NULL REFERENCES books(id) ON DELETE CASCADE,
        translator_id INTEGER NOT NULL REFERENCES translators(id),
        PRIMARY KEY (book_id, translator_id)
    )",
    "CREATE TABLE IF NOT EXISTS library_stats (
        key TEXT PRIMARY KEY,
        value INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL DEFAULT (datetime('now')),
        period_days INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS downloads (
        book_id TEXT NOT NULL,
        ts TEXT NOT NULL,
        kind TEXT NOT NULL,
        format TEXT,
        client TEXT
    )",
    // Full-text indexes, diacritic-insensitive
    "CREATE VIRTUAL TABLE IF NOT EXISTS books_fts USING fts5(
        book_id UNINDEXED,
        title,
        annotation,
        tokenize='unicode61 remove_diacritics 2'
    )",
    "CREATE VIRTUAL TABLE IF NOT EXISTS authors_fts USING fts5(
        author_id UNINDEXED,
        full_name,
        reversed_name,
        last_name,
        tokenize='unicode61 remove_diacritics 2'
    )",
    "CREATE VIRTUAL TABLE IF NOT EXISTS sequences_fts USING fts5(
        sequence_id UNINDEXED,
        name,
        tokenize='unicode61 remove_diacritics 2'
    )",
    // FTS maintenance triggers: every mutation path, batch load included,
    // goes through the parent tables, so these keep parent and FTS rows
    // consistent.
    "CREATE TRIGGER IF NOT EXISTS books_fts_ai AFTER INSERT ON books BEGIN
        INSERT INTO books_fts (book_id, title, annotation)
        VALUES (new.id, new.title, new.annotation);
    END",
    "CREATE TRIGGER IF NOT EXISTS books_fts_ad AFTER DELETE ON books BEGIN
        DELETE FROM books_fts WHERE book_id = old.id;
    END",
    "CREATE TRIGGER IF NOT EXISTS books_fts_au AFTER UPDATE OF title, annotation ON books BEGIN
        DELETE FROM books_fts WHERE book_id = old.id;
        INSERT INTO books_fts (book_id, title, annotation)
        VALUES (new.id, new.title, new.annotation);
    END",
    "CREATE TRIGGER IF NOT EXISTS authors_fts_ai AFTER INSERT ON authors BEGIN
        INSERT INTO authors_fts (author_id, full_name, reversed_name, last_name)
        VALUES (
            new.id,
            CASE WHEN new.first_name <> '' AND new.last_name <> ''
                 THEN new.first_name || ' ' || new.last_name ELSE new.name END,
            CASE WHEN new.first_name <> '' AND new.last_name <> ''
                 THEN new.last_name || ' ' || new.first_name ELSE new.name END,
            CASE WHEN new.last_name <> '' THEN new.last_name ELSE new.name END
        );
    END",
    "CREATE TRIGGER IF NOT EXISTS authors_fts_ad AFTER DELETE ON authors BEGIN
        DELETE FROM authors_fts WHERE author_id = old.id;
    END",
    "CREATE TRIGGER IF NOT EXISTS authors_fts_au AFTER UPDATE ON authors BEGIN
        DELETE FROM authors_fts WHERE author_id = old.id;
        INSERT INTO authors_fts (author_id, full_name, reversed_name, last_name)
        VALUES (
            new.id,
            CASE WHEN new.first_name <> '' AND new.last_name <> ''
                 THEN new.first_name || ' ' || new.last_name ELSE new.name END,
            CASE WHEN new.first_name <> '' AND new.last_name <> ''
                 THEN new.last_name || ' ' || new.first_name ELSE new.name END,
            CASE WHEN new.last_name <> '' THEN new.last_name ELSE new.name END
        );
    END",
    "CREATE TRIGGER IF NOT EXISTS sequences_fts_ai AFTER INSERT ON sequences BEGIN
        INSERT INTO sequences_fts (sequence_id, name) VALUES (new.id, new.name);
    END",
    "CREATE TRIGGER IF NOT EXISTS sequences_fts_ad AFTER DELETE ON sequences BEGIN
        DELETE FROM sequences_fts WHERE sequence_id = old.id;
    END",
    "CREATE TRIGGER IF NOT EXISTS sequences_fts_au AFTER UPDATE ON sequences BEGIN
        DELETE FROM sequences_fts WHERE sequence_id = old.id;
        INSERT INTO sequences_fts (sequence_id, name) VALUES (new.id, new.name);
    END",
    // Views: navigation only ever sees active rows; author book-count is
    // derived, never stored.
    "CREATE VIEW IF NOT EXISTS active_books AS
        SELECT * FROM books WHERE replaced_by_id IS NULL",
    "CREATE VIEW IF NOT EXISTS author_book_counts AS
        SELECT ba.author_id AS author_id, COUNT(DISTINCT ba.book_id) AS book_count
        FROM book_authors ba
        JOIN books b ON b.id = ba.book_id AND b.replaced_by_id IS NULL
        GROUP BY ba.author_id",
    // Auxiliary indexes
    "CREATE INDEX IF NOT EXISTS idx_books_title ON books(title)",
    "CREATE INDEX IF NOT EXISTS idx_books_added_date ON books(added_date)",
    "CREATE INDEX IF NOT EXISTS idx_books_duplicate_key ON books(duplicate_key)",
    "CREATE INDEX IF NOT EXISTS idx_books_content_hash ON books(content_hash)",
    "CREATE INDEX IF NOT EXISTS idx_books_replaced_by ON books(replaced_by_id)",
    "CREATE INDEX IF NOT EXISTS idx_books_trusted_id ON books(id_trusted, id)",
    // Hot path: navigation only ever sees active books.
    "CREATE INDEX IF NOT EXISTS idx_books_active ON books(added_date)
        WHERE replaced_by_id IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_authors_last_name ON authors(last_name)",
    "CREATE INDEX IF NOT EXISTS idx_authors_search_name ON authors(search_name)",
    "CREATE INDEX IF NOT EXISTS idx_authors_soundex ON authors(last_name_soundex)",
    "CREATE INDEX IF NOT EXISTS idx_authors_translit ON authors(name_translit)",
    "CREATE INDEX IF NOT EXISTS idx_sequences_search ON sequences(search_name)",
    "CREATE INDEX IF NOT EXISTS idx_book_authors_author ON book_authors(author_id, book_id)",
    "CREATE INDEX IF NOT EXISTS idx_book_sequences_seq ON book_sequences(sequence_id, book_id)",
    "CREATE INDEX IF NOT EXISTS idx_book_genres_tag ON book_genres(genre_tag, book_id)",
    "CREATE INDEX IF NOT EXISTS idx_book_translators_tr ON book_translators(translator_id, book_id)",
    "CREATE INDEX IF NOT EXISTS idx_downloads_book ON downloads(book_id, ts)",
];

/// Create missing tables, indexes and triggers, seed the taxonomy and the
/// statistics rows, then refresh the planner statistics.
pub async fn init(pool: &DbPool, taxonomy: &GenreTree) -> Result<(), sqlx::Error> {
    for ddl in DDL {
        sqlx::query(ddl).execute(pool).await?;
    }
    seed_taxonomy(pool, taxonomy).await?;
    seed_stats(pool).await?;
    sqlx::query("ANALYZE").execute(pool).await?;
    Ok(())
}

/// Additive taxonomy seed: runs only when the XML resource has strictly
/// more subgenres than the store, and never deletes existing rows.
pub async fn seed_taxonomy(pool: &DbPool, taxonomy: &GenreTree) -> Result<(), sqlx::Error> {
    let stored: i64 =
        sqlx::query("SELECT COUNT(*) AS cnt FROM genres WHERE substr(tag, 1, 6) <> ?")
            .bind(MAIN_TAG_PREFIX)
            .fetch_one(pool)
            .await?
            .get("cnt");

    if taxonomy.subgenre_count() as i64 <= stored {
        debug!("Genre taxonomy up to date ({stored} subgenres)");
        return Ok(());
    }

    insert_taxonomy(pool, taxonomy).await?;
    info!(
        "Genre taxonomy seeded: {} subgenres (was {stored})",
        taxonomy.subgenre_count()
    );
    Ok(())
}

/// Explicit destructive reload: clear the taxonomy and re-seed from the
/// given tree. Book links in `book_genres` are left in place.
pub async fn reload_taxonomy(pool: &DbPool, taxonomy: &GenreTree) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM genres").execute(pool).await?;
    insert_taxonomy(pool, taxonomy).await?;
    info!(
        "Genre taxonomy reloaded: {} subgenres",
        taxonomy.subgenre_count()
    );
    Ok(())
}

async fn insert_taxonomy(pool: &DbPool, taxonomy: &GenreTree) -> Result<(), sqlx::Error> {
    for genre in &taxonomy.genres {
        // Parents persist as label-only pseudo-rows.
        sqlx::query("INSERT OR IGNORE INTO genres (tag, parent, name, translation) VALUES (?, '', ?, ?)")
            .bind(format!("{MAIN_TAG_PREFIX}{}", genre.name))
            .bind(&genre.name)
            .bind(&genre.translation)
            .execute(pool)
            .await?;
        for sub in &genre.subgenres {
            sqlx::query(
                "INSERT OR IGNORE INTO genres (tag, parent, name, translation) VALUES (?, ?, ?, ?)",
            )
            .bind(&sub.tag)
            .bind(&genre.name)
            .bind(&sub.name)
            .bind(&sub.translation)
            .execute(pool)
            .await?;
        }
    }
    Ok(())
}

async fn seed_stats(pool: &DbPool) -> Result<(), sqlx::Error> {
    for key in ALL_STAT_KEYS {
        sqlx::query("INSERT OR IGNORE INTO library_stats (key, value) VALUES (?, 0)")
            .bind(key)
            .execute(pool)
            .await?;
    }
    Ok(())
}
