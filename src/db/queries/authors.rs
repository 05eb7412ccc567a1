use sqlx::SqliteConnection;

use crate::book::normalize_name;
use crate::db::DbPool;
use crate::db::models::AuthorRow;
use crate::translit::{self, Translit, has_latin, soundex};

/// Structural name parts parsed positionally from a full name.
/// Two tokens read as "Lastname Firstname", the dominant convention in
/// FB2 corpora; see `parse_name`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedName {
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
}

/// Positional author name parsing:
///   1 token          → Lastname
///   2 tokens         → Lastname Firstname
///   3 tokens         → Lastname Firstname Middlename
///   4+ tokens        → first token Lastname, final token Middlename,
///                      the remainder Firstname
pub fn parse_name(full_name: &str) -> ParsedName {
    let tokens: Vec<&str> = full_name.split_whitespace().collect();
    match tokens.len() {
        0 => ParsedName::default(),
        1 => ParsedName {
            last_name: tokens[0].to_string(),
            ..Default::default()
        },
        2 => ParsedName {
            last_name: tokens[0].to_string(),
            first_name: tokens[1].to_string(),
            ..Default::default()
        },
        3 => ParsedName {
            last_name: tokens[0].to_string(),
            first_name: tokens[1].to_string(),
            middle_name: tokens[2].to_string(),
        },
        n => ParsedName {
            last_name: tokens[0].to_string(),
            first_name: tokens[1..n - 1].join(" "),
            middle_name: tokens[n - 1].to_string(),
        },
    }
}

/// Both Latin spellings of a name, `GOST|ISO`.
pub fn name_translit(name: &str) -> String {
    format!(
        "{}|{}",
        translit::front(name, Translit::Gost),
        translit::front(name, Translit::Iso)
    )
}

/// Insert-or-get inside a book transaction. Derived columns (search form,
/// Soundex, transliterations) are filled on first insert.
pub async fn get_or_insert(conn: &mut SqliteConnection, name: &str) -> Result<i64, sqlx::Error> {
    let parsed = parse_name(name);
    let search_name = normalize_name(name);
    let soundex_last = if parsed.last_name.is_empty() {
        soundex(name)
    } else {
        soundex(&parsed.last_name)
    };

    sqlx::query(
        "INSERT OR IGNORE INTO authors \
         (name, first_name, middle_name, last_name, search_name, last_name_soundex, name_translit) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(name)
    .bind(&parsed.first_name)
    .bind(&parsed.middle_name)
    .bind(&parsed.last_name)
    .bind(&search_name)
    .bind(&soundex_last)
    .bind(name_translit(name))
    .execute(&mut *conn)
    .await?;

    let (id,): (i64,) = sqlx::query_as("SELECT id FROM authors WHERE name = ?")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

/// Replace all authors for a book, then drop authors left without books.
pub async fn set_book_authors(
    conn: &mut SqliteConnection,
    book_id: &str,
    names: &[String],
) -> Result<(), sqlx::Error> {
    let old_ids: Vec<(i64,)> =
        sqlx::query_as("SELECT author_id FROM book_authors WHERE book_id = ?")
            .bind(book_id)
            .fetch_all(&mut *conn)
            .await?;

    sqlx::query("DELETE FROM book_authors WHERE book_id = ?")
        .bind(book_id)
        .execute(&mut *conn)
        .await?;

    let mut new_ids = Vec::with_capacity(names.len());
    for name in names {
        let author_id = get_or_insert(conn, name).await?;
        new_ids.push(author_id);
        sqlx::query("INSERT OR IGNORE INTO book_authors (book_id, author_id) VALUES (?, ?)")
            .bind(book_id)
            .bind(author_id)
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

/// Delete an author with no remaining book links.
pub async fn delete_if_orphaned(
    conn: &mut SqliteConnection,
    author_id: i64,
) -> Result<(), sqlx::Error> {
    let (links,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM book_authors WHERE author_id = ?")
        .bind(author_id)
        .fetch_one(&mut *conn)
        .await?;
    if links == 0 {
        sqlx::query("DELETE FROM authors WHERE id = ?")
            .bind(author_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

pub async fn get_by_id(pool: &DbPool, id: i64) -> Result<Option<AuthorRow>, sqlx::Error> {
    sqlx::query_as::<_, AuthorRow>("SELECT * FROM authors WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_name(pool: &DbPool, name: &str) -> Result<Option<AuthorRow>, sqlx::Error> {
    sqlx::query_as::<_, AuthorRow>("SELECT * FROM authors WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await
}

pub async fn get_all(pool: &DbPool) -> Result<Vec<AuthorRow>, sqlx::Error> {
    sqlx::query_as::<_, AuthorRow>("SELECT * FROM authors ORDER BY name")
        .fetch_all(pool)
        .await
}

pub async fn get_by_prefix(pool: &DbPool, prefix: &str) -> Result<Vec<AuthorRow>, sqlx::Error> {
    let pattern = format!("{}%", normalize_name(prefix));
    sqlx::query_as::<_, AuthorRow>(
        "SELECT * FROM authors WHERE search_name LIKE ? ORDER BY name",
    )
    .bind(&pattern)
    .fetch_all(pool)
    .await
}

pub async fn get_for_book(pool: &DbPool, book_id: &str) -> Result<Vec<AuthorRow>, sqlx::Error> {
    sqlx::query_as::<_, AuthorRow>(
        "SELECT a.* FROM authors a \
         JOIN book_authors ba ON ba.author_id = a.id \
         WHERE ba.book_id = ? ORDER BY a.name",
    )
    .bind(book_id)
    .fetch_all(pool)
    .await
}

/// Authors with at least one active book.
pub async fn count_active(pool: &DbPool) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM author_book_counts")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Authors with their active-book counts, sorted by name.
pub async fn get_with_counts(pool: &DbPool) -> Result<Vec<(AuthorRow, i64)>, sqlx::Error> {
    let rows: Vec<(i64, String, String, String, String, String, String, String, i64)> =
        sqlx::query_as(
            "SELECT a.id, a.name, a.first_name, a.middle_name, a.last_name, \
                    a.search_name, a.last_name_soundex, a.name_translit, c.book_count \
             FROM authors a \
             JOIN author_book_counts c ON c.author_id = a.id \
             ORDER BY a.name",
        )
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(
            |(
                id,
                name,
                first_name,
                middle_name,
                last_name,
                search_name,
                last_name_soundex,
                name_translit,
                count,
            )| {
                (
                    AuthorRow {
                        id,
                        name,
                        first_name,
                        middle_name,
                        last_name,
                        search_name,
                        last_name_soundex,
                        name_translit,
                    },
                    count,
                )
            },
        )
        .collect())
}

/// Cascading OpenSearch for authors:
///   1. two tokens: FTS exact phrase, then the reversed phrase;
///   2. one token: FTS prefix;
///   3. Latin input: retry after GOST, then ISO, Latin to Cyrillic;
///   4. Soundex of the last token against `last_name_soundex`.
pub async fn open_search(pool: &DbPool, pattern: &str) -> Result<Vec<AuthorRow>, sqlx::Error> {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return get_all(pool).await;
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
            return Ok(hits);
        }
    }

    if let Some(last_token) = pattern.split_whitespace().last() {
        let code = soundex(last_token);
        if !code.is_empty() {
            return sqlx::query_as::<_, AuthorRow>(
                "SELECT * FROM authors WHERE last_name_soundex = ? ORDER BY name",
            )
            .bind(&code)
            .fetch_all(pool)
            .await;
        }
    }
    Ok(Vec::new())
}

async fn fts_search(pool: &DbPool, pattern: &str) -> Result<Vec<AuthorRow>, sqlx::Error> {
    let tokens: Vec<String> = pattern
        .split_whitespace()
        .map(fts_escape)
        .filter(|t| !t.is_empty())
        .collect();

    match tokens.len() {
        0 => Ok(Vec::new()),
        1 => fts_match(pool, &format!("\"{}\"*", tokens[0])).await,
        2 => {
            let phrase = fts_match(pool, &format!("\"{} {}\"", tokens[0], tokens[1])).await?;
            if !phrase.is_empty() {
                return Ok(phrase);
            }
            fts_match(pool, &format!("\"{} {}\"", tokens[1], tokens[0])).await
        }
        _ => {
            let query = tokens
                .iter()
                .map(|t| format!("\"{t}\"*"))
                .collect::<Vec<_>>()
                .join(" ");
            fts_match(pool, &query).await
        }
    }
}

async fn fts_match(pool: &DbPool, query: &str) -> Result<Vec<AuthorRow>, sqlx::Error> {
    sqlx::query_as::<_, AuthorRow>(
        "SELECT a.* FROM authors a \
         JOIN authors_fts ON authors_fts.author_id = a.id \
         WHERE authors_fts MATCH ? ORDER BY a.name",
    )
    .bind(query)
    .fetch_all(pool)
    .await
}

/// Strip characters with meaning inside an FTS5 query string.
pub(crate) fn fts_escape(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-')
        .collect()
}
