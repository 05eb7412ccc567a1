//! Duplicate detection and resolution.
//!
//! The detector classifies a candidate against the store (new, exact
//! duplicate, fuzzy duplicate) and decides skip vs. replace. The policy is
//! deliberately conservative: the corpus is full of broken IDs, and losing
//! a unique edition costs more than keeping a near-duplicate.

use sqlx::SqliteConnection;
use tracing::debug;

use crate::book::{Book, PrefixSource};
use crate::db::models::BookRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchType {
    #[default]
    None,
    ContentHash,
    DuplicateKey,
    Fuzzy,
}

/// Outcome of a duplicate probe.
#[derive(Debug, Clone, Default)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    /// Best-matching existing book, when any qualified.
    pub existing_id: Option<String>,
    /// Every matching record to mark as replaced when replacing.
    pub matching_ids: Vec<String>,
    pub should_replace: bool,
    pub match_type: MatchType,
    pub score: i32,
}

/// Replacement threshold: a candidate must win by more than this to
/// displace an existing record, preventing thrashing on near-ties.
const REPLACE_THRESHOLD: i32 = 2;

/// Probe the store for duplicates of `candidate`. The duplicate key and,
/// when a stream is supplied, the content hash are computed lazily and
/// left filled in on the candidate.
pub async fn check(
    conn: &mut SqliteConnection,
    candidate: &mut Book,
    prefix: Option<&mut dyn PrefixSource>,
) -> Result<DuplicateCheck, sqlx::Error> {
    if !candidate.is_valid() {
        return Ok(DuplicateCheck::default());
    }

    if candidate.duplicate_key.is_empty() {
        candidate.duplicate_key = candidate.generate_duplicate_key();
    }
    if candidate.content_hash.is_empty()
        && let Some(reader) = prefix
        && let Some(hash) = Book::generate_content_hash(reader)
    {
        candidate.content_hash = hash;
    }

    // An identical file carries no new information.
    if !candidate.content_hash.is_empty() {
        let hit: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM books WHERE content_hash = ? AND replaced_by_id IS NULL LIMIT 1",
        )
        .bind(&candidate.content_hash)
        .fetch_optional(&mut *conn)
        .await?;
        if let Some((id,)) = hit {
            debug!("Content-hash duplicate of {id}: {}", candidate.file_name);
            return Ok(DuplicateCheck {
                is_duplicate: true,
                existing_id: Some(id.clone()),
                matching_ids: vec![id],
                should_replace: false,
                match_type: MatchType::ContentHash,
                score: 0,
            });
        }
    }

    // Same ID means the record itself is already cataloged: a re-scan of
    // the same file, or a new copy of the same trusted document. Never a
    // keep-both case; a strictly better copy upgrades the row in place.
    let row: Option<BookRow> =
        sqlx::query_as("SELECT * FROM books WHERE id = ? AND replaced_by_id IS NULL")
            .bind(&candidate.id)
            .fetch_optional(&mut *conn)
            .await?;
    if let Some(row) = row {
        let existing = load_for_compare(conn, row).await?;
        let score = candidate.compare_to(&existing);
        return Ok(DuplicateCheck {
            is_duplicate: true,
            existing_id: Some(existing.id.clone()),
            matching_ids: vec![existing.id],
            should_replace: score > REPLACE_THRESHOLD,
            match_type: MatchType::Fuzzy,
            score,
        });
    }

    let rows: Vec<BookRow> =
        sqlx::query_as("SELECT * FROM books WHERE duplicate_key = ? AND replaced_by_id IS NULL")
            .bind(&candidate.duplicate_key)
            .fetch_all(&mut *conn)
            .await?;
    if rows.is_empty() {
        return Ok(DuplicateCheck::default());
    }

    // A key collision alone is not a duplicate: a different translation or
    // volume shares the key shape but not the translator set.
    let mut matches = Vec::new();
    for row in rows {
        let existing = load_for_compare(conn, row).await?;
        if candidate.is_duplicate_of(&existing) {
            let score = candidate.compare_to(&existing);
            matches.push((existing, score));
        }
    }
    if matches.is_empty() {
        return Ok(DuplicateCheck::default());
    }
    Ok(resolve(matches, MatchType::DuplicateKey))
}

fn resolve(matches: Vec<(Book, i32)>, match_type: MatchType) -> DuplicateCheck {
    let best = matches.iter().map(|(_, s)| *s).max().unwrap_or(0);
    let best_id = matches
        .iter()
        .max_by_key(|(_, s)| *s)
        .map(|(b, _)| b.id.clone());
    let matching_ids: Vec<String> = matches.iter().map(|(b, _)| b.id.clone()).collect();

    if best == 0 {
        // Indistinguishable in quality: keep both.
        return DuplicateCheck {
            is_duplicate: false,
            existing_id: best_id,
            matching_ids,
            should_replace: false,
            match_type,
            score: 0,
        };
    }

    DuplicateCheck {
        is_duplicate: true,
        existing_id: best_id,
        matching_ids,
        should_replace: best > REPLACE_THRESHOLD,
        match_type,
        score: best,
    }
}

/// Apply the resolution policy. Returns `true` when the candidate should
/// be inserted; when replacing, every matching record is pointed at the
/// new ID first.
pub async fn process(
    conn: &mut SqliteConnection,
    check: &DuplicateCheck,
    new_id: &str,
) -> Result<bool, sqlx::Error> {
    if check.match_type == MatchType::ContentHash {
        return Ok(false);
    }
    if !check.is_duplicate {
        return Ok(true);
    }
    if check.matching_ids.iter().any(|id| id == new_id) {
        // The candidate IS the stored record; re-insert only when it wins
        // outright, as an in-place upgrade.
        return Ok(check.should_replace);
    }
    if check.should_replace {
        for loser in &check.matching_ids {
            sqlx::query("UPDATE books SET replaced_by_id = ? WHERE id = ?")
                .bind(new_id)
                .bind(loser)
                .execute(&mut *conn)
                .await?;
        }
        return Ok(true);
    }
    // Near-ties err toward preservation; clear losses are skipped.
    Ok(check.score.abs() <= 1)
}

/// Load an existing record with the relationship lists the predicate and
/// comparator consult.
async fn load_for_compare(
    conn: &mut SqliteConnection,
    row: BookRow,
) -> Result<Book, sqlx::Error> {
    let id = row.id.clone();
    let mut book = row.into_book();

    let authors: Vec<(String,)> = sqlx::query_as(
        "SELECT a.name FROM authors a \
         JOIN book_authors ba ON ba.author_id = a.id \
         WHERE ba.book_id = ? ORDER BY a.name",
    )
    .bind(&id)
    .fetch_all(&mut *conn)
    .await?;
    book.authors = authors.into_iter().map(|(n,)| n).collect();

    let translators: Vec<(String,)> = sqlx::query_as(
        "SELECT t.name FROM translators t \
         JOIN book_translators bt ON bt.translator_id = t.id \
         WHERE bt.book_id = ? ORDER BY t.name",
    )
    .bind(&id)
    .fetch_all(&mut *conn)
    .await?;
    book.translators = translators.into_iter().map(|(n,)| n).collect();

    Ok(book)
}
