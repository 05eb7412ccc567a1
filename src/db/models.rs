use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;

use crate::book::{Book, BookType, SequenceEntry};

#[derive(Debug, Clone, FromRow)]
pub struct BookRow {
    pub id: String,
    pub version: f64,
    pub file_name: String,
    pub title: String,
    pub lang: String,
    pub book_date: String,
    pub doc_date: Option<NaiveDate>,
    pub annotation: String,
    pub doc_size: i64,
    pub added_date: DateTime<Utc>,
    pub last_download_date: Option<DateTime<Utc>>,
    pub book_type: i32,
    pub id_trusted: bool,
    pub duplicate_key: String,
    pub replaced_by_id: Option<String>,
    pub content_hash: String,
}

impl BookRow {
    /// Reconstruct the in-memory record; relationship sets are loaded
    /// separately and attached by the caller.
    pub fn into_book(self) -> Book {
        Book {
            id: self.id,
            version: self.version as f32,
            file_name: self.file_name,
            title: self.title,
            language: self.lang,
            book_date: self.book_date,
            document_date: self.doc_date,
            annotation: self.annotation,
            document_size: self.doc_size.max(0) as u64,
            added_date: Some(self.added_date),
            last_download_date: self.last_download_date,
            book_type: BookType::from_i32(self.book_type),
            id_trusted: self.id_trusted,
            duplicate_key: self.duplicate_key,
            replaced_by_id: self.replaced_by_id,
            content_hash: self.content_hash,
            authors: Vec::new(),
            translators: Vec::new(),
            genres: Vec::new(),
            sequences: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AuthorRow {
    pub id: i64,
    pub name: String,
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub search_name: String,
    pub last_name_soundex: String,
    pub name_translit: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct SequenceRow {
    pub id: i64,
    pub name: String,
    pub search_name: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct TranslatorRow {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct GenreRow {
    pub tag: String,
    pub parent: String,
    pub name: String,
    pub translation: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct StatRow {
    pub key: String,
    pub value: i64,
    pub updated_at: String,
    pub period_days: Option<i64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DownloadRow {
    pub book_id: String,
    pub ts: DateTime<Utc>,
    pub kind: String,
    pub format: Option<String>,
    pub client: Option<String>,
}

/// Membership row used when loading a book's series.
#[derive(Debug, Clone, FromRow)]
pub struct BookSequenceRow {
    pub name: String,
    pub number_in_sequence: i64,
}

impl BookSequenceRow {
    pub fn into_entry(self) -> SequenceEntry {
        SequenceEntry {
            name: self.name,
            number: self.number_in_sequence.max(0) as u32,
        }
    }
}

// Statistic key constants
pub const STAT_TOTAL_BOOKS: &str = "total_books";
pub const STAT_FB2_BOOKS: &str = "fb2_books";
pub const STAT_EPUB_BOOKS: &str = "epub_books";
pub const STAT_AUTHORS_COUNT: &str = "authors_count";
pub const STAT_SEQUENCES_COUNT: &str = "sequences_count";
pub const STAT_NEW_BOOKS: &str = "new_books";

pub const ALL_STAT_KEYS: [&str; 6] = [
    STAT_TOTAL_BOOKS,
    STAT_FB2_BOOKS,
    STAT_EPUB_BOOKS,
    STAT_AUTHORS_COUNT,
    STAT_SEQUENCES_COUNT,
    STAT_NEW_BOOKS,
];

// Download event kinds
pub const DOWNLOAD_KIND_DOWNLOAD: &str = "download";
pub const DOWNLOAD_KIND_READ: &str = "read";
