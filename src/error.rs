/// Errors surfaced by the library engine. Navigation queries never produce
/// these; query failures are logged at the facade and yield empty results.
/// Only mutations and the two reader-visible conditions (`BookNotFound`,
/// `FileGone`) propagate.
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    /// Requested book ID is not in the catalog (404-equivalent).
    #[error("book not found: {0}")]
    BookNotFound(String),

    /// Book is cataloged but its backing file is gone (410-equivalent).
    #[error("book file missing from disk: {0}")]
    FileGone(String),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}
