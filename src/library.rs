//! Library facade: owns the store and every cache, and mediates all other
//! components' access to them.
//!
//! The handle is cheap to clone (`Arc` inner) and is opened exactly once at
//! startup. Counts are served from a cache that is seeded from persisted
//! statistics before the first recompute finishes, so they are displayable
//! instantly after a restart. Invalidation resets timestamps only, never
//! values: a stale cache returns the last known numbers, not zeros.

use std::collections::BTreeMap;
use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::aliases::AliasTable;
use crate::book::{Book, PrefixSource, file_path};
use crate::config::Config;
use crate::db::models::{
    DOWNLOAD_KIND_DOWNLOAD, STAT_AUTHORS_COUNT, STAT_EPUB_BOOKS, STAT_FB2_BOOKS, STAT_NEW_BOOKS,
    STAT_SEQUENCES_COUNT, STAT_TOTAL_BOOKS,
};
use crate::db::queries::books::BatchResult;
use crate::db::queries::{authors, books, downloads, genres as genre_queries, sequences, stats};
use crate::db::{self, DbPool};
use crate::error::LibraryError;
use crate::genres::GenreTree;
use crate::translit::is_cyrillic;

const STABLE_COUNTS_TTL: Duration = Duration::from_secs(60 * 60);
const NEW_BOOKS_TTL: Duration = Duration::from_secs(5 * 60);
const LISTS_TTL: Duration = Duration::from_secs(10 * 60);
const ALPHABET_TTL: Duration = Duration::from_secs(2 * 60 * 60);
const GENRE_TREE_TTL: Duration = Duration::from_secs(5 * 60);
const LOCK_TIMEOUT: Duration = Duration::from_millis(100);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const IDLE_THRESHOLD_SECS: i64 = 5 * 60;

/// The six cached counters.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct LibraryCounts {
    pub total_books: i64,
    pub fb2_books: i64,
    pub epub_books: i64,
    pub authors_count: i64,
    pub sequences_count: i64,
    pub new_books: i64,
}

#[derive(Debug, Default)]
struct CountCache {
    counts: LibraryCounts,
    /// Timestamp of the last refresh of the five stable counters.
    stable_updated: Option<Instant>,
    /// The new-books counter refreshes on its own, shorter clock.
    new_updated: Option<Instant>,
}

impl CountCache {
    fn is_fresh(&self) -> bool {
        self.stable_updated
            .is_some_and(|t| t.elapsed() < STABLE_COUNTS_TTL)
            && self.new_updated.is_some_and(|t| t.elapsed() < NEW_BOOKS_TTL)
    }
}

#[derive(Debug)]
struct ListsCache {
    authors: Vec<String>,
    sequences: Vec<String>,
    updated: Instant,
}

#[derive(Debug)]
struct AlphabetCache {
    letters: Vec<char>,
    buckets: BTreeMap<char, Vec<String>>,
    updated: Instant,
    /// Set by invalidation; values stay readable until the rebuild lands.
    stale: bool,
}

/// One taxonomy entry with its active-book count.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GenreCount {
    pub tag: String,
    pub parent: String,
    pub name: String,
    pub translation: String,
    pub book_count: i64,
}

/// One page of new books.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PaginatedBooks {
    #[serde(skip)]
    pub books: Vec<Book>,
    pub total_books: i64,
    pub total_pages: i64,
    pub current_page: i64,
    pub page_size: i64,
    pub has_previous_page: bool,
    pub has_next_page: bool,
}

/// Result of a single add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Duplicate,
    Invalid,
}

struct LibraryInner {
    pool: DbPool,
    config: Config,
    taxonomy: GenreTree,
    genre_soundex: std::collections::HashMap<String, String>,
    aliases: AliasTable,

    counts: RwLock<CountCache>,
    refresh_gate: tokio::sync::Mutex<()>,
    lists: RwLock<Option<ListsCache>>,
    alphabet: RwLock<Option<AlphabetCache>>,
    genre_tree_counts: RwLock<Option<(Vec<GenreCount>, Instant)>>,

    cache_initialized: AtomicBool,
    cache_warming: AtomicBool,
    authors_cache_loading: AtomicBool,
    dirty: AtomicBool,
    last_access_secs: AtomicI64,
}

/// Process-wide library handle. Clone freely; open once, `close` at
/// shutdown.
#[derive(Clone)]
pub struct Library {
    inner: Arc<LibraryInner>,
}

impl Library {
    /// Open the store, load the taxonomy and alias tables, seed the count
    /// cache from persisted statistics, and launch the warm-up tasks.
    pub async fn open(config: Config) -> Result<Library, LibraryError> {
        let taxonomy = GenreTree::load_embedded();
        let genre_soundex = taxonomy.soundex_index();
        let aliases = AliasTable::load(&config.library.library_path);
        info!(
            "Loaded {} genre sections, {} subgenres, {} author aliases",
            taxonomy.genres.len(),
            taxonomy.subgenre_count(),
            aliases.len()
        );

        let db_url = if config.database.path.starts_with("sqlite:") {
            config.database.path.clone()
        } else {
            format!("sqlite://{}", config.database.path)
        };
        let pool = db::create_pool(&db_url, &taxonomy).await?;

        let library = Library {
            inner: Arc::new(LibraryInner {
                pool,
                config,
                taxonomy,
                genre_soundex,
                aliases,
                counts: RwLock::new(CountCache::default()),
                refresh_gate: tokio::sync::Mutex::new(()),
                lists: RwLock::new(None),
                alphabet: RwLock::new(None),
                genre_tree_counts: RwLock::new(None),
                cache_initialized: AtomicBool::new(false),
                cache_warming: AtomicBool::new(false),
                authors_cache_loading: AtomicBool::new(false),
                dirty: AtomicBool::new(false),
                last_access_secs: AtomicI64::new(Utc::now().timestamp()),
            }),
        };

        // Persisted statistics make counts displayable before the first
        // recompute completes.
        library.load_persisted_counts().await;
        library.inner.cache_initialized.store(true, AtomicOrdering::SeqCst);

        let warm = library.clone();
        tokio::spawn(async move {
            warm.refresh_counts().await;
        });
        let alpha = library.clone();
        tokio::spawn(async move {
            alpha.rebuild_alphabet_cache().await;
        });

        Ok(library)
    }

    pub async fn close(&self) {
        self.inner.pool.close().await;
    }

    pub fn pool(&self) -> &DbPool {
        &self.inner.pool
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn is_cache_initialized(&self) -> bool {
        self.inner.cache_initialized.load(AtomicOrdering::SeqCst)
    }

    /// Last known counters without touching the store. What the OPDS
    /// front page shows the instant after startup.
    pub fn counts_cached(&self) -> LibraryCounts {
        self.inner.counts.read().unwrap().counts
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(AtomicOrdering::SeqCst)
    }

    fn cyrillic_first(&self) -> bool {
        self.inner.config.library.sort_order > 0
    }

    fn new_books_cutoff(&self) -> chrono::DateTime<Utc> {
        Utc::now() - chrono::Duration::days(self.inner.config.new_books_days() as i64)
    }

    /// Strip the configured library root from an incoming path; the store
    /// keys every book by its relative form.
    fn relative_file_name(&self, file_name: &str) -> String {
        let root = self.inner.config.library.library_path.to_string_lossy();
        let root = root.trim_end_matches(['/', '\\']);
        if !root.is_empty()
            && let Some(rest) = file_name.strip_prefix(root)
        {
            return rest.trim_start_matches(['/', '\\']).to_string();
        }
        file_name.to_string()
    }

    /// Record an access and, after an idle gap, rewarm caches and refresh
    /// statistics in the background.
    fn touch(&self) {
        let now = Utc::now().timestamp();
        let prev = self
            .inner
            .last_access_secs
            .swap(now, AtomicOrdering::SeqCst);
        if now - prev > IDLE_THRESHOLD_SECS {
            debug!("First access after idle period; warming caches");
            let lib = self.clone();
            tokio::spawn(async move {
                lib.refresh_counts().await;
                lib.rebuild_alphabet_cache().await;
            });
        }
    }

    // -----------------------------------------------------------------------
    // Counts
    // -----------------------------------------------------------------------

    /// Current counters, non-blocking. A fresh cache returns immediately;
    /// while a warm-up runs the current values are returned; otherwise a
    /// short-timeout synchronous refresh is attempted, falling back to a
    /// scheduled refresh plus the stale values. Stale never reads as zero.
    pub async fn counts(&self) -> LibraryCounts {
        self.touch();
        {
            let cache = self.inner.counts.read().unwrap();
            if cache.is_fresh() {
                return cache.counts;
            }
        }

        if self.inner.cache_warming.load(AtomicOrdering::SeqCst) {
            return self.inner.counts.read().unwrap().counts;
        }

        match timeout(LOCK_TIMEOUT, self.inner.refresh_gate.lock()).await {
            Ok(_guard) => {
                self.recompute_counts().await;
                self.inner.counts.read().unwrap().counts
            }
            Err(_) => {
                let lib = self.clone();
                tokio::spawn(async move {
                    lib.refresh_counts().await;
                });
                self.inner.counts.read().unwrap().counts
            }
        }
    }

    /// Background-safe full recompute: takes the gate itself.
    pub async fn refresh_counts(&self) {
        let _guard = self.inner.refresh_gate.lock().await;
        self.recompute_counts().await;
    }

    /// Recompute all six counters, update the cache and persist them.
    /// The caller holds the refresh gate.
    async fn recompute_counts(&self) {
        if self
            .inner
            .cache_warming
            .swap(true, AtomicOrdering::SeqCst)
        {
            return;
        }

        let pool = &self.inner.pool;
        let cutoff = self.new_books_cutoff();
        let computed = async {
            Ok::<LibraryCounts, sqlx::Error>(LibraryCounts {
                total_books: books::count(pool).await?,
                fb2_books: books::count_fb2(pool).await?,
                epub_books: books::count_epub(pool).await?,
                authors_count: authors::count_active(pool).await?,
                sequences_count: sequences::count_active(pool).await?,
                new_books: books::count_new(pool, cutoff).await?,
            })
        }
        .await;

        match computed {
            Ok(counts) => {
                {
                    let mut cache = self.inner.counts.write().unwrap();
                    cache.counts = counts;
                    cache.stable_updated = Some(Instant::now());
                    cache.new_updated = Some(Instant::now());
                }
                self.persist_counts(counts).await;
            }
            Err(e) => {
                // Cached values are retained; the next access retries.
                warn!("Count refresh failed: {e}");
            }
        }
        self.inner.cache_warming.store(false, AtomicOrdering::SeqCst);
    }

    /// Write the cached counters (and the new-books window) back to the
    /// store so a restart can display them instantly.
    async fn persist_counts(&self, counts: LibraryCounts) {
        let pool = &self.inner.pool;
        let period = self.inner.config.new_books_days();
        let result = async {
            stats::set(pool, STAT_TOTAL_BOOKS, counts.total_books).await?;
            stats::set(pool, STAT_FB2_BOOKS, counts.fb2_books).await?;
            stats::set(pool, STAT_EPUB_BOOKS, counts.epub_books).await?;
            stats::set(pool, STAT_AUTHORS_COUNT, counts.authors_count).await?;
            stats::set(pool, STAT_SEQUENCES_COUNT, counts.sequences_count).await?;
            stats::set_with_period(pool, STAT_NEW_BOOKS, counts.new_books, period).await
        }
        .await;
        if let Err(e) = result {
            warn!("Failed to persist statistics: {e}");
        }
    }

    async fn load_persisted_counts(&self) {
        let pool = &self.inner.pool;
        let mut counts = LibraryCounts::default();
        match stats::get_all(pool).await {
            Ok(rows) => {
                for row in rows {
                    match row.key.as_str() {
                        STAT_TOTAL_BOOKS => counts.total_books = row.value,
                        STAT_FB2_BOOKS => counts.fb2_books = row.value,
                        STAT_EPUB_BOOKS => counts.epub_books = row.value,
                        STAT_AUTHORS_COUNT => counts.authors_count = row.value,
                        STAT_SEQUENCES_COUNT => counts.sequences_count = row.value,
                        STAT_NEW_BOOKS => counts.new_books = row.value,
                        _ => {}
                    }
                }
                let mut cache = self.inner.counts.write().unwrap();
                cache.counts = counts;
                // Timestamps stay unset: the values are displayable but a
                // recompute is already on its way.
            }
            Err(e) => warn!("Failed to read persisted statistics: {e}"),
        }
    }

    /// Reset cache timestamps after a mutation. Values are preserved so
    /// readers never see zeros while a refresh is pending.
    fn invalidate_caches(&self) {
        {
            let mut cache = self.inner.counts.write().unwrap();
            cache.stable_updated = None;
            cache.new_updated = None;
        }
        *self.inner.lists.write().unwrap() = None;
        *self.inner.genre_tree_counts.write().unwrap() = None;
        {
            let mut alphabet = self.inner.alphabet.write().unwrap();
            if let Some(cache) = alphabet.as_mut() {
                cache.stale = true;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Write API
    // -----------------------------------------------------------------------

    /// Add one book: alias application, genre normalization, added-date
    /// stamp, duplicate resolution, insert, cache invalidation.
    pub async fn add_book(
        &self,
        mut book: Book,
        prefix: Option<&mut dyn PrefixSource>,
    ) -> Result<AddOutcome, LibraryError> {
        self.touch();
        self.prepare_book(&mut book);
        if !book.is_valid() {
            debug!("Ignoring invalid book: {}", book.file_name);
            return Ok(AddOutcome::Invalid);
        }

        let stored = books::add(&self.inner.pool, &mut book, prefix).await?;
        if stored {
            self.after_write();
            Ok(AddOutcome::Added)
        } else {
            Ok(AddOutcome::Duplicate)
        }
    }

    /// Batch add; same per-book preprocessing, bulk pragmas around the
    /// store work.
    pub async fn add_books(&self, mut new_books: Vec<Book>) -> Result<BatchResult, LibraryError> {
        self.touch();
        for book in &mut new_books {
            self.prepare_book(book);
        }
        let result = books::add_batch(&self.inner.pool, new_books).await?;
        if result.added > 0 {
            self.after_write();
        }
        Ok(result)
    }

    fn prepare_book(&self, book: &mut Book) {
        book.file_name = self.relative_file_name(&book.file_name);
        if self.inner.config.library.use_authors_aliases {
            self.inner.aliases.apply(&mut book.authors);
        }
        book.genres = self.normalize_genres(&book.genres);
        if book.added_date.is_none() {
            book.added_date = Some(Utc::now());
        }
    }

    fn after_write(&self) {
        self.inner.dirty.store(true, AtomicOrdering::SeqCst);
        self.invalidate_caches();
        let lib = self.clone();
        tokio::spawn(async move {
            lib.refresh_counts().await;
            lib.rebuild_alphabet_cache().await;
        });
    }

    /// Keep known tags; recover unknown ones through the Soundex map;
    /// otherwise keep them as-is for a later validation pass.
    pub fn normalize_genres(&self, tags: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(tags.len());
        for tag in tags {
            let tag = tag.trim().to_lowercase();
            if tag.is_empty() {
                continue;
            }
            if self.inner.taxonomy.contains_tag(&tag) {
                out.push(tag);
                continue;
            }
            let code = crate::translit::soundex(&tag);
            if let Some(known) = self.inner.genre_soundex.get(&code) {
                debug!("Genre tag '{tag}' recovered as '{known}'");
                out.push(known.clone());
            } else {
                debug!("Unknown genre tag kept: '{tag}'");
                out.push(tag);
            }
        }
        out.dedup();
        out
    }

    pub async fn delete_book(&self, id: &str) -> Result<bool, LibraryError> {
        let deleted = books::delete(&self.inner.pool, id).await?;
        if deleted {
            self.after_write();
        }
        Ok(deleted)
    }

    pub async fn delete_book_by_file_name(&self, file_name: &str) -> Result<bool, LibraryError> {
        let relative = self.relative_file_name(file_name);
        let deleted = books::delete_by_file_name(&self.inner.pool, &relative).await?;
        if deleted {
            self.after_write();
        }
        Ok(deleted)
    }

    pub async fn book_exists(&self, file_name: &str) -> bool {
        let relative = self.relative_file_name(file_name);
        books::exists(&self.inner.pool, &relative)
            .await
            .unwrap_or(false)
    }

    // -----------------------------------------------------------------------
    // Read API: query failures degrade to empty results
    // -----------------------------------------------------------------------

    /// Fetch a book by ID; `BookNotFound` is one of the two reader-visible
    /// failures.
    pub async fn get_book(&self, id: &str) -> Result<Book, LibraryError> {
        self.touch();
        books::get_by_id(&self.inner.pool, id)
            .await?
            .ok_or_else(|| LibraryError::BookNotFound(id.to_string()))
    }

    pub async fn get_book_by_file_name(&self, file_name: &str) -> Result<Book, LibraryError> {
        let relative = self.relative_file_name(file_name);
        books::get_by_file_name(&self.inner.pool, &relative)
            .await?
            .ok_or_else(|| LibraryError::BookNotFound(relative))
    }

    /// Absolute path of the book's file; `FileGone` when the catalog entry
    /// has lost its backing file.
    pub async fn book_file_path(&self, id: &str) -> Result<PathBuf, LibraryError> {
        let book = self.get_book(id).await?;
        let path = file_path(&book, &self.inner.config.library.library_path);
        if !path.exists() {
            return Err(LibraryError::FileGone(book.file_name));
        }
        Ok(path)
    }

    pub async fn record_download(
        &self,
        id: &str,
        kind: Option<&str>,
        format: Option<&str>,
        client: Option<&str>,
    ) -> Result<(), LibraryError> {
        downloads::record(
            &self.inner.pool,
            id,
            kind.unwrap_or(DOWNLOAD_KIND_DOWNLOAD),
            format,
            client,
        )
        .await?;
        Ok(())
    }

    /// Sorted author names, list-cache backed.
    pub async fn authors(&self) -> Vec<String> {
        self.touch();
        if let Some(cache) = self.inner.lists.read().unwrap().as_ref()
            && cache.updated.elapsed() < LISTS_TTL
        {
            return cache.authors.clone();
        }
        self.rebuild_lists_cache().await;
        self.inner
            .lists
            .read()
            .unwrap()
            .as_ref()
            .map(|c| c.authors.clone())
            .unwrap_or_default()
    }

    /// Sorted series names, list-cache backed.
    pub async fn sequences(&self) -> Vec<String> {
        self.touch();
        if let Some(cache) = self.inner.lists.read().unwrap().as_ref()
            && cache.updated.elapsed() < LISTS_TTL
        {
            return cache.sequences.clone();
        }
        self.rebuild_lists_cache().await;
        self.inner
            .lists
            .read()
            .unwrap()
            .as_ref()
            .map(|c| c.sequences.clone())
            .unwrap_or_default()
    }

    async fn rebuild_lists_cache(&self) {
        let cyr_first = self.cyrillic_first();
        let pool = &self.inner.pool;
        let (author_rows, sequence_rows) = match (
            authors::get_all(pool).await,
            sequences::get_all(pool).await,
        ) {
            (Ok(a), Ok(s)) => (a, s),
            (a, s) => {
                if let Err(e) = a {
                    warn!("Author list query failed: {e}");
                }
                if let Err(e) = s {
                    warn!("Sequence list query failed: {e}");
                }
                return;
            }
        };
        let mut author_names: Vec<String> = author_rows.into_iter().map(|a| a.name).collect();
        let mut sequence_names: Vec<String> = sequence_rows.into_iter().map(|s| s.name).collect();
        author_names.sort_by(|a, b| collate(a, b, cyr_first));
        sequence_names.sort_by(|a, b| collate(a, b, cyr_first));
        *self.inner.lists.write().unwrap() = Some(ListsCache {
            authors: author_names,
            sequences: sequence_names,
            updated: Instant::now(),
        });
    }

    /// Sorted first letters of all author names.
    pub async fn author_letters(&self) -> Vec<char> {
        self.touch();
        self.ensure_alphabet_cache().await;
        self.inner
            .alphabet
            .read()
            .unwrap()
            .as_ref()
            .map(|c| c.letters.clone())
            .unwrap_or_default()
    }

    /// Authors whose names start with the given letter, served from the
    /// alphabetical bucket, not a table scan.
    pub async fn authors_by_letter(&self, letter: char) -> Vec<String> {
        self.touch();
        self.ensure_alphabet_cache().await;
        let key = letter.to_uppercase().next().unwrap_or(letter);
        if let Some(cache) = self.inner.alphabet.read().unwrap().as_ref() {
            return cache.buckets.get(&key).cloned().unwrap_or_default();
        }
        Vec::new()
    }

    /// Author names by prefix. Single-character prefixes come from the
    /// alphabet cache; longer ones go to the indexed search column.
    pub async fn authors_by_prefix(&self, prefix: &str) -> Vec<String> {
        self.touch();
        let mut chars = prefix.chars();
        if let (Some(first), None) = (chars.next(), chars.next()) {
            return self.authors_by_letter(first).await;
        }
        match authors::get_by_prefix(&self.inner.pool, prefix).await {
            Ok(rows) => rows.into_iter().map(|a| a.name).collect(),
            Err(e) => {
                warn!("Author prefix query failed: {e}");
                Vec::new()
            }
        }
    }

    async fn ensure_alphabet_cache(&self) {
        let fresh = self
            .inner
            .alphabet
            .read()
            .unwrap()
            .as_ref()
            .is_some_and(|c| !c.stale && c.updated.elapsed() < ALPHABET_TTL);
        if fresh {
            return;
        }
        if self
            .inner
            .authors_cache_loading
            .load(AtomicOrdering::SeqCst)
        {
            // A rebuild is already running; serve whatever is cached.
            return;
        }
        self.rebuild_alphabet_cache().await;
    }

    /// Rebuild the first-letter buckets. Guarded by the loading flag so
    /// concurrent rebuilds collapse into one.
    pub async fn rebuild_alphabet_cache(&self) {
        if self
            .inner
            .authors_cache_loading
            .swap(true, AtomicOrdering::SeqCst)
        {
            return;
        }
        let cyr_first = self.cyrillic_first();
        match authors::get_all(&self.inner.pool).await {
            Ok(rows) => {
                let mut buckets: BTreeMap<char, Vec<String>> = BTreeMap::new();
                for row in rows {
                    let Some(first) = row.name.chars().next() else {
                        continue;
                    };
                    let key = first.to_uppercase().next().unwrap_or(first);
                    buckets.entry(key).or_default().push(row.name);
                }
                for bucket in buckets.values_mut() {
                    bucket.sort_by(|a, b| collate(a, b, cyr_first));
                }
                let mut letters: Vec<char> = buckets.keys().copied().collect();
                letters.sort_by(|a, b| collate_chars(*a, *b, cyr_first));
                *self.inner.alphabet.write().unwrap() = Some(AlphabetCache {
                    letters,
                    buckets,
                    updated: Instant::now(),
                    stale: false,
                });
            }
            Err(e) => warn!("Alphabet cache rebuild failed: {e}"),
        }
        self.inner
            .authors_cache_loading
            .store(false, AtomicOrdering::SeqCst);
    }

    /// Genre taxonomy with per-tag active-book counts, cache-backed.
    pub async fn genre_tree(&self) -> Vec<GenreCount> {
        self.touch();
        if let Some((cached, updated)) = self.inner.genre_tree_counts.read().unwrap().as_ref()
            && updated.elapsed() < GENRE_TREE_TTL
        {
            return cached.clone();
        }

        let counts = match genre_queries::get_tag_counts(&self.inner.pool).await {
            Ok(counts) => counts,
            Err(e) => {
                warn!("Genre count query failed: {e}");
                return Vec::new();
            }
        };
        let by_tag: std::collections::HashMap<String, i64> = counts.into_iter().collect();

        let mut tree = Vec::new();
        for genre in &self.inner.taxonomy.genres {
            for sub in &genre.subgenres {
                tree.push(GenreCount {
                    tag: sub.tag.clone(),
                    parent: genre.name.clone(),
                    name: sub.name.clone(),
                    translation: sub.translation.clone(),
                    book_count: by_tag.get(&sub.tag).copied().unwrap_or(0),
                });
            }
        }
        *self.inner.genre_tree_counts.write().unwrap() = Some((tree.clone(), Instant::now()));
        tree
    }

    pub fn taxonomy(&self) -> &GenreTree {
        &self.inner.taxonomy
    }

    pub fn latin_author_alias(&self, canonical: &str) -> Option<&str> {
        self.inner.aliases.latin_alias(canonical)
    }

    /// Explicit destructive taxonomy reload.
    pub async fn reload_genres(&self) -> Result<(), LibraryError> {
        crate::db::schema::reload_taxonomy(&self.inner.pool, &self.inner.taxonomy).await?;
        *self.inner.genre_tree_counts.write().unwrap() = None;
        Ok(())
    }

    // Navigation pass-throughs; errors are logged and degrade to empty.

    pub async fn books_by_author(&self, author: &str) -> Vec<Book> {
        self.touch();
        log_empty(books::get_by_author(&self.inner.pool, author).await, "by author")
    }

    pub async fn books_by_sequence(&self, sequence: &str) -> Vec<Book> {
        self.touch();
        log_empty(
            books::get_by_sequence(&self.inner.pool, sequence).await,
            "by sequence",
        )
    }

    pub async fn books_by_genre(&self, tag: &str) -> Vec<Book> {
        self.touch();
        log_empty(books::get_by_genre(&self.inner.pool, tag).await, "by genre")
    }

    pub async fn books_by_title(&self, term: &str) -> Vec<Book> {
        self.touch();
        log_empty(books::get_by_title(&self.inner.pool, term).await, "by title")
    }

    pub async fn books_by_file_name_prefix(&self, prefix: &str) -> Vec<Book> {
        self.touch();
        let relative = self.relative_file_name(prefix);
        log_empty(
            books::get_by_file_name_prefix(&self.inner.pool, &relative).await,
            "by filename",
        )
    }

    pub async fn new_books(&self) -> Vec<Book> {
        self.touch();
        log_empty(
            books::get_new(&self.inner.pool, self.new_books_cutoff()).await,
            "new books",
        )
    }

    /// One page of new books with pagination totals. Pages are
    /// zero-based: page 2 of 250 books at size 100 holds the last 50.
    pub async fn new_books_paginated(
        &self,
        sort_by_date: bool,
        page: i64,
        page_size: i64,
    ) -> PaginatedBooks {
        self.touch();
        let page = page.max(0);
        let page_size = page_size.max(1);
        let cutoff = self.new_books_cutoff();
        let pool = &self.inner.pool;

        let total_books = match books::count_new(pool, cutoff).await {
            Ok(n) => n,
            Err(e) => {
                warn!("New-books count failed: {e}");
                0
            }
        };
        let total_pages = (total_books + page_size - 1) / page_size;
        let offset = page * page_size;
        let books = log_empty(
            books::get_new_page(pool, cutoff, sort_by_date, page_size, offset).await,
            "new books page",
        );

        PaginatedBooks {
            books,
            total_books,
            total_pages,
            current_page: page,
            page_size,
            has_previous_page: page > 0,
            has_next_page: page + 1 < total_pages,
        }
    }

    pub async fn sequences_with_counts(&self) -> Vec<(String, i64)> {
        self.touch();
        match sequences::get_with_counts(&self.inner.pool).await {
            Ok(rows) => rows.into_iter().map(|(s, n)| (s.name, n)).collect(),
            Err(e) => {
                warn!("Sequence counts query failed: {e}");
                Vec::new()
            }
        }
    }

    pub async fn authors_with_counts(&self) -> Vec<(String, i64)> {
        self.touch();
        match authors::get_with_counts(&self.inner.pool).await {
            Ok(rows) => rows.into_iter().map(|(a, n)| (a.name, n)).collect(),
            Err(e) => {
                warn!("Author counts query failed: {e}");
                Vec::new()
            }
        }
    }

    /// OpenSearch over authors (FTS, transliteration and Soundex cascade).
    pub async fn search_authors(&self, pattern: &str) -> Vec<String> {
        self.touch();
        match authors::open_search(&self.inner.pool, pattern).await {
            Ok(rows) => rows.into_iter().map(|a| a.name).collect(),
            Err(e) => {
                warn!("Author search failed: {e}");
                Vec::new()
            }
        }
    }

    /// OpenSearch over book titles and annotations.
    pub async fn search_books(&self, pattern: &str) -> Vec<Book> {
        self.touch();
        log_empty(books::open_search(&self.inner.pool, pattern).await, "book search")
    }

    /// OpenSearch over series names.
    pub async fn search_sequences(&self, pattern: &str) -> Vec<String> {
        self.touch();
        match sequences::open_search(&self.inner.pool, pattern).await {
            Ok(rows) => rows.into_iter().map(|s| s.name).collect(),
            Err(e) => {
                warn!("Sequence search failed: {e}");
                Vec::new()
            }
        }
    }

    // -----------------------------------------------------------------------
    // Keep-alive
    // -----------------------------------------------------------------------

    /// Periodic store ping; on failure the pragmas are reapplied once the
    /// pool reconnects. Runs until the process exits.
    pub fn spawn_keepalive(&self) -> tokio::task::JoinHandle<()> {
        let lib = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = db::ping(&lib.inner.pool).await {
                    warn!("Database ping failed: {e}; reapplying pragmas");
                    if let Err(e) = db::reapply_pragmas(&lib.inner.pool).await {
                        warn!("Failed to reapply pragmas: {e}");
                    }
                }
            }
        })
    }
}

fn log_empty(result: Result<Vec<Book>, sqlx::Error>, what: &str) -> Vec<Book> {
    match result {
        Ok(books) => books,
        Err(e) => {
            warn!("Navigation query ({what}) failed: {e}");
            Vec::new()
        }
    }
}

/// Character group rank for list collation. `SortOrder` chooses whether
/// Cyrillic or Latin names lead.
fn char_rank(c: char, cyrillic_first: bool) -> u8 {
    let cyr = is_cyrillic(c);
    let lat = c.is_ascii_alphabetic();
    match (cyr, lat) {
        (true, _) if cyrillic_first => 0,
        (true, _) => 1,
        (_, true) if cyrillic_first => 1,
        (_, true) => 0,
        _ if c.is_ascii_digit() => 2,
        _ => 3,
    }
}

fn collate_chars(a: char, b: char, cyrillic_first: bool) -> Ordering {
    char_rank(a, cyrillic_first)
        .cmp(&char_rank(b, cyrillic_first))
        .then_with(|| a.to_lowercase().cmp(b.to_lowercase()))
        .then_with(|| a.cmp(&b))
}

/// Locale-preference-aware, case-insensitive string comparison used by
/// every sorted list; the raw byte order breaks exact-fold ties.
pub fn collate(a: &str, b: &str, cyrillic_first: bool) -> Ordering {
    let mut ca = a.chars().flat_map(char::to_lowercase);
    let mut cb = b.chars().flat_map(char::to_lowercase);
    loop {
        match (ca.next(), cb.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = char_rank(x, cyrillic_first)
                    .cmp(&char_rank(y, cyrillic_first))
                    .then(x.cmp(&y));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}
