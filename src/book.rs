//! In-memory book record with derived identity: trusted-ID classification,
//! the canonical duplicate key, content hash, archive priority and the
//! pairwise quality comparator used by duplicate resolution.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use md5::{Digest, Md5};
use regex::Regex;
use uuid::Uuid;

/// Book format, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BookType {
    #[default]
    Fb2,
    Epub,
}

impl BookType {
    pub fn from_file_name(file_name: &str) -> Self {
        // Archive members look like "archive.zip@entry.fb2"; the entry
        // extension decides.
        let entry = file_name.rsplit('@').next().unwrap_or(file_name);
        if entry.to_lowercase().ends_with(".epub") {
            BookType::Epub
        } else {
            BookType::Fb2
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            BookType::Fb2 => 0,
            BookType::Epub => 1,
        }
    }

    pub fn from_i32(v: i32) -> Self {
        if v == 1 { BookType::Epub } else { BookType::Fb2 }
    }
}

/// Stream-like access to a book file prefix, supplied by the metadata
/// parser for content hashing.
pub trait PrefixSource: Read + Seek {}
impl<T: Read + Seek> PrefixSource for T {}

/// Series membership with ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SequenceEntry {
    pub name: String,
    pub number: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Book {
    pub id: String,
    pub version: f32,
    /// Relative path under the library root, possibly `archive@entry`.
    pub file_name: String,
    pub title: String,
    pub language: String,
    pub book_date: String,
    pub document_date: Option<NaiveDate>,
    pub annotation: String,
    pub document_size: u64,
    pub added_date: Option<DateTime<Utc>>,
    pub last_download_date: Option<DateTime<Utc>>,
    pub book_type: BookType,
    pub id_trusted: bool,
    pub duplicate_key: String,
    pub replaced_by_id: Option<String>,
    pub content_hash: String,
    pub authors: Vec<String>,
    pub translators: Vec<String>,
    pub genres: Vec<String>,
    pub sequences: Vec<SequenceEntry>,
}

// Trusted external identifier: "FBD-" followed by hex groups.
static FBD_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^FBD-[0-9A-Fa-f]+(?:-[0-9A-Fa-f]+)*$").unwrap());

// Range-numbered FB2 archive: the second number orders archives in time.
static ARCHIVE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)fb2-(\d+)-(\d+)\.zip").unwrap());

// LibRusEc-kit writes date strings where a UUID belongs; any weekday or
// month token disqualifies a candidate.
const DATE_TOKENS: &[&str] = &[
    "mon", "tue", "wed", "thu", "fri", "sat", "sun", "jan", "feb", "mar", "apr", "may", "jun",
    "jul", "aug", "sep", "oct", "nov", "dec",
];

// Well-known filler UUIDs various toolchains stamp into documents.
const PLACEHOLDER_UUIDS: &[&str] = &[
    "00000000-0000-0000-0000-000000000000",
    "ffffffff-ffff-ffff-ffff-ffffffffffff",
    "00000000-0000-0000-0000-000000000001",
];

impl Book {
    /// New record for a relative filename: book type from the extension,
    /// untrusted deterministic ID until the parser supplies a better one.
    pub fn new(file_name: &str) -> Self {
        let mut book = Book {
            file_name: file_name.to_string(),
            book_type: BookType::from_file_name(file_name),
            version: 1.0,
            ..Default::default()
        };
        book.id = derived_id(file_name);
        book.id_trusted = false;
        book
    }

    /// Accept a candidate document ID. Trusted sources (FBD catalog IDs,
    /// LibRusEc numeric IDs above 100 000, genuine UUIDs) are kept as-is;
    /// everything else is replaced by a deterministic UUID of the filename.
    pub fn set_id(&mut self, candidate: &str) {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            self.id = derived_id(&self.file_name);
            self.id_trusted = false;
            return;
        }

        if FBD_ID.is_match(candidate) {
            self.id = candidate.to_string();
            self.id_trusted = true;
            return;
        }

        if let Ok(n) = candidate.parse::<i64>()
            && n > 100_000
        {
            self.id = candidate.to_string();
            self.id_trusted = true;
            return;
        }

        let lower = candidate.to_lowercase();
        let looks_like_date = DATE_TOKENS.iter().any(|t| lower.contains(t));
        if !looks_like_date
            && !PLACEHOLDER_UUIDS.contains(&lower.as_str())
            && Uuid::parse_str(candidate).is_ok()
        {
            self.id = lower;
            self.id_trusted = true;
            return;
        }

        self.id = derived_id(&self.file_name);
        self.id_trusted = false;
    }

    /// A record is usable only with a title, at least one author and at
    /// least one genre.
    pub fn is_valid(&self) -> bool {
        !self.title.trim().is_empty() && !self.authors.is_empty() && !self.genres.is_empty()
    }

    /// Canonical duplicate fingerprint: MD5 over normalized
    /// `title|first author|language|sequence`.
    pub fn generate_duplicate_key(&self) -> String {
        let title = normalize_title(&self.title);
        let author = self
            .authors
            .first()
            .map(|a| normalize_name(a))
            .unwrap_or_default();
        let lang = if self.language.trim().is_empty() {
            "unknown".to_string()
        } else {
            self.language.trim().to_lowercase()
        };
        let sequence = self
            .sequences
            .first()
            .map(|s| {
                let name = normalize_name(&s.name);
                if s.number > 0 {
                    format!("{name}_{}", s.number)
                } else {
                    name
                }
            })
            .unwrap_or_default();

        let canonical = format!("{title}|{author}|{lang}|{sequence}");
        md5_hex(canonical.as_bytes())
    }

    /// Normalized, sorted, `_`-joined translator list. Consumed by the
    /// duplicate predicate, not by the key digest.
    pub fn translator_info(&self) -> String {
        let mut names: Vec<String> = self
            .translators
            .iter()
            .map(|t| normalize_name(t))
            .filter(|t| !t.is_empty())
            .collect();
        names.sort();
        names.join("_")
    }

    /// MD5 of the first 10 KiB of the stream (whole stream if shorter),
    /// read from offset 0 with the position restored afterwards.
    pub fn generate_content_hash<R: Read + Seek + ?Sized>(reader: &mut R) -> Option<String> {
        let saved = reader.stream_position().ok()?;
        let hash = hash_prefix(reader);
        let _ = reader.seek(SeekFrom::Start(saved));
        hash
    }

    /// Ordinal extracted from range-numbered archive names
    /// (`fb2-NNNNNN-MMMMMM.zip` → MMMMMM); 0 when the name has no range.
    pub fn archive_priority(&self) -> i64 {
        ARCHIVE_NAME
            .captures(&self.file_name)
            .and_then(|c| c.get(2))
            .and_then(|m| m.as_str().parse::<i64>().ok())
            .unwrap_or(0)
    }

    /// Pairwise quality score: positive means `self` is the better copy.
    /// Signals, strongest first:
    ///   - both from range-numbered archives: newer archive wins, ±10;
    ///   - same trusted ID: version ±5, document date (1-day tolerance) ±2;
    ///   - otherwise FB2 over EPUB ±2, document date ±3, >20% size gap ±1;
    ///   - a remaining tie goes to the record with the trusted ID, ±1.
    pub fn compare_to(&self, other: &Book) -> i32 {
        let pa = self.archive_priority();
        let pb = other.archive_priority();
        if pa > 0 && pb > 0 && pa != pb {
            return if pa > pb { 10 } else { -10 };
        }

        let mut score = 0;
        if self.id_trusted && other.id_trusted && self.id == other.id {
            if self.version > other.version {
                score += 5;
            } else if self.version < other.version {
                score -= 5;
            }
            score += date_signal(self.document_date, other.document_date, 1, 2);
        } else {
            if self.book_type != other.book_type {
                score += if self.book_type == BookType::Fb2 { 2 } else { -2 };
            }
            score += date_signal(self.document_date, other.document_date, 0, 3);
            score += size_signal(self.document_size, other.document_size);
        }

        if score == 0 {
            if self.id_trusted && !other.id_trusted {
                score += 1;
            } else if !self.id_trusted && other.id_trusted {
                score -= 1;
            }
        }
        score
    }

    /// Duplicate predicate: identical trusted IDs, identical non-empty
    /// content hashes, or identical non-empty duplicate keys with matching
    /// translator sets (both empty also matches).
    pub fn is_duplicate_of(&self, other: &Book) -> bool {
        if self.id_trusted && other.id_trusted && self.id == other.id {
            return true;
        }
        if !self.content_hash.is_empty() && self.content_hash == other.content_hash {
            return true;
        }
        if !self.duplicate_key.is_empty() && self.duplicate_key == other.duplicate_key {
            return self.translator_info() == other.translator_info();
        }
        false
    }
}

/// Absolute path of the book's container file. For archive members the
/// archive path is returned; entry extraction is the enumerator's job.
pub fn file_path(book: &Book, library_root: &Path) -> PathBuf {
    let container = book.file_name.split('@').next().unwrap_or(&book.file_name);
    library_root.join(container)
}

fn derived_id(file_name: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, file_name.as_bytes()).to_string()
}

fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

const CONTENT_HASH_PREFIX: usize = 10 * 1024;

fn hash_prefix<R: Read + Seek + ?Sized>(reader: &mut R) -> Option<String> {
    reader.seek(SeekFrom::Start(0)).ok()?;
    let mut buf = vec![0u8; CONTENT_HASH_PREFIX];
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => return None,
        }
    }
    if filled == 0 {
        return None;
    }
    Some(md5_hex(&buf[..filled]))
}

fn date_signal(a: Option<NaiveDate>, b: Option<NaiveDate>, tolerance_days: i64, weight: i32) -> i32 {
    match (a, b) {
        (Some(da), Some(db)) => {
            let diff = (da - db).num_days();
            if diff > tolerance_days {
                weight
            } else if diff < -tolerance_days {
                -weight
            } else {
                0
            }
        }
        _ => 0,
    }
}

fn size_signal(a: u64, b: u64) -> i32 {
    if a == 0 || b == 0 {
        return 0;
    }
    let (bigger, smaller, sign) = if a >= b { (a, b, 1) } else { (b, a, -1) };
    // Beyond a 20% gap the bigger file usually carries more content.
    if bigger as f64 / smaller as f64 > 1.2 { sign } else { 0 }
}

// ---------------------------------------------------------------------------
// Title and name normalization for the duplicate key
// ---------------------------------------------------------------------------

// A separator between the marker word and the digits is mandatory, so the
// normalized form `vol2` never re-matches on a second pass.
static VOL_NUMERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:том|книга|часть|кн|ч|volume|vol|book|part)(?:\.\s*|\s+№?\s*|\s*№\s*)(\d+)\b")
        .unwrap()
});

static VOL_ROMAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:том|книга|часть|volume|vol|book|part)\.?\s+([ivxlcdm]+)\b").unwrap()
});

// Trailing bare roman numeral ("Rocky III"); two letters minimum so a
// trailing "i" never counts.
static VOL_ROMAN_TRAILING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s([ivxlcdm]{2,})$").unwrap());

static VOL_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:(?:том|книга|часть|book|volume|part)\s+(первый|первая|второй|вторая|третий|третья|четвертый|четвёртый|четвертая|пятый|пятая|шестой|седьмой|восьмой|девятый|десятый|one|two|three|four|five|six|seven|eight|nine|ten|first|second|third|fourth|fifth)|(первый|первая|второй|вторая|третий|третья|четвертый|четвёртый|четвертая|пятый|пятая|шестой|седьмой|восьмой|девятый|десятый|first|second|third|fourth|fifth)\s+(?:том|книга|часть|book|volume|part))\b",
    )
    .unwrap()
});

static TRANSLATOR_MARK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:перевод[а-яё]*|пер\.|в\s+переводе|translated\s+by|translation\s+of|transl?\.)\s+(?:с\s+[а-яё]+(?:ского|цкого)?\s+)?([\p{L}]+)").unwrap()
});

static EDITION_MARK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:(\d+)\s*-?\s*е\s+изд(?:ание|\.)?|изд(?:ание|\.)?\s+(\d+)|(\d+)(?:st|nd|rd|th)?\s+edition|edition\s+(\d+)|ed\.\s*(\d+))\b").unwrap()
});

const COLLECTION_KEYWORDS: &[&str] = &[
    "сборник",
    "антология",
    "рассказы",
    "повести",
    "сочинения",
    "избранное",
    "collection",
    "anthology",
    "stories",
    "omnibus",
];

const COLLECTION_SENTINEL: &str = "_collection_";

const WORD_NUMBERS: &[(&str, u32)] = &[
    ("первый", 1),
    ("первая", 1),
    ("второй", 2),
    ("вторая", 2),
    ("третий", 3),
    ("третья", 3),
    ("четвертый", 4),
    ("четвёртый", 4),
    ("четвертая", 4),
    ("пятый", 5),
    ("пятая", 5),
    ("шестой", 6),
    ("седьмой", 7),
    ("восьмой", 8),
    ("девятый", 9),
    ("десятый", 10),
    ("one", 1),
    ("first", 1),
    ("two", 2),
    ("second", 2),
    ("three", 3),
    ("third", 3),
    ("four", 4),
    ("fourth", 4),
    ("five", 5),
    ("fifth", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
];

/// Canonical form of a title for duplicate-key purposes. Idempotent:
/// normalizing an already-normalized title returns it unchanged.
pub fn normalize_title(title: &str) -> String {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let lower = trimmed.to_lowercase();

    let mut working;
    let mut markers: Vec<String> = Vec::new();

    if let Some(inner) = strip_wrapping_brackets(&lower) {
        // A fully bracketed title is taken literally; only the outer pair
        // goes. Volume markers inside stay part of the name.
        working = inner.to_string();
    } else {
        working = lower.clone();
        while let Some((rest, n)) = extract_volume(&working) {
            working = rest;
            markers.push(format!("vol{n}"));
        }
        while let Some(caps) = TRANSLATOR_MARK.captures(&working) {
            let surname = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
            working = remove_match(&working, caps.get(0).unwrap());
            markers.push(format!("trans_{surname}"));
        }
        while let Some(caps) = EDITION_MARK.captures(&working) {
            let n = (1..=5)
                .filter_map(|i| caps.get(i))
                .next()
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            working = remove_match(&working, caps.get(0).unwrap());
            markers.push(format!("ed{n}"));
        }
    }

    let mut cleaned = clean_punctuation(&working);
    for marker in &markers {
        cleaned.push(' ');
        cleaned.push_str(marker);
    }
    let mut result = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    if !result.contains(COLLECTION_SENTINEL)
        && COLLECTION_KEYWORDS.iter().any(|k| result.contains(k))
    {
        result.push(' ');
        result.push_str(COLLECTION_SENTINEL);
    }

    if result.chars().count() < 3 {
        // Too little survived; fall back to a minimally cleaned original.
        let fallback = clean_punctuation(&lower)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if !fallback.is_empty() {
            return fallback;
        }
    }
    result
}

/// Lowercase a person or sequence name, turn punctuation into spaces and
/// collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    clean_punctuation(&name.to_lowercase())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_wrapping_brackets(s: &str) -> Option<&str> {
    let pairs = [('(', ')'), ('[', ']'), ('{', '}'), ('«', '»')];
    let first = s.chars().next()?;
    let last = s.chars().next_back()?;
    for (open, close) in pairs {
        if first == open && last == close {
            let inner = &s[open.len_utf8()..s.len() - close.len_utf8()];
            // Only strip when the pair wraps the whole title, not
            // "(foo) and (bar)".
            if !inner.contains(open) && !inner.contains(close) {
                return Some(inner.trim());
            }
        }
    }
    None
}

fn extract_volume(s: &str) -> Option<(String, u32)> {
    if let Some(caps) = VOL_NUMERIC.captures(s) {
        let n: u32 = caps.get(1)?.as_str().parse().ok()?;
        return Some((remove_match(s, caps.get(0).unwrap()), n));
    }
    if let Some(caps) = VOL_WORD.captures(s) {
        let word = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_lowercase())?;
        let n = WORD_NUMBERS
            .iter()
            .find(|(w, _)| *w == word)
            .map(|(_, n)| *n)?;
        return Some((remove_match(s, caps.get(0).unwrap()), n));
    }
    if let Some(caps) = VOL_ROMAN.captures(s) {
        if let Some(n) = parse_roman(caps.get(1)?.as_str()) {
            return Some((remove_match(s, caps.get(0).unwrap()), n));
        }
    }
    if let Some(caps) = VOL_ROMAN_TRAILING.captures(s) {
        if let Some(n) = parse_roman(caps.get(1)?.as_str()) {
            // Bare trailing numerals above 30 are almost always words that
            // merely spell like Roman numbers ("mix", "lvi").
            if n <= 30 {
                return Some((remove_match(s, caps.get(0).unwrap()), n));
            }
        }
    }
    None
}

fn remove_match(s: &str, m: regex::Match<'_>) -> String {
    let mut out = String::with_capacity(s.len());
    out.push_str(&s[..m.start()]);
    out.push(' ');
    out.push_str(&s[m.end()..]);
    out
}

static ROMAN_SYNTAX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^m{0,3}(cm|cd|d?c{0,3})(xc|xl|l?x{0,3})(ix|iv|v?i{0,3})$").unwrap()
});

fn parse_roman(s: &str) -> Option<u32> {
    if s.is_empty() || !ROMAN_SYNTAX.is_match(s) {
        return None;
    }
    let value = |c: char| match c.to_ascii_lowercase() {
        'i' => 1,
        'v' => 5,
        'x' => 10,
        'l' => 50,
        'c' => 100,
        'd' => 500,
        'm' => 1000,
        _ => 0,
    };
    let chars: Vec<i64> = s.chars().map(value).collect();
    let mut total = 0i64;
    for (i, &v) in chars.iter().enumerate() {
        if chars.get(i + 1).is_some_and(|&next| next > v) {
            total -= v;
        } else {
            total += v;
        }
    }
    (total > 0).then_some(total as u32)
}

const UNICODE_DASHES: &[char] = &['\u{2010}', '\u{2011}', '\u{2012}', '\u{2013}', '\u{2014}', '\u{2015}', '\u{2212}'];
const QUOTE_CHARS: &[char] = &[
    '«', '»', '„', '“', '”', '‚', '‘', '’', '"', '\'', '`',
];

/// Quotes vanish; dashes and every other non-alphanumeric character except
/// '_' become a space.
fn clean_punctuation(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if UNICODE_DASHES.contains(&c) {
            out.push(' ');
        } else if QUOTE_CHARS.contains(&c) {
            // dropped
        } else if c.is_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push(' ');
        }
    }
    out
}
