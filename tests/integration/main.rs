mod dedup_tests;
mod library_tests;
mod repository_tests;
mod search_tests;

use std::path::Path;

use tinyopds::book::{Book, SequenceEntry};
use tinyopds::config::Config;
use tinyopds::library::Library;

/// Minimal valid book record.
pub fn make_book(file_name: &str, title: &str, author: &str) -> Book {
    let mut book = Book::new(file_name);
    book.title = title.to_string();
    book.authors = vec![author.to_string()];
    book.genres = vec!["sf".to_string()];
    book.language = "ru".to_string();
    book
}

pub fn with_sequence(mut book: Book, name: &str, number: u32) -> Book {
    book.sequences.push(SequenceEntry {
        name: name.to_string(),
        number,
    });
    book
}

/// Config pointing at a temp directory; the database lives next to the
/// books.
pub fn test_config(dir: &Path) -> Config {
    let toml_str = format!(
        r#"
[library]
library_path = {dir:?}

[database]
path = {db:?}
"#,
        db = dir.join("books.sqlite")
    );
    toml::from_str(&toml_str).expect("test config should parse")
}

pub async fn open_test_library(dir: &Path) -> Library {
    Library::open(test_config(dir)).await.expect("library should open")
}
