use tinyopds::book::Book;
use tinyopds::db::models::STAT_TOTAL_BOOKS;
use tinyopds::db::queries::stats;
use tinyopds::library::AddOutcome;

use super::*;

#[tokio::test]
async fn add_book_normalizes_genres_and_invalidates_counts() {
    let dir = tempfile::tempdir().unwrap();
    let library = open_test_library(dir.path()).await;

    let mut book = make_book("norm.fb2", "Жанровые игры", "Автор Жанров");
    // "fantazy" is not a taxonomy tag; Soundex recovers "sf_fantasy".
    book.genres = vec!["sf".to_string(), "fantazy".to_string()];
    let outcome = library.add_book(book, None).await.unwrap();
    assert_eq!(outcome, AddOutcome::Added);

    let loaded = library.get_book_by_file_name("norm.fb2").await.unwrap();
    let mut tags = loaded.genres.clone();
    tags.sort();
    assert_eq!(tags, ["sf", "sf_fantasy"]);

    library.refresh_counts().await;
    let counts = library.counts().await;
    assert_eq!(counts.total_books, 1);
    assert_eq!(counts.fb2_books, 1);
    assert_eq!(counts.new_books, 1);
    library.close().await;
}

#[tokio::test]
async fn add_book_rejects_invalid_and_counts_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let library = open_test_library(dir.path()).await;

    let mut invalid = Book::new("no-title.fb2");
    invalid.authors = vec!["Кто-то".to_string()];
    invalid.genres = vec!["sf".to_string()];
    assert_eq!(
        library.add_book(invalid, None).await.unwrap(),
        AddOutcome::Invalid
    );

    let book = make_book("dup.fb2", "Дубль", "Автор Дубля");
    assert_eq!(
        library.add_book(book.clone(), None).await.unwrap(),
        AddOutcome::Added
    );
    assert_eq!(
        library.add_book(book, None).await.unwrap(),
        AddOutcome::Duplicate
    );
    library.close().await;
}

#[tokio::test]
async fn aliases_apply_on_insert_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    // External alias file beside the library root wins over the embedded
    // copy.
    std::fs::write(
        dir.path().join("a_aliases.txt"),
        "Иванов,Иван,,1,0,0,Иванофф,Иван\n",
    )
    .unwrap();
    let library = open_test_library(dir.path()).await;

    let book = make_book("alias.fb2", "Псевдонимы", "Иванофф Иван");
    library.add_book(book, None).await.unwrap();

    let loaded = library.get_book_by_file_name("alias.fb2").await.unwrap();
    assert_eq!(loaded.authors, ["Иванов Иван"]);

    let visible = library.books_by_author("Иванов Иван").await;
    assert_eq!(visible.len(), 1);
    library.close().await;
}

#[tokio::test]
async fn library_root_prefix_is_stripped_from_file_names() {
    let dir = tempfile::tempdir().unwrap();
    let library = open_test_library(dir.path()).await;

    let absolute = dir.path().join("shelf/rooted.fb2");
    let book = make_book(absolute.to_str().unwrap(), "С корнем", "Автор Корня");
    library.add_book(book, None).await.unwrap();

    // The stored form is relative, and both forms resolve.
    let loaded = library.get_book_by_file_name("shelf/rooted.fb2").await.unwrap();
    assert_eq!(loaded.file_name, "shelf/rooted.fb2");
    assert!(library.book_exists(absolute.to_str().unwrap()).await);
    assert!(library.book_exists("shelf/rooted.fb2").await);
    library.close().await;
}

#[tokio::test]
async fn cold_start_counts_come_from_persisted_statistics() {
    let dir = tempfile::tempdir().unwrap();
    {
        let library = open_test_library(dir.path()).await;
        // Seed through the repository so no background refresh can race
        // with the statistic written below.
        for i in 0..3 {
            let mut book = make_book(
                &format!("cold-{i}.fb2"),
                &format!("Холодный старт {i}"),
                &format!("Автор Номер{i}"),
            );
            tinyopds::db::queries::books::add(library.pool(), &mut book, None)
                .await
                .unwrap();
        }
        library.refresh_counts().await;
        // Simulate a stale persisted value from a previous, larger run.
        stats::set(library.pool(), STAT_TOTAL_BOOKS, 12345).await.unwrap();
        library.close().await;
    }

    let library = open_test_library(dir.path()).await;
    assert!(library.is_cache_initialized());
    // Before the async recompute lands, the persisted value is served
    // as-is; it is never zero just because the cache is stale.
    let cached = library.counts_cached();
    assert_eq!(cached.total_books, 12345);

    // Once a recompute finishes, the real count takes over.
    library.refresh_counts().await;
    assert_eq!(library.counts().await.total_books, 3);
    library.close().await;
}

#[tokio::test]
async fn paginated_new_books_shape() {
    let dir = tempfile::tempdir().unwrap();
    let library = open_test_library(dir.path()).await;

    let mut batch = Vec::new();
    for i in 0..250 {
        batch.push(make_book(
            &format!("page-{i:03}.fb2"),
            &format!("Свежая запись {i:03}"),
            &format!("Автор Свежий{i:03}"),
        ));
    }
    let result = library.add_books(batch).await.unwrap();
    assert_eq!(result.added, 250);
    assert_eq!(result.errors, 0);

    let page = library.new_books_paginated(true, 2, 100).await;
    assert_eq!(page.total_books, 250);
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.current_page, 2);
    assert_eq!(page.page_size, 100);
    assert!(page.has_previous_page);
    assert!(!page.has_next_page);
    assert_eq!(page.books.len(), 50);

    // Title ordering is the other caller choice.
    let by_title = library.new_books_paginated(false, 0, 100).await;
    assert_eq!(by_title.books.len(), 100);
    assert!(by_title.has_next_page);
    assert!(!by_title.has_previous_page);
    assert_eq!(by_title.books[0].title, "Свежая запись 000");
    library.close().await;
}

#[tokio::test]
async fn alphabet_cache_serves_single_letter_lookups() {
    let dir = tempfile::tempdir().unwrap();
    let library = open_test_library(dir.path()).await;

    for (file, author) in [
        ("l1.fb2", "Пушкин Александр"),
        ("l2.fb2", "Пришвин Михаил"),
        ("l3.fb2", "Asimov Isaac"),
    ] {
        let book = make_book(file, &format!("Книга {author}"), author);
        library.add_book(book, None).await.unwrap();
    }
    library.rebuild_alphabet_cache().await;

    let letters = library.author_letters().await;
    assert!(letters.contains(&'П'));
    assert!(letters.contains(&'A'));

    let p_bucket = library.authors_by_letter('П').await;
    assert_eq!(p_bucket, ["Пришвин Михаил", "Пушкин Александр"]);

    // Single-character prefixes come from the bucket; longer prefixes hit
    // the indexed search column.
    assert_eq!(library.authors_by_prefix("П").await, p_bucket);
    assert_eq!(
        library.authors_by_prefix("Пуш").await,
        ["Пушкин Александр"]
    );
    library.close().await;
}

#[tokio::test]
async fn sorted_lists_respect_sort_order() {
    let dir = tempfile::tempdir().unwrap();
    let library = open_test_library(dir.path()).await;

    for (file, author) in [("s1.fb2", "Борхес Хорхе"), ("s2.fb2", "Borges Jorge")] {
        let book = make_book(file, &format!("Про {author}"), author);
        library.add_book(book, None).await.unwrap();
    }

    // Default sort order is Latin-first.
    let authors = library.authors().await;
    assert_eq!(authors, ["Borges Jorge", "Борхес Хорхе"]);
    library.close().await;
}

#[tokio::test]
async fn genre_tree_carries_counts_and_labels() {
    let dir = tempfile::tempdir().unwrap();
    let library = open_test_library(dir.path()).await;

    let book = make_book("g.fb2", "Жанровая книга", "Автор Жанра");
    library.add_book(book, None).await.unwrap();

    let tree = library.genre_tree().await;
    let sf = tree.iter().find(|g| g.tag == "sf").unwrap();
    assert_eq!(sf.book_count, 1);
    assert_eq!(sf.parent, "Science Fiction & Fantasy");
    assert_eq!(sf.translation, "Научная фантастика");

    let fantasy = tree.iter().find(|g| g.tag == "sf_fantasy").unwrap();
    assert_eq!(fantasy.book_count, 0);
    library.close().await;
}

#[tokio::test]
async fn book_not_found_and_file_gone_errors() {
    let dir = tempfile::tempdir().unwrap();
    let library = open_test_library(dir.path()).await;

    let err = library.get_book("no-such-id").await.unwrap_err();
    assert!(matches!(err, tinyopds::error::LibraryError::BookNotFound(_)));

    // Cataloged but missing from disk.
    let ghost = make_book("ghost.fb2", "Призрак", "Автор Призрака");
    library.add_book(ghost, None).await.unwrap();
    let id = library.get_book_by_file_name("ghost.fb2").await.unwrap().id;
    let err = library.book_file_path(&id).await.unwrap_err();
    assert!(matches!(err, tinyopds::error::LibraryError::FileGone(_)));

    // Present on disk resolves to the absolute path.
    std::fs::write(dir.path().join("real.fb2"), b"<fictionbook/>").unwrap();
    let real = make_book("real.fb2", "Настоящая", "Автор Настоящий");
    library.add_book(real, None).await.unwrap();
    let id = library.get_book_by_file_name("real.fb2").await.unwrap().id;
    let path = library.book_file_path(&id).await.unwrap();
    assert_eq!(path, dir.path().join("real.fb2"));
    library.close().await;
}

#[tokio::test]
async fn download_recording_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let library = open_test_library(dir.path()).await;

    let book = make_book("dl.fb2", "Скачиваемая", "Автор Скачивания");
    library.add_book(book, None).await.unwrap();
    let id = library.get_book_by_file_name("dl.fb2").await.unwrap().id;

    library
        .record_download(&id, None, Some("fb2"), Some("opds-client"))
        .await
        .unwrap();
    let loaded = library.get_book(&id).await.unwrap();
    assert!(loaded.last_download_date.is_some());
    library.close().await;
}

#[tokio::test]
async fn facade_search_is_error_tolerant_and_finds_authors() {
    let dir = tempfile::tempdir().unwrap();
    let library = open_test_library(dir.path()).await;

    let book = make_book("search.fb2", "Преступление и наказание", "Достоевский Федор");
    library.add_book(book, None).await.unwrap();

    let authors = library.search_authors("Dostoevsky").await;
    assert!(authors.contains(&"Достоевский Федор".to_string()));

    let books = library.search_books("наказание").await;
    assert_eq!(books.len(), 1);
    library.close().await;
}
