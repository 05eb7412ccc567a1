use chrono::NaiveDate;

use tinyopds::db::queries::{authors, books, genres, sequences, stats, translators, downloads};
use tinyopds::db::models::{DOWNLOAD_KIND_READ, STAT_TOTAL_BOOKS};
use tinyopds::db::create_test_pool;

use super::*;

#[tokio::test]
async fn insert_and_get_round_trip_preserves_relationship_sets() {
    let pool = create_test_pool().await;

    let mut book = make_book("shelf/voina-i-mir.fb2", "Война и мир", "Толстой Лев");
    book.authors.push("Боконон Иван".to_string());
    book.translators = vec!["Maude Aylmer".to_string()];
    book.genres = vec!["prose_classic".to_string(), "prose_rus_classic".to_string()];
    book = with_sequence(book, "Собрание сочинений", 4);
    book.annotation = "Роман-эпопея.".to_string();
    book.document_date = NaiveDate::from_ymd_opt(1869, 1, 1);
    book.document_size = 3_500_000;
    book.duplicate_key = book.generate_duplicate_key();

    let stored = books::add(&pool, &mut book, None).await.unwrap();
    assert!(stored);

    let loaded = books::get_by_id(&pool, &book.id).await.unwrap().unwrap();
    assert_eq!(loaded.title, "Война и мир");
    assert_eq!(loaded.language, "ru");
    assert_eq!(loaded.file_name, "shelf/voina-i-mir.fb2");
    assert_eq!(loaded.document_date, NaiveDate::from_ymd_opt(1869, 1, 1));
    assert_eq!(loaded.document_size, 3_500_000);
    assert_eq!(loaded.duplicate_key, book.duplicate_key);
    assert!(loaded.replaced_by_id.is_none());
    assert!(loaded.added_date.is_some());

    let mut authors_sorted = loaded.authors.clone();
    authors_sorted.sort();
    assert_eq!(authors_sorted, ["Боконон Иван", "Толстой Лев"]);
    assert_eq!(loaded.translators, ["Maude Aylmer"]);
    let mut genres_sorted = loaded.genres.clone();
    genres_sorted.sort();
    assert_eq!(genres_sorted, ["prose_classic", "prose_rus_classic"]);
    assert_eq!(loaded.sequences.len(), 1);
    assert_eq!(loaded.sequences[0].name, "Собрание сочинений");
    assert_eq!(loaded.sequences[0].number, 4);
}

#[tokio::test]
async fn exists_and_get_by_file_name() {
    let pool = create_test_pool().await;
    let mut book = make_book("a/b.fb2", "Тест", "Автор Один");
    books::add(&pool, &mut book, None).await.unwrap();

    assert!(books::exists(&pool, "a/b.fb2").await.unwrap());
    assert!(!books::exists(&pool, "a/c.fb2").await.unwrap());

    let by_name = books::get_by_file_name(&pool, "a/b.fb2").await.unwrap().unwrap();
    assert_eq!(by_name.id, book.id);
}

#[tokio::test]
async fn delete_cascades_and_cleans_orphans() {
    let pool = create_test_pool().await;

    let mut shared = make_book("one.fb2", "Первая", "Общий Автор");
    let mut solo = make_book("two.fb2", "Вторая", "Общий Автор");
    solo.authors.push("Одинокий Автор".to_string());
    solo.translators = vec!["Переводчик Пробный".to_string()];
    solo = with_sequence(solo, "Одинокая серия", 1);
    books::add(&pool, &mut shared, None).await.unwrap();
    books::add(&pool, &mut solo, None).await.unwrap();

    assert!(books::delete(&pool, &solo.id).await.unwrap());
    assert!(books::get_by_id(&pool, &solo.id).await.unwrap().is_none());

    // The shared author survives, the orphaned ones are gone.
    assert!(authors::find_by_name(&pool, "Общий Автор").await.unwrap().is_some());
    assert!(authors::find_by_name(&pool, "Одинокий Автор").await.unwrap().is_none());
    assert!(sequences::find_by_name(&pool, "Одинокая серия").await.unwrap().is_none());
    assert!(translators::get_for_book(&pool, &solo.id).await.unwrap().is_empty());

    // Deleting by filename handles the missing case gracefully.
    assert!(books::delete_by_file_name(&pool, "one.fb2").await.unwrap());
    assert!(!books::delete_by_file_name(&pool, "missing.fb2").await.unwrap());
    assert_eq!(books::count(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn version_upgrade_updates_in_place_and_rewrites_junctions() {
    let pool = create_test_pool().await;

    let mut v1 = make_book("x-v1.fb2", "Сказка", "Старый Автор");
    v1.set_id("123456");
    v1.version = 1.0;
    assert!(books::add(&pool, &mut v1, None).await.unwrap());

    // A newer revision of the same trusted document upgrades the row
    // in place: junctions are rewritten wholesale, the count stays 1.
    let mut v2 = make_book("x-v2.fb2", "Сказка", "Новый Автор");
    v2.set_id("123456");
    v2.version = 1.1;
    v2.genres = vec!["child_tale".to_string()];
    assert!(books::add(&pool, &mut v2, None).await.unwrap());

    let loaded = books::get_by_id(&pool, "123456").await.unwrap().unwrap();
    assert_eq!(loaded.file_name, "x-v2.fb2");
    assert_eq!(loaded.authors, ["Новый Автор"]);
    assert_eq!(loaded.genres, ["child_tale"]);
    assert!(authors::find_by_name(&pool, "Старый Автор").await.unwrap().is_none());
    assert_eq!(books::count(&pool).await.unwrap(), 1);
}

#[tokio::test]
async fn navigation_queries_filter_replaced_books() {
    let pool = create_test_pool().await;

    let mut old = make_book("fb2-000001-000100.zip@a.fb2", "Foo", "Ivanov Ivan");
    let mut new = make_book("fb2-000200-000300.zip@a.fb2", "Foo", "Ivanov Ivan");
    books::add(&pool, &mut old, None).await.unwrap();
    books::add(&pool, &mut new, None).await.unwrap();

    let by_author = books::get_by_author(&pool, "Ivanov Ivan").await.unwrap();
    assert_eq!(by_author.len(), 1);
    assert_eq!(by_author[0].id, new.id);

    let by_genre = books::get_by_genre(&pool, "sf").await.unwrap();
    assert_eq!(by_genre.len(), 1);
    let by_title = books::get_by_title(&pool, "Foo").await.unwrap();
    assert_eq!(by_title.len(), 1);
    assert_eq!(books::count(&pool).await.unwrap(), 1);
}

#[tokio::test]
async fn books_by_sequence_ordered_by_ordinal() {
    let pool = create_test_pool().await;

    for (file, title, n) in [
        ("s3.fb2", "Третья", 3u32),
        ("s1.fb2", "Первая книга цикла", 1),
        ("s2.fb2", "Вторая книга цикла", 2),
    ] {
        let mut book = with_sequence(make_book(file, title, "Автор Цикла"), "Цикл", n);
        books::add(&pool, &mut book, None).await.unwrap();
    }

    let in_series = books::get_by_sequence(&pool, "Цикл").await.unwrap();
    let numbers: Vec<u32> = in_series
        .iter()
        .map(|b| b.sequences[0].number)
        .collect();
    assert_eq!(numbers, [1, 2, 3]);

    let with_counts = sequences::get_with_counts(&pool).await.unwrap();
    assert_eq!(with_counts.len(), 1);
    assert_eq!(with_counts[0].0.name, "Цикл");
    assert_eq!(with_counts[0].1, 3);
}

#[tokio::test]
async fn format_counts_follow_file_names() {
    let pool = create_test_pool().await;
    let mut fb2 = make_book("a.fb2", "Одна", "Автор Раз");
    let mut epub = make_book("b.epub", "Другая", "Автор Два");
    let mut zipped = make_book("arc/fb2-000001-000002.zip@c.fb2", "Третья", "Автор Три");
    books::add(&pool, &mut fb2, None).await.unwrap();
    books::add(&pool, &mut epub, None).await.unwrap();
    books::add(&pool, &mut zipped, None).await.unwrap();

    assert_eq!(books::count(&pool).await.unwrap(), 3);
    assert_eq!(books::count_fb2(&pool).await.unwrap(), 2);
    assert_eq!(books::count_epub(&pool).await.unwrap(), 1);
    assert_eq!(authors::count_active(&pool).await.unwrap(), 3);
    assert_eq!(sequences::count_active(&pool).await.unwrap(), 0);

    let with_counts = authors::get_with_counts(&pool).await.unwrap();
    assert_eq!(with_counts.len(), 3);
    assert!(with_counts.iter().all(|(_, n)| *n == 1));
}

#[tokio::test]
async fn stats_set_and_get_with_period() {
    let pool = create_test_pool().await;

    stats::set(&pool, STAT_TOTAL_BOOKS, 42).await.unwrap();
    let row = stats::get(&pool, STAT_TOTAL_BOOKS).await.unwrap().unwrap();
    assert_eq!(row.value, 42);

    stats::set_with_period(&pool, "new_books", 7, 30).await.unwrap();
    let row = stats::get(&pool, "new_books").await.unwrap().unwrap();
    assert_eq!(row.value, 7);
    assert_eq!(row.period_days, Some(30));

    // Seeded keys exist from startup.
    assert_eq!(stats::get_all(&pool).await.unwrap().len(), 6);
}

#[tokio::test]
async fn downloads_append_and_stamp_book() {
    let pool = create_test_pool().await;
    let mut book = make_book("d.fb2", "Читаемая", "Автор Чтения");
    books::add(&pool, &mut book, None).await.unwrap();

    downloads::record(&pool, &book.id, DOWNLOAD_KIND_READ, Some("fb2"), Some("test-client"))
        .await
        .unwrap();
    downloads::record(&pool, &book.id, DOWNLOAD_KIND_READ, None, None)
        .await
        .unwrap();

    let events = downloads::get_for_book(&pool, &book.id).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, "read");
    assert_eq!(downloads::count(&pool).await.unwrap(), 2);

    let loaded = books::get_by_id(&pool, &book.id).await.unwrap().unwrap();
    assert!(loaded.last_download_date.is_some());
}

#[tokio::test]
async fn genre_links_and_unknown_tags() {
    let pool = create_test_pool().await;
    let mut book = make_book("g.fb2", "Жанровая", "Автор Жанра");
    book.genres = vec!["sf".to_string(), "totally_unknown".to_string()];
    books::add(&pool, &mut book, None).await.unwrap();

    let tags = genres::get_for_book(&pool, &book.id).await.unwrap();
    assert_eq!(tags, ["sf", "totally_unknown"]);

    let unknown = genres::get_unknown_tags(&pool).await.unwrap();
    assert_eq!(unknown, ["totally_unknown"]);

    let counts = genres::get_tag_counts(&pool).await.unwrap();
    assert!(counts.contains(&("sf".to_string(), 1)));
}
