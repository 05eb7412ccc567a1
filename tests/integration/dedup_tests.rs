use std::io::Cursor;

use tinyopds::book::Book;
use tinyopds::db::create_test_pool;
use tinyopds::db::queries::books;
use tinyopds::dedup;

use super::*;

async fn check_only(pool: &tinyopds::db::DbPool, book: &mut Book) -> dedup::DuplicateCheck {
    let mut conn = pool.acquire().await.unwrap();
    dedup::check(&mut conn, book, None).await.unwrap()
}

#[tokio::test]
async fn archive_priority_replacement() {
    let pool = create_test_pool().await;

    let mut b1 = make_book("fb2-000001-000100.zip@a.fb2", "Foo", "Ivanov Ivan");
    assert!(books::add(&pool, &mut b1, None).await.unwrap());

    let mut b2 = make_book("fb2-000200-000300.zip@a.fb2", "Foo", "Ivanov Ivan");
    let check = check_only(&pool, &mut b2).await;
    assert!(check.is_duplicate);
    assert!(check.should_replace);
    assert!(check.score >= 10);
    assert_eq!(check.match_type, dedup::MatchType::DuplicateKey);

    assert!(books::add(&pool, &mut b2, None).await.unwrap());

    let replaced = books::get_by_id(&pool, &b1.id).await.unwrap().unwrap();
    assert_eq!(replaced.replaced_by_id.as_deref(), Some(b2.id.as_str()));
    assert_eq!(books::count(&pool).await.unwrap(), 1);

    let visible = books::get_by_author(&pool, "Ivanov Ivan").await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, b2.id);
}

#[tokio::test]
async fn translator_distinguished_editions_are_kept() {
    let pool = create_test_pool().await;

    let mut b1 = make_book("hamlet-pasternak.fb2", "Гамлет", "Шекспир Уильям");
    b1.translators = vec!["Пастернак Борис".to_string()];
    let mut b2 = make_book("hamlet-lozinsky.fb2", "Гамлет", "Шекспир Уильям");
    b2.translators = vec!["Лозинский Михаил".to_string()];

    assert!(books::add(&pool, &mut b1, None).await.unwrap());

    let check = check_only(&pool, &mut b2).await;
    assert!(!check.is_duplicate);
    assert_eq!(b1.duplicate_key, b2.duplicate_key);

    assert!(books::add(&pool, &mut b2, None).await.unwrap());
    assert_eq!(books::count(&pool).await.unwrap(), 2);
}

#[tokio::test]
async fn equal_score_tie_preserves_both() {
    let pool = create_test_pool().await;

    let mut b1 = make_book("tie-one.fb2", "Ничья", "Автор Ничьей");
    let mut b2 = make_book("tie-two.fb2", "Ничья", "Автор Ничьей");

    assert!(books::add(&pool, &mut b1, None).await.unwrap());

    let check = check_only(&pool, &mut b2).await;
    // Indistinguishable copies: key collides, predicate holds, score 0.
    assert!(!check.is_duplicate);
    assert!(!check.should_replace);
    assert_eq!(check.score, 0);

    assert!(books::add(&pool, &mut b2, None).await.unwrap());
    assert_eq!(books::count(&pool).await.unwrap(), 2);
}

#[tokio::test]
async fn content_hash_duplicate_is_always_skipped() {
    let pool = create_test_pool().await;
    let payload = vec![42u8; 4096];

    let mut b1 = make_book("same-one.fb2", "Разное название", "Первый Автор");
    let mut c1 = Cursor::new(payload.clone());
    assert!(books::add(&pool, &mut b1, Some(&mut c1)).await.unwrap());

    // Entirely different metadata, byte-identical file.
    let mut b2 = make_book("same-two.fb2", "Другое название", "Второй Автор");
    let mut c2 = Cursor::new(payload);
    let stored = books::add(&pool, &mut b2, Some(&mut c2)).await.unwrap();
    assert!(!stored);
    assert_eq!(books::count(&pool).await.unwrap(), 1);
}

#[tokio::test]
async fn adding_same_book_twice_counts_one_duplicate() {
    let pool = create_test_pool().await;

    let first = books::add_batch(&pool, vec![make_book("twice.fb2", "Дважды", "Автор Раз")])
        .await
        .unwrap();
    assert_eq!(first.added, 1);
    assert_eq!(first.duplicates, 0);

    let second = books::add_batch(&pool, vec![make_book("twice.fb2", "Дважды", "Автор Раз")])
        .await
        .unwrap();
    assert_eq!(second.added, 0);
    assert_eq!(second.duplicates, 1);
    assert_eq!(books::count(&pool).await.unwrap(), 1);
}

#[tokio::test]
async fn clear_loss_is_skipped_near_tie_is_kept() {
    let pool = create_test_pool().await;

    // Existing FB2 with a newer document date.
    let mut good = make_book("good.fb2", "Качество", "Автор Качества");
    good.document_date = chrono::NaiveDate::from_ymd_opt(2022, 1, 1);
    good.document_size = 100_000;
    assert!(books::add(&pool, &mut good, None).await.unwrap());

    // An EPUB with an older date loses -2 (format) -3 (date): skipped.
    let mut bad = make_book("bad.epub", "Качество", "Автор Качества");
    bad.document_date = chrono::NaiveDate::from_ymd_opt(2019, 1, 1);
    let stored = books::add(&pool, &mut bad, None).await.unwrap();
    assert!(!stored);
    assert_eq!(books::count(&pool).await.unwrap(), 1);

    // A copy bigger by >20% wins only +1: inside the preservation band,
    // kept alongside the original.
    let mut near = make_book("near.fb2", "Качество", "Автор Качества");
    near.document_date = chrono::NaiveDate::from_ymd_opt(2022, 1, 1);
    near.document_size = 130_000;
    let stored = books::add(&pool, &mut near, None).await.unwrap();
    assert!(stored);
    assert_eq!(books::count(&pool).await.unwrap(), 2);
}

#[tokio::test]
async fn batch_insert_reports_counters_and_continues_on_errors() {
    let pool = create_test_pool().await;

    let valid_fb2 = make_book("batch-1.fb2", "Первая партия", "Автор Партии");
    let valid_epub = make_book("batch-2.epub", "Вторая партия", "Автор Партии");
    let mut invalid = Book::new("batch-3.fb2");
    invalid.title = "Без автора и жанра".to_string();

    let result = books::add_batch(&pool, vec![valid_fb2, invalid, valid_epub])
        .await
        .unwrap();

    assert_eq!(result.total_processed, 3);
    assert_eq!(result.added, 2);
    assert_eq!(result.errors, 1);
    assert_eq!(result.duplicates, 0);
    assert_eq!(result.fb2_count, 1);
    assert_eq!(result.epub_count, 1);
    assert_eq!(result.error_messages.len(), 1);
    assert!(result.error_messages[0].contains("batch-3.fb2"));
    assert_eq!(books::count(&pool).await.unwrap(), 2);
}

#[tokio::test]
async fn empty_batch_opens_no_transaction() {
    let pool = create_test_pool().await;
    let result = books::add_batch(&pool, Vec::new()).await.unwrap();
    assert_eq!(result.total_processed, 0);
    assert_eq!(result.added, 0);
    assert_eq!(result.duplicates, 0);
    assert_eq!(result.errors, 0);
    assert!(result.error_messages.is_empty());
}

#[tokio::test]
async fn different_volumes_share_no_key() {
    let pool = create_test_pool().await;

    let mut vol1 = make_book("wm1.fb2", "Война и мир. Том 1", "Толстой Лев");
    let mut vol2 = make_book("wm2.fb2", "Война и мир. Том 2", "Толстой Лев");
    assert!(books::add(&pool, &mut vol1, None).await.unwrap());

    let check = check_only(&pool, &mut vol2).await;
    assert!(!check.is_duplicate);
    assert_ne!(vol1.duplicate_key, vol2.duplicate_key);

    assert!(books::add(&pool, &mut vol2, None).await.unwrap());
    assert_eq!(books::count(&pool).await.unwrap(), 2);
}

#[tokio::test]
async fn invalid_candidate_is_never_a_duplicate() {
    let pool = create_test_pool().await;
    let mut valid = make_book("v.fb2", "Обычная", "Автор Обычный");
    books::add(&pool, &mut valid, None).await.unwrap();

    let mut invalid = Book::new("v.fb2");
    invalid.title = "Обычная".to_string();
    let check = check_only(&pool, &mut invalid).await;
    assert!(!check.is_duplicate);
    assert_eq!(check.match_type, dedup::MatchType::None);
}
