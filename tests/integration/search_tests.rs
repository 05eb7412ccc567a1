use tinyopds::db::create_test_pool;
use tinyopds::db::queries::{authors, books, sequences};

use super::*;

async fn seed_author(pool: &tinyopds::db::DbPool, file: &str, title: &str, author: &str) {
    let mut book = make_book(file, title, author);
    books::add(pool, &mut book, None).await.unwrap();
}

#[tokio::test]
async fn author_phrase_search_matches_both_orders() {
    let pool = create_test_pool().await;
    seed_author(&pool, "p1.fb2", "Стихи", "Пушкин Александр").await;
    seed_author(&pool, "p2.fb2", "Проза", "Пушков Алексей").await;

    // "Lastname Firstname", the stored order.
    let hits = authors::open_search(&pool, "Пушкин Александр").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "Пушкин Александр");

    // "Firstname Lastname", the reversed phrase.
    let hits = authors::open_search(&pool, "Александр Пушкин").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "Пушкин Александр");
}

#[tokio::test]
async fn author_single_token_prefix_search() {
    let pool = create_test_pool().await;
    seed_author(&pool, "p1.fb2", "Стихи", "Пушкин Александр").await;
    seed_author(&pool, "p2.fb2", "Проза", "Пушков Алексей").await;
    seed_author(&pool, "p3.fb2", "Драма", "Чехов Антон").await;

    let hits = authors::open_search(&pool, "Пушк").await.unwrap();
    let names: Vec<&str> = hits.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, ["Пушкин Александр", "Пушков Алексей"]);
}

#[tokio::test]
async fn transliterated_author_search_finds_dostoevsky() {
    let pool = create_test_pool().await;
    seed_author(&pool, "idiot.fb2", "Идиот", "Достоевский Федор").await;

    // The GOST spelling decodes exactly; FTS prefix hits.
    let hits = authors::open_search(&pool, "Dostoevskij").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "Достоевский Федор");

    // The common English spelling decodes to "достоевскы"; the Soundex
    // fallback on the last token still lands on the author.
    let hits = authors::open_search(&pool, "Dostoevsky").await.unwrap();
    assert!(hits.iter().any(|a| a.name == "Достоевский Федор"));
}

#[tokio::test]
async fn author_soundex_fallback_on_misspelling() {
    let pool = create_test_pool().await;
    seed_author(&pool, "c1.fb2", "Рассказы о докторах", "Чехов Антон").await;

    // No FTS hit for the misspelled Latin form; Soundex saves it.
    let hits = authors::open_search(&pool, "Chekov").await.unwrap();
    assert!(hits.iter().any(|a| a.name == "Чехов Антон"));
}

#[tokio::test]
async fn empty_pattern_returns_full_list() {
    let pool = create_test_pool().await;
    seed_author(&pool, "a1.fb2", "Один", "Борисов Борис").await;
    seed_author(&pool, "a2.fb2", "Два", "Андреев Андрей").await;

    let hits = authors::open_search(&pool, "").await.unwrap();
    let names: Vec<&str> = hits.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, ["Андреев Андрей", "Борисов Борис"]);
}

#[tokio::test]
async fn unmatched_pattern_returns_empty() {
    let pool = create_test_pool().await;
    seed_author(&pool, "a1.fb2", "Один", "Борисов Борис").await;

    let hits = authors::open_search(&pool, "Ggggrrrr Zzz").await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn book_search_ranks_title_prefix_first() {
    let pool = create_test_pool().await;
    let mut b1 = make_book("b1.fb2", "Война миров", "Уэллс Герберт");
    let mut b2 = make_book("b2.fb2", "Великая война", "Историк Иван");
    let mut b3 = make_book("b3.fb2", "Мирная жизнь", "Бытовой Борис");
    books::add(&pool, &mut b1, None).await.unwrap();
    books::add(&pool, &mut b2, None).await.unwrap();
    books::add(&pool, &mut b3, None).await.unwrap();

    let hits = books::open_search(&pool, "Война").await.unwrap();
    assert_eq!(hits.len(), 2);
    // The literal-prefix title outranks the mid-title match.
    assert_eq!(hits[0].title, "Война миров");
    assert_eq!(hits[1].title, "Великая война");
}

#[tokio::test]
async fn book_search_matches_annotation() {
    let pool = create_test_pool().await;
    let mut book = make_book("ann.fb2", "Безымянная", "Автор Аннотации");
    book.annotation = "Повесть о марсианском вторжении".to_string();
    books::add(&pool, &mut book, None).await.unwrap();

    let hits = books::open_search(&pool, "марсианском").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].title, "Безымянная");
}

#[tokio::test]
async fn book_search_transliterated_latin_input() {
    let pool = create_test_pool().await;
    let mut book = make_book("idiot.fb2", "Идиот", "Достоевский Федор");
    books::add(&pool, &mut book, None).await.unwrap();

    let hits = books::open_search(&pool, "Idiot").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].title, "Идиот");
}

#[tokio::test]
async fn book_search_like_fallback() {
    let pool = create_test_pool().await;
    let mut book = make_book("numbered.fb2", "X-123-Y", "Автор Номерной");
    books::add(&pool, &mut book, None).await.unwrap();

    // A mid-token fragment never matches the FTS prefix query; the LIKE
    // fallback finds the substring anyway.
    let hits = books::open_search(&pool, "23").await.unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn sequence_search_prefix_tokens() {
    let pool = create_test_pool().await;
    let mut b1 = with_sequence(
        make_book("s1.fb2", "Первое дело", "Автор Серии"),
        "Приключения Фандорина",
        1,
    );
    books::add(&pool, &mut b1, None).await.unwrap();

    let hits = sequences::open_search(&pool, "Фандор").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "Приключения Фандорина");

    let by_prefix = sequences::get_by_prefix(&pool, "Приключ").await.unwrap();
    assert_eq!(by_prefix.len(), 1);
}

#[tokio::test]
async fn replaced_books_are_invisible_to_search() {
    let pool = create_test_pool().await;
    let mut old = make_book("fb2-000001-000100.zip@x.fb2", "Поиск", "Автор Поиска");
    let mut new = make_book("fb2-000200-000300.zip@x.fb2", "Поиск", "Автор Поиска");
    books::add(&pool, &mut old, None).await.unwrap();
    books::add(&pool, &mut new, None).await.unwrap();

    let hits = books::open_search(&pool, "Поиск").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, new.id);
}
