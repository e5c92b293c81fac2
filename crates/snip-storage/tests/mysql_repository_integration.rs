//! Requires Docker. Run with `cargo test -p snip-storage -- --ignored`.

use std::time::Duration;

use snip_core::{BatchItem, ItemError, OwnerId, ShortCode, UrlRecord};
use snip_storage::{MySqlRepository, MySqlSettings, ReadRepository, Repository, StorageError};
use snip_test_infra::mysql::MySqlServer;
use sqlx::mysql::MySqlPoolOptions;

struct Fixture {
    _mysql: MySqlServer,
    repo: MySqlRepository,
}

impl Fixture {
    async fn start() -> Self {
        let mysql = MySqlServer::start_default().await.expect("start mysql");
        let url = mysql.database_url().await.expect("mysql url");
        let pool = connect_with_retry(&url).await;

        let settings = MySqlSettings::builder()
            .timeout(Duration::from_secs(5))
            .build();
        let repo = MySqlRepository::new(pool, settings);
        repo.apply_schema().await.expect("create schema");

        Self {
            _mysql: mysql,
            repo,
        }
    }
}

async fn connect_with_retry(url: &str) -> sqlx::MySqlPool {
    let mut last_error = None;

    for _ in 0..20 {
        match MySqlPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
        {
            Ok(pool) => return pool,
            Err(err) => {
                last_error = Some(err);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }

    panic!("failed to connect mysql: {last_error:?}");
}

fn code(value: &str) -> ShortCode {
    ShortCode::new_unchecked(value)
}

#[tokio::test]
#[ignore = "requires docker"]
async fn add_and_check_by_id_and_url() {
    let fixture = Fixture::start().await;
    let owner = fixture.repo.new_owner().await.unwrap();

    fixture
        .repo
        .add_url(UrlRecord::new(code("AAAAaaaa"), "http://ya.ru", owner))
        .await
        .unwrap();

    let by_id = fixture.repo.check_id(&code("AAAAaaaa")).await.unwrap().unwrap();
    assert_eq!(by_id.original_url, "http://ya.ru");
    assert_eq!(by_id.owner, owner);
    assert!(!by_id.deleted);

    let by_url = fixture
        .repo
        .check_url(owner, "http://ya.ru")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_url.short_code, code("AAAAaaaa"));

    assert!(fixture.repo.check_id(&code("ZZZZzzzz")).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn add_reports_which_uniqueness_was_violated() {
    let fixture = Fixture::start().await;
    let owner = fixture.repo.new_owner().await.unwrap();
    let other = fixture.repo.new_owner().await.unwrap();

    fixture
        .repo
        .add_url(UrlRecord::new(code("AAAAaaaa"), "http://ya.ru", owner))
        .await
        .unwrap();

    let err = fixture
        .repo
        .add_url(UrlRecord::new(code("AAAAaaaa"), "http://other.ru", owner))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::IdExists(_)));

    let err = fixture
        .repo
        .add_url(UrlRecord::new(code("BBBBbbbb"), "http://ya.ru", owner))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::UrlExists(_)));

    fixture
        .repo
        .add_url(UrlRecord::new(code("CCCCcccc"), "http://ya.ru", other))
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn batch_check_and_write() {
    let fixture = Fixture::start().await;
    let owner = fixture.repo.new_owner().await.unwrap();

    fixture
        .repo
        .add_url(UrlRecord::new(code("AAAAaaaa"), "http://a.ru", owner))
        .await
        .unwrap();

    let mut items = vec![
        BatchItem::new("1", "http://a.ru"),
        BatchItem::new("2", "http://b.ru"),
    ];
    items[0].short_code = Some(code("XXXXxxxx"));
    items[1].short_code = Some(code("BBBBbbbb"));

    fixture.repo.check_batch_url(owner, &mut items).await.unwrap();
    assert_eq!(items[0].error, Some(ItemError::UrlExists));
    assert_eq!(items[0].short_code, Some(code("AAAAaaaa")));
    assert!(items[1].is_pending());

    fixture.repo.write_batch_url(owner, &items).await.unwrap();

    let stored = fixture.repo.urls_by_owner(owner).await.unwrap();
    let codes: Vec<_> = stored.iter().map(|r| r.short_code.as_str()).collect();
    assert_eq!(codes, ["AAAAaaaa", "BBBBbbbb"]);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn failed_batch_write_is_rolled_back() {
    let fixture = Fixture::start().await;
    let owner = fixture.repo.new_owner().await.unwrap();

    fixture
        .repo
        .add_url(UrlRecord::new(code("TAKENxxx"), "http://taken.ru", owner))
        .await
        .unwrap();

    let mut items = vec![
        BatchItem::new("1", "http://first.ru"),
        BatchItem::new("2", "http://second.ru"),
    ];
    items[0].short_code = Some(code("FRESHxxx"));
    items[1].short_code = Some(code("TAKENxxx"));

    let err = fixture.repo.write_batch_url(owner, &items).await.unwrap_err();
    assert!(matches!(err, StorageError::IdExists(_)));
    assert!(fixture.repo.check_id(&code("FRESHxxx")).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn remove_only_touches_owned_records() {
    let fixture = Fixture::start().await;
    let owner = fixture.repo.new_owner().await.unwrap();
    let intruder = fixture.repo.new_owner().await.unwrap();

    let record = UrlRecord::new(code("AAAAaaaa"), "http://ya.ru", owner);
    fixture.repo.add_url(record.clone()).await.unwrap();

    fixture
        .repo
        .remove_url(intruder, std::slice::from_ref(&record))
        .await
        .unwrap();
    assert!(!fixture.repo.check_id(&record.short_code).await.unwrap().unwrap().deleted);

    fixture
        .repo
        .remove_url(owner, std::slice::from_ref(&record))
        .await
        .unwrap();
    assert!(fixture.repo.check_id(&record.short_code).await.unwrap().unwrap().deleted);

    fixture.repo.remove_url(owner, &[]).await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn owners_are_distinct() {
    let fixture = Fixture::start().await;
    let first = fixture.repo.new_owner().await.unwrap();
    let second = fixture.repo.new_owner().await.unwrap();
    assert!(second > first);
    assert_ne!(first, OwnerId::new(0));
    fixture.repo.ping().await.unwrap();
}
