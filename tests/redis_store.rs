//! The same invariants `tests/pagination.rs`/`tests/expiry.rs` exercise
//! against `MemoryStore`, run here against a real Redis so the two
//! backends are held to the same behavior rather than only `MemoryStore`
//! being checked.

use serde_json::json;
use smartfeed::publisher::LoggingPublisher;
use smartfeed::store::redis::RedisStore;
use smartfeed::FeedService;
use std::sync::Arc;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::redis::Redis;

async fn service() -> (testcontainers::ContainerAsync<Redis>, FeedService) {
    let container = Redis::default().start().await.unwrap();
    let port = container.get_host_port_ipv4(6379).await.unwrap();
    let client = redis::Client::open(format!("redis://127.0.0.1:{port}")).unwrap();
    let conn = client.get_connection_manager().await.unwrap();
    let store = RedisStore::new(conn);
    let svc = FeedService::new(Arc::new(store), Arc::new(LoggingPublisher::default()));
    (container, svc)
}

#[tokio::test]
async fn ascending_pagination_covers_every_item_exactly_once() {
    let (_container, svc) = service().await;
    for i in 0..10 {
        svc.add("feed", json!({"n": i}), Some(&format!("id-{i}")), false)
            .await
            .unwrap();
    }

    let base = FeedService::encode_base("feed");
    let feed_id = format!("{base}-created");

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = svc.get_items(&feed_id, cursor.as_deref(), None, 3, false).await.unwrap();
        if page.items.is_empty() {
            break;
        }
        seen.extend(page.items.iter().map(|i| i.id.clone()));
        cursor = page.last_cursor;
    }

    let expected: Vec<String> = (0..10).map(|i| format!("id-{i}")).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn descending_feed_reads_newest_first() {
    let (_container, svc) = service().await;
    for i in 0..3 {
        svc.add("feed", json!({"n": i}), Some(&format!("id-{i}")), false)
            .await
            .unwrap();
    }
    let base = FeedService::encode_base("feed");
    let feed_id = format!("{base}--created");
    let page = svc.get_items(&feed_id, None, None, 10, false).await.unwrap();
    let ids: Vec<&str> = page.items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["id-2", "id-1", "id-0"]);
}

#[tokio::test]
async fn with_total_reports_full_feed_cardinality_not_page_size() {
    let (_container, svc) = service().await;
    for i in 0..5 {
        svc.add("feed", json!({"n": i}), Some(&format!("id-{i}")), false)
            .await
            .unwrap();
    }
    let base = FeedService::encode_base("feed");
    let page = svc
        .get_items(&format!("{base}-created"), None, None, 2, true)
        .await
        .unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total, Some(5));
}

#[tokio::test]
async fn server_generated_ids_are_unique_across_repeated_adds() {
    let (_container, svc) = service().await;
    let mut ids = std::collections::HashSet::new();
    for i in 0..20 {
        let item = svc.add("feed", json!({"n": i}), None, false).await.unwrap();
        assert!(ids.insert(item.id), "server-generated id collided");
    }
}

#[tokio::test]
async fn deleting_an_item_moves_it_to_the_deleted_index() {
    let (_container, svc) = service().await;
    svc.add("feed", json!({"n": 1}), Some("id-0"), false).await.unwrap();
    svc.delete("feed", "id-0", false).await.unwrap();

    let base = FeedService::encode_base("feed");
    let created_page = svc.get_items(&format!("{base}-created"), None, None, 10, false).await.unwrap();
    assert!(created_page.items[0].deleted);

    let deleted_page = svc.get_items(&format!("{base}-deleted"), None, None, 10, false).await.unwrap();
    assert_eq!(deleted_page.items.len(), 1);
    assert_eq!(deleted_page.items[0].id, "id-0");
}

#[tokio::test]
async fn an_already_expired_tombstone_is_reclaimed_and_then_gone() {
    let (_container, svc) = service().await;
    svc.add("feed", json!({"n": 1}), Some("id-0"), false).await.unwrap();
    svc.delete("feed", "id-0", false).await.unwrap();

    let reclaimed = svc.clear_expired("feed", -1, true).await.unwrap();
    assert_eq!(reclaimed, 1);

    let base = FeedService::encode_base("feed");
    let deleted_page = svc.get_items(&format!("{base}-deleted"), None, None, 10, false).await.unwrap();
    assert!(deleted_page.items.is_empty());
}
