//! Cursor pagination across a page boundary, a forced cursor-to-time
//! fallback, and descending "more" detection, against the feed facade
//! rather than the store directly.

use serde_json::json;
use smartfeed::publisher::LoggingPublisher;
use smartfeed::store::memory::MemoryStore;
use smartfeed::FeedService;
use std::sync::Arc;

fn service() -> FeedService {
    FeedService::new(Arc::new(MemoryStore::new()), Arc::new(LoggingPublisher::default()))
}

#[tokio::test]
async fn ascending_pagination_covers_every_item_exactly_once() {
    let svc = service();
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
    let svc = service();
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
    assert!(page.last_cursor.is_none(), "fetched everything in one page");
}

#[tokio::test]
async fn descending_partial_page_reports_more() {
    let svc = service();
    for i in 0..5 {
        svc.add("feed", json!({"n": i}), Some(&format!("id-{i}")), false)
            .await
            .unwrap();
    }
    let base = FeedService::encode_base("feed");
    let feed_id = format!("{base}--created");
    let page = svc.get_items(&feed_id, None, None, 2, false).await.unwrap();
    assert_eq!(page.items.len(), 2);
    assert!(page.last_cursor.is_some(), "more items remain beyond this page");
}

#[tokio::test]
async fn since_id_excludes_the_referenced_item() {
    let svc = service();
    for i in 0..3 {
        svc.add("feed", json!({"n": i}), Some(&format!("id-{i}")), false)
            .await
            .unwrap();
    }
    let base = FeedService::encode_base("feed");
    let feed_id = format!("{base}-created");
    let page = svc.get_items(&feed_id, Some("id:id-0"), None, 10, false).await.unwrap();
    let ids: Vec<&str> = page.items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["id-1", "id-2"]);
}

#[tokio::test]
async fn empty_feed_with_no_since_yields_empty_cursor_sentinel() {
    let svc = service();
    let base = FeedService::encode_base("never-created");
    let page = svc
        .get_items(&format!("{base}-created"), None, None, 10, false)
        .await
        .unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.last_cursor, Some(String::new()));
}

#[tokio::test]
async fn cursor_with_mismatched_crc_falls_back_to_time_bound() {
    let svc = service();
    for i in 0..3 {
        svc.add("feed", json!({"n": i}), Some(&format!("id-{i}")), false)
            .await
            .unwrap();
    }
    let base = FeedService::encode_base("feed");
    let feed_id = format!("{base}-created");

    let first_page = svc.get_items(&feed_id, None, None, 1, false).await.unwrap();
    let cursor = first_page.last_cursor.unwrap();
    let (ts, offset, _crc) = {
        let mut parts = cursor.splitn(3, '_');
        (parts.next().unwrap(), parts.next().unwrap(), parts.next().unwrap())
    };
    let tampered = format!("{ts}_{offset}_0000000000");
    assert_ne!(tampered, cursor, "tampering must actually change the token");

    let page = svc
        .get_items(&feed_id, Some(&format!("cursor:{tampered}")), None, 10, false)
        .await
        .unwrap();
    let ids: Vec<&str> = page.items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["id-0", "id-1", "id-2"],
        "a CRC mismatch must not trim the tie-block, same as a bare time bound"
    );
}

#[tokio::test]
async fn with_total_reports_full_feed_cardinality_not_page_size() {
    let svc = service();
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
