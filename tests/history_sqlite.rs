use chrono::{TimeZone, Utc};
use uuid::Uuid;

use geoscope::history::{AnalysisMetadata, HistoryStore, SqliteHistoryStore};

fn metadata(brand: &str, query: &str, hour: u32) -> AnalysisMetadata {
    AnalysisMetadata {
        run_id: Uuid::new_v4(),
        timestamp: Utc.with_ymd_and_hms(2026, 8, 1, hour, 0, 0).unwrap(),
        query: query.to_string(),
        brand: brand.to_string(),
        visibility_rate: 0.4,
        hypothesis_count: 3,
        recommendation_count: 5,
    }
}

#[tokio::test]
async fn put_then_get_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteHistoryStore::new(dir.path().join("history.sqlite")).unwrap();

    let meta = metadata("acme.com", "best crm software", 9);
    let id = meta.run_id;
    store
        .put(meta, "Query: best crm software\nBrand: acme.com".to_string())
        .await
        .unwrap();

    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.metadata.run_id, id);
    assert_eq!(stored.metadata.brand, "acme.com");
    assert_eq!(stored.metadata.hypothesis_count, 3);
    assert!(stored.document.contains("best crm software"));

    assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn put_is_an_upsert() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteHistoryStore::new(dir.path().join("history.sqlite")).unwrap();

    let mut meta = metadata("acme.com", "q", 9);
    let id = meta.run_id;
    store.put(meta.clone(), "first".to_string()).await.unwrap();

    meta.visibility_rate = 0.9;
    store.put(meta, "second".to_string()).await.unwrap();

    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.document, "second");
    assert!((stored.metadata.visibility_rate - 0.9).abs() < 1e-9);

    let all = store.list_recent(None, 10).await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn list_recent_orders_and_filters_by_brand() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteHistoryStore::new(dir.path().join("history.sqlite")).unwrap();

    store
        .put(metadata("acme.com", "older", 8), "doc".to_string())
        .await
        .unwrap();
    store
        .put(metadata("acme.com", "newer", 12), "doc".to_string())
        .await
        .unwrap();
    store
        .put(metadata("other.com", "unrelated", 10), "doc".to_string())
        .await
        .unwrap();

    let recent = store.list_recent(Some("acme.com"), 10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].query, "newer");
    assert_eq!(recent[1].query, "older");

    let limited = store.list_recent(None, 2).await.unwrap();
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn similarity_search_ranks_overlapping_documents() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteHistoryStore::new(dir.path().join("history.sqlite")).unwrap();

    store
        .put(
            metadata("acme.com", "crm tools", 9),
            "customer relationship management software for sales teams".to_string(),
        )
        .await
        .unwrap();
    store
        .put(
            metadata("acme.com", "hr tools", 10),
            "human resources onboarding platform".to_string(),
        )
        .await
        .unwrap();

    let hits = store
        .similarity_search("relationship management software", 5)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0.query, "crm tools");
    assert!(hits[0].1 > 0.0 && hits[0].1 <= 1.0);

    let none = store.similarity_search("quantum chromodynamics", 5).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn clear_removes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteHistoryStore::new(dir.path().join("history.sqlite")).unwrap();

    store
        .put(metadata("acme.com", "q", 9), "doc".to_string())
        .await
        .unwrap();
    assert_eq!(store.list_recent(None, 10).await.unwrap().len(), 1);

    let lock = store.lock_exclusive().unwrap();
    store.clear().await.unwrap();
    drop(lock);

    assert!(store.list_recent(None, 10).await.unwrap().is_empty());
}
