//! Edge case tests for offsync-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use offsync_engine::{
    cache_key, network, CacheConfig, Connectivity, InMemoryRemote, LocalRecord, LocalStore,
    ManualClock, MemoryStore, OfflineRecords, SqliteStore, SyncConfig, SyncEngine, TtlCache,
    WriteMode,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn sqlite() -> SqliteStore {
    let (_, clock) = ManualClock::shared(1_000);
    SqliteStore::open_in_memory(clock).await.unwrap()
}

// ============================================================================
// Payload Edge Cases
// ============================================================================

#[tokio::test]
async fn unicode_payloads_round_trip() {
    let store = sqlite().await;

    let titles = vec![
        "日本語テスト",
        "Привет мир",
        "مرحبا بالعالم",
        "🎉🚀💯",
        "Hello\nWorld\tTab",
        "",
    ];

    for title in &titles {
        let id = store
            .put(
                LocalRecord::new_local("user1", json!({"title": title}), 1),
                WriteMode::Local,
            )
            .await
            .unwrap();
        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.payload["title"], *title);
    }
}

#[tokio::test]
async fn deeply_nested_payload() {
    let store = sqlite().await;
    let mut payload = json!({"leaf": true});
    for depth in 0..64 {
        payload = json!({ "depth": depth, "child": payload });
    }

    let id = store
        .put(LocalRecord::new_local("user1", payload.clone(), 1), WriteMode::Local)
        .await
        .unwrap();
    assert_eq!(store.get(id).await.unwrap().unwrap().payload, payload);
}

#[tokio::test]
async fn very_large_payload() {
    let store = sqlite().await;
    let body = "x".repeat(1_000_000);
    let id = store
        .put(LocalRecord::new_local("user1", json!({"body": body}), 1), WriteMode::Local)
        .await
        .unwrap();
    let record = store.get(id).await.unwrap().unwrap();
    assert_eq!(record.payload["body"].as_str().map(str::len), Some(1_000_000));
}

// ============================================================================
// Owner Edge Cases
// ============================================================================

#[tokio::test]
async fn owners_with_special_characters_stay_isolated() {
    let store = sqlite().await;
    let owners = ["user'1", "user\"2", "user 3", "user%4", "user_5"];
    for owner in owners {
        store
            .put(LocalRecord::new_local(owner, json!({}), 1), WriteMode::Local)
            .await
            .unwrap();
    }
    for owner in owners {
        let records = store.query(owner, Default::default()).await.unwrap();
        assert_eq!(records.len(), 1, "owner {owner:?}");
    }
}

#[test]
fn cache_key_with_params() {
    assert_eq!(
        cache_key("diaries", "user1", &[("page", "2"), ("tag", "work")]),
        "diaries_user1_page=2_tag=work"
    );
    assert_eq!(cache_key("diaries", "user1", &[]), "diaries_user1");
}

// ============================================================================
// Cache Boundaries
// ============================================================================

#[tokio::test]
async fn capacity_one_cache_keeps_latest() {
    let (_, clock) = ManualClock::shared(0);
    let mut cache = TtlCache::new(CacheConfig::default().with_capacity(1), clock);
    cache.set("a", 1);
    cache.set("b", 2);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("b"), Some(2));
    assert_eq!(cache.get("a"), None);
}

#[tokio::test]
async fn entry_expires_exactly_at_ttl() {
    let (clock, shared) = ManualClock::shared(0);
    let mut cache = TtlCache::new(CacheConfig::default(), shared);
    cache.set_with_ttl("k", "v", Duration::from_millis(10));

    clock.set(9);
    assert_eq!(cache.get("k"), Some("v"));
    clock.set(10);
    assert_eq!(cache.get("k"), None);
    assert!(cache.is_empty());
}

// ============================================================================
// Volume
// ============================================================================

#[tokio::test]
async fn many_pending_records_sync_in_one_run() {
    let (_, clock) = ManualClock::shared(1_000);
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let remote = Arc::new(InMemoryRemote::new(clock.clone()));
    let cache = TtlCache::shared(CacheConfig::default(), clock.clone());
    let diaries = OfflineRecords::new(store.clone(), cache.clone(), clock, "diaries");

    for i in 0..500 {
        diaries.create("user1", json!({"n": i})).await.unwrap();
    }

    let (_online, rx) = network::channel(Connectivity::Online);
    let engine = SyncEngine::new(store, remote.clone(), cache, rx, SyncConfig::default());
    let result = engine.sync("user1").await;
    assert!(result.success);
    assert_eq!(result.synced_count, 500);
    assert_eq!(remote.records().len(), 500);
    assert!(diaries.pending("user1").await.unwrap().is_empty());
    assert_eq!(diaries.list("user1").await.unwrap().len(), 500);
}

#[tokio::test]
async fn sync_for_unknown_owner_is_a_clean_no_op() {
    let (_, clock) = ManualClock::shared(1_000);
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let remote = Arc::new(InMemoryRemote::new(clock.clone()));
    let cache = TtlCache::shared(CacheConfig::default(), clock);
    let (_online, rx) = network::channel(Connectivity::Online);
    let engine = SyncEngine::new(store, remote, cache, rx, SyncConfig::default());

    let result = engine.sync("nobody").await;
    assert!(result.success);
    assert_eq!(result.synced_count, 0);
    assert!(result.errors.is_empty());
}
