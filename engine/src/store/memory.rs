//! Volatile in-memory backend.

use super::{stamp, Acknowledgement, LocalStore, RecordFilter, StorageUsage, StoredCacheEntry, WriteMode};
use crate::clock::SharedClock;
use crate::{
    error::Result, Error, LocalId, LocalRecord, OwnerId, SyncState, Timestamp, UserSettings,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct Tables {
    records: BTreeMap<LocalId, LocalRecord>,
    next_id: LocalId,
    settings: HashMap<OwnerId, UserSettings>,
    cache: HashMap<String, StoredCacheEntry>,
}

impl Tables {
    fn rows(&self) -> usize {
        self.records.len() + self.settings.len() + self.cache.len()
    }
}

/// [`LocalStore`] kept in process memory.
///
/// Supports two injected faults: [`MemoryStore::set_unavailable`] makes every
/// call fail with [`Error::StoreUnavailable`], and [`MemoryStore::with_quota`]
/// caps the total row count, failing inserts with [`Error::QuotaExceeded`].
#[derive(Debug)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    clock: SharedClock,
    unavailable: AtomicBool,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            clock,
            unavailable: AtomicBool::new(false),
            quota: None,
        }
    }

    /// Limit the total number of rows across all tables.
    pub fn with_quota(mut self, max_rows: usize) -> Self {
        self.quota = Some(max_rows);
        self
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every record of every owner, by id. Test helper.
    pub fn snapshot(&self) -> Vec<LocalRecord> {
        self.lock_unchecked().records.values().cloned().collect()
    }

    fn lock_unchecked(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("memory store switched off".into()));
        }
        Ok(self.lock_unchecked())
    }

    fn ensure_room(&self, tables: &Tables) -> Result<()> {
        match self.quota {
            Some(max) if tables.rows() >= max => Err(Error::QuotaExceeded(format!(
                "memory store holds {max} rows"
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn put(&self, mut record: LocalRecord, mode: WriteMode) -> Result<LocalId> {
        let now = self.clock.now_ms();
        let mut tables = self.lock()?;
        stamp(&mut record, mode, now);

        let id = match record.id {
            Some(id) => {
                if !tables.records.contains_key(&id) {
                    return Err(Error::RecordNotFound(id));
                }
                id
            }
            None => {
                self.ensure_room(&tables)?;
                tables.next_id += 1;
                tables.next_id
            }
        };
        record.id = Some(id);
        tables.records.insert(id, record);
        Ok(id)
    }

    async fn get(&self, id: LocalId) -> Result<Option<LocalRecord>> {
        Ok(self.lock()?.records.get(&id).cloned())
    }

    async fn query(&self, owner: &str, filter: RecordFilter) -> Result<Vec<LocalRecord>> {
        let tables = self.lock()?;
        let mut records: Vec<_> = tables
            .records
            .values()
            .filter(|r| r.owner_id == owner && filter.matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(records)
    }

    async fn mark_synced(
        &self,
        pushed: &LocalRecord,
        remote_id: Option<&str>,
        remote_updated_at: Option<Timestamp>,
    ) -> Result<Acknowledgement> {
        let id = pushed.local_id()?;
        let mut tables = self.lock()?;
        let Some(current) = tables.records.get_mut(&id) else {
            return Ok(Acknowledgement::Missing);
        };
        if current.same_revision(pushed) {
            current.acknowledge(remote_id, remote_updated_at);
            Ok(Acknowledgement::Synced)
        } else {
            current.adopt_remote_id(remote_id);
            Ok(Acknowledgement::Superseded)
        }
    }

    async fn delete(&self, id: LocalId) -> Result<bool> {
        Ok(self.lock()?.records.remove(&id).is_some())
    }

    async fn put_settings(&self, owner: &str, settings: serde_json::Value) -> Result<()> {
        let now = self.clock.now_ms();
        let mut tables = self.lock()?;
        if !tables.settings.contains_key(owner) {
            self.ensure_room(&tables)?;
        }
        tables.settings.insert(
            owner.to_string(),
            UserSettings {
                owner_id: owner.to_string(),
                settings,
                updated_at: now,
                sync_state: SyncState::Pending,
            },
        );
        Ok(())
    }

    async fn get_settings(&self, owner: &str) -> Result<Option<UserSettings>> {
        Ok(self.lock()?.settings.get(owner).cloned())
    }

    async fn put_cache_entry(
        &self,
        key: &str,
        payload: serde_json::Value,
        ttl: Duration,
    ) -> Result<()> {
        let now = self.clock.now_ms();
        let mut tables = self.lock()?;
        if !tables.cache.contains_key(key) {
            self.ensure_room(&tables)?;
        }
        tables
            .cache
            .insert(key.to_string(), StoredCacheEntry::new(key, payload, now, ttl));
        Ok(())
    }

    async fn get_cache_entry(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let now = self.clock.now_ms();
        let mut tables = self.lock()?;
        match tables.cache.get(key) {
            Some(entry) if !entry.is_expired(now) => Ok(Some(entry.payload.clone())),
            Some(_) => {
                tables.cache.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn purge_expired_cache(&self) -> Result<usize> {
        let now = self.clock.now_ms();
        let mut tables = self.lock()?;
        let before = tables.cache.len();
        tables.cache.retain(|_, entry| !entry.is_expired(now));
        Ok(before - tables.cache.len())
    }

    async fn clear_all(&self) -> Result<()> {
        let mut tables = self.lock()?;
        tables.records.clear();
        tables.settings.clear();
        tables.cache.clear();
        Ok(())
    }

    async fn usage(&self) -> Result<StorageUsage> {
        let tables = self.lock()?;
        Ok(StorageUsage::new(
            tables.records.len(),
            tables.settings.len(),
            tables.cache.len(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, TimeSource};
    use crate::PendingAction;
    use serde_json::json;
    use std::sync::Arc;

    fn store() -> (Arc<ManualClock>, MemoryStore) {
        let (handle, clock) = ManualClock::shared(1_000);
        (handle, MemoryStore::new(clock))
    }

    #[tokio::test]
    async fn put_assigns_ids_and_marks_pending() {
        let (clock, store) = store();
        let id = store
            .put(LocalRecord::new_local("u1", json!({"t": 1}), 1_000), WriteMode::Local)
            .await
            .unwrap();
        assert_eq!(id, 1);

        clock.advance(Duration::from_secs(1));
        let mut record = store.get(id).await.unwrap().unwrap();
        record.payload = json!({"t": 2});
        store.put(record, WriteMode::Local).await.unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.updated_at, 2_000);
        assert_eq!(record.sync_state, SyncState::Pending);
    }

    #[tokio::test]
    async fn replacing_unknown_id_fails() {
        let (_, store) = store();
        let mut record = LocalRecord::new_local("u1", json!({}), 1_000);
        record.id = Some(42);
        let err = store.put(record, WriteMode::Local).await.unwrap_err();
        assert!(matches!(err, Error::RecordNotFound(42)));
    }

    #[tokio::test]
    async fn query_filters_by_owner_and_state() {
        let (_, store) = store();
        store
            .put(LocalRecord::new_local("u1", json!({}), 1), WriteMode::Local)
            .await
            .unwrap();
        let synced = store
            .put(LocalRecord::new_local("u1", json!({}), 2), WriteMode::Synced)
            .await
            .unwrap();
        store
            .put(LocalRecord::new_local("u2", json!({}), 3), WriteMode::Local)
            .await
            .unwrap();

        assert_eq!(store.query("u1", RecordFilter::All).await.unwrap().len(), 2);
        let pending = store.query("u1", RecordFilter::Pending).await.unwrap();
        assert_eq!(pending.len(), 1);
        let only_synced = store.query("u1", RecordFilter::Synced).await.unwrap();
        assert_eq!(only_synced[0].id, Some(synced));
    }

    #[tokio::test]
    async fn query_orders_newest_first() {
        let (_, store) = store();
        for created in [5, 9, 7] {
            store
                .put(LocalRecord::new_local("u1", json!({}), created), WriteMode::Local)
                .await
                .unwrap();
        }
        let created: Vec<_> = store
            .query("u1", RecordFilter::All)
            .await
            .unwrap()
            .iter()
            .map(|r| r.created_at)
            .collect();
        assert_eq!(created, vec![9, 7, 5]);
    }

    #[tokio::test]
    async fn mark_synced_sets_remote_id_once() {
        let (_, store) = store();
        let id = store
            .put(LocalRecord::new_local("u1", json!({}), 1), WriteMode::Local)
            .await
            .unwrap();
        let pushed = store.get(id).await.unwrap().unwrap();
        let ack = store.mark_synced(&pushed, Some("r-1"), Some(500)).await.unwrap();
        assert_eq!(ack, Acknowledgement::Synced);
        let pushed = store.get(id).await.unwrap().unwrap();
        store.mark_synced(&pushed, Some("r-2"), None).await.unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.remote_id.as_deref(), Some("r-1"));
        assert_eq!(record.sync_state, SyncState::Synced);
        assert_eq!(record.pending_action, PendingAction::None);
        assert_eq!(record.updated_at, 500);

        let found = store.find_by_remote_id("u1", "r-1").await.unwrap();
        assert_eq!(found.and_then(|r| r.id), Some(id));
        assert!(store.find_by_remote_id("u2", "r-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_synced_leaves_newer_edit_pending() {
        let (clock, store) = store();
        let id = store
            .put(LocalRecord::new_local("u1", json!({"v": 1}), 1), WriteMode::Local)
            .await
            .unwrap();
        let pushed = store.get(id).await.unwrap().unwrap();

        let mut edited = pushed.clone();
        edited.update_payload(json!({"v": 2}), clock.now_ms()).unwrap();
        store.put(edited, WriteMode::Local).await.unwrap();

        let ack = store.mark_synced(&pushed, Some("r-1"), Some(500)).await.unwrap();
        assert_eq!(ack, Acknowledgement::Superseded);
        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.remote_id.as_deref(), Some("r-1"));
        assert_eq!(record.payload, json!({"v": 2}));
        assert_eq!(record.sync_state, SyncState::Pending);
        assert_eq!(record.pending_action, PendingAction::Update);

        store.delete(id).await.unwrap();
        let ack = store.mark_synced(&pushed, Some("r-1"), None).await.unwrap();
        assert_eq!(ack, Acknowledgement::Missing);
    }

    #[tokio::test]
    async fn unavailable_store_errors() {
        let (_, store) = store();
        store.set_unavailable(true);
        let err = store.query("u1", RecordFilter::Pending).await.unwrap_err();
        assert!(err.is_storage());
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn quota_limits_new_rows() {
        let (_, clock) = ManualClock::shared(0);
        let store = MemoryStore::new(clock).with_quota(2);
        store
            .put(LocalRecord::new_local("u1", json!({}), 1), WriteMode::Local)
            .await
            .unwrap();
        store.put_settings("u1", json!({"theme": "dark"})).await.unwrap();

        let err = store
            .put(LocalRecord::new_local("u1", json!({}), 2), WriteMode::Local)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded(_)));

        // Replacing existing rows still works at quota.
        store.put_settings("u1", json!({"theme": "light"})).await.unwrap();
    }

    #[tokio::test]
    async fn settings_round_trip() {
        let (_, store) = store();
        assert!(store.get_settings("u1").await.unwrap().is_none());
        store.put_settings("u1", json!({"theme": "dark"})).await.unwrap();
        let settings = store.get_settings("u1").await.unwrap().unwrap();
        assert_eq!(settings.settings["theme"], "dark");
        assert_eq!(settings.sync_state, SyncState::Pending);
    }

    #[tokio::test]
    async fn cache_table_expires_lazily() {
        let (clock, store) = store();
        store
            .put_cache_entry("k", json!(1), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get_cache_entry("k").await.unwrap(), Some(json!(1)));

        clock.advance(Duration::from_secs(60));
        assert_eq!(store.usage().await.unwrap().cache_entries, 1);
        assert_eq!(store.get_cache_entry("k").await.unwrap(), None);
        assert_eq!(store.usage().await.unwrap().cache_entries, 0);
    }

    #[tokio::test]
    async fn purge_and_clear() {
        let (clock, store) = store();
        store
            .put_cache_entry("short", json!(1), Duration::from_secs(1))
            .await
            .unwrap();
        store
            .put_cache_entry("long", json!(2), Duration::from_secs(100))
            .await
            .unwrap();
        store
            .put(LocalRecord::new_local("u1", json!({}), 1), WriteMode::Local)
            .await
            .unwrap();
        clock.advance(Duration::from_secs(2));

        assert_eq!(store.purge_expired_cache().await.unwrap(), 1);
        assert_eq!(store.usage().await.unwrap(), StorageUsage::new(1, 0, 1));

        store.clear_all().await.unwrap();
        assert_eq!(store.usage().await.unwrap().total, 0);
    }
}
