//! Durable local tables.
//!
//! A [`LocalStore`] holds three tables: domain records, per-user settings, and
//! persisted cache entries. Every operation is local-only; none depends on
//! connectivity. Storage failures surface as [`crate::Error::StoreUnavailable`],
//! [`crate::Error::QuotaExceeded`] or [`crate::Error::Database`].
//!
//! Two backends ship with the crate: [`MemoryStore`] (volatile, with fault
//! injection for tests) and [`SqliteStore`] (durable across restarts).

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::cache::CacheEntry;
use crate::{
    error::Result, LocalId, LocalRecord, SyncState, Timestamp, UserSettings,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a record write treats sync markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// A local edit: `updated_at` becomes now, state becomes Pending.
    Local,
    /// Reconciliation output: stored as given, state Synced, no pending action.
    Synced,
}

/// Which records of an owner a query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordFilter {
    #[default]
    All,
    Pending,
    Synced,
    /// Everything except records waiting for deletion
    Visible,
}

impl RecordFilter {
    pub fn matches(&self, record: &LocalRecord) -> bool {
        match self {
            RecordFilter::All => true,
            RecordFilter::Pending => record.sync_state == SyncState::Pending,
            RecordFilter::Synced => record.sync_state == SyncState::Synced,
            RecordFilter::Visible => !record.is_deleted(),
        }
    }
}

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsage {
    pub records: usize,
    pub settings: usize,
    pub cache_entries: usize,
    pub total: usize,
}

impl StorageUsage {
    pub fn new(records: usize, settings: usize, cache_entries: usize) -> Self {
        Self {
            records,
            settings,
            cache_entries,
            total: records + settings + cache_entries,
        }
    }
}

/// What a remote acknowledgement did to the local row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// The row matched the pushed copy and is now Synced.
    Synced,
    /// The row changed while the push was in flight and stays Pending.
    Superseded,
    /// The row no longer exists.
    Missing,
}

/// The local table store contract.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Insert (`id == None`) or replace a record; returns its id.
    async fn put(&self, record: LocalRecord, mode: WriteMode) -> Result<LocalId>;

    async fn get(&self, id: LocalId) -> Result<Option<LocalRecord>>;

    /// Records of one owner matching `filter`, newest `created_at` first.
    async fn query(&self, owner: &str, filter: RecordFilter) -> Result<Vec<LocalRecord>>;

    /// The record of `owner` carrying `remote_id`, if any.
    async fn find_by_remote_id(&self, owner: &str, remote_id: &str)
        -> Result<Option<LocalRecord>> {
        Ok(self
            .query(owner, RecordFilter::All)
            .await?
            .into_iter()
            .find(|r| r.remote_id.as_deref() == Some(remote_id)))
    }

    /// Apply the remote acknowledgement of `pushed`, the copy a push was
    /// built from.
    ///
    /// The row is only marked Synced if it still matches `pushed`. A row
    /// edited in the meantime keeps its pending state and only gains the
    /// remote id (assigned once), turning a Create into an Update.
    async fn mark_synced(
        &self,
        pushed: &LocalRecord,
        remote_id: Option<&str>,
        remote_updated_at: Option<Timestamp>,
    ) -> Result<Acknowledgement>;

    /// Remove a record outright. Returns whether it existed.
    async fn delete(&self, id: LocalId) -> Result<bool>;

    /// Replace an owner's settings, marking them Pending.
    async fn put_settings(&self, owner: &str, settings: serde_json::Value) -> Result<()>;

    async fn get_settings(&self, owner: &str) -> Result<Option<UserSettings>>;

    /// Insert or replace a persisted cache entry.
    async fn put_cache_entry(
        &self,
        key: &str,
        payload: serde_json::Value,
        ttl: Duration,
    ) -> Result<()>;

    /// A live persisted cache value. An expired entry is deleted and reported absent.
    async fn get_cache_entry(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Drop every expired persisted cache entry; returns how many.
    async fn purge_expired_cache(&self) -> Result<usize>;

    /// Empty all three tables.
    async fn clear_all(&self) -> Result<()>;

    async fn usage(&self) -> Result<StorageUsage>;
}

/// Apply [`WriteMode`] to a record about to be written.
pub(crate) fn stamp(record: &mut LocalRecord, mode: WriteMode, now: Timestamp) {
    match mode {
        WriteMode::Local => {
            record.updated_at = now;
            record.sync_state = SyncState::Pending;
        }
        WriteMode::Synced => {
            record.sync_state = SyncState::Synced;
            record.pending_action = crate::PendingAction::None;
        }
    }
}

/// Cache entry as persisted in the cache table.
pub type StoredCacheEntry = CacheEntry<serde_json::Value>;
