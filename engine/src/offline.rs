//! Application-facing read and write paths.
//!
//! [`OfflineRecords`] is how application code writes domain records: every
//! write lands in the local store first (Pending) and drops the owner's cached
//! remote queries. [`CachedRemote`] fronts remote list queries with the
//! shared TTL cache.

use crate::cache::{cache_key, owner_pattern, SharedCache};
use crate::clock::SharedClock;
use crate::remote::{RemoteClient, RemoteRecord};
use crate::store::{LocalStore, RecordFilter, WriteMode};
use crate::{
    error::Result, DeleteDisposition, Error, LocalId, LocalRecord, UserSettings,
};
use std::sync::Arc;

/// Result of [`OfflineRecords::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// The record never reached the remote service and is gone.
    Purged,
    /// The record waits for the next sync to delete it remotely.
    MarkedForDeletion,
}

/// Local write façade for one resource kind.
pub struct OfflineRecords<S> {
    store: Arc<S>,
    cache: SharedCache,
    clock: SharedClock,
    kind: String,
}

impl<S: LocalStore> OfflineRecords<S> {
    /// `kind` names the resource in cache keys (e.g. `"diaries"`).
    pub fn new(
        store: Arc<S>,
        cache: SharedCache,
        clock: SharedClock,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            kind: kind.into(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Store a new record, Pending/Create.
    pub async fn create(&self, owner: &str, payload: serde_json::Value) -> Result<LocalRecord> {
        let mut record = LocalRecord::new_local(owner, payload, self.clock.now_ms());
        let id = self.store.put(record.clone(), WriteMode::Local).await?;
        record.id = Some(id);
        self.invalidate(owner).await;

        tracing::debug!(kind = %self.kind, owner, record_id = id, "record created locally");
        Ok(record)
    }

    /// Replace a record's payload with a local edit.
    pub async fn update(&self, id: LocalId, payload: serde_json::Value) -> Result<LocalRecord> {
        let mut record = self.store.get(id).await?.ok_or(Error::RecordNotFound(id))?;
        record.update_payload(payload, self.clock.now_ms())?;
        self.store.put(record.clone(), WriteMode::Local).await?;
        self.invalidate(&record.owner_id).await;

        tracing::debug!(
            kind = %self.kind,
            owner = %record.owner_id,
            record_id = id,
            action = record.pending_action.as_str(),
            "record updated locally"
        );
        Ok(record)
    }

    /// Delete a record. One that never reached the remote service is purged
    /// right away; otherwise it stays as a Delete-pending tombstone.
    pub async fn remove(&self, id: LocalId) -> Result<RemovalOutcome> {
        let mut record = self.store.get(id).await?.ok_or(Error::RecordNotFound(id))?;
        let outcome = match record.mark_deleted(self.clock.now_ms()) {
            DeleteDisposition::Purge => {
                self.store.delete(id).await?;
                RemovalOutcome::Purged
            }
            DeleteDisposition::Tombstone => {
                self.store.put(record.clone(), WriteMode::Local).await?;
                RemovalOutcome::MarkedForDeletion
            }
        };
        self.invalidate(&record.owner_id).await;

        tracing::debug!(kind = %self.kind, record_id = id, ?outcome, "record removed locally");
        Ok(outcome)
    }

    pub async fn get(&self, id: LocalId) -> Result<Option<LocalRecord>> {
        self.store.get(id).await
    }

    /// An owner's records, newest first, without Delete-pending tombstones.
    pub async fn list(&self, owner: &str) -> Result<Vec<LocalRecord>> {
        self.store.query(owner, RecordFilter::Visible).await
    }

    /// Records still waiting for reconciliation.
    pub async fn pending(&self, owner: &str) -> Result<Vec<LocalRecord>> {
        self.store.query(owner, RecordFilter::Pending).await
    }

    pub async fn save_settings(&self, owner: &str, settings: serde_json::Value) -> Result<()> {
        self.store.put_settings(owner, settings).await?;
        self.cache
            .write()
            .await
            .invalidate_by_pattern(&owner_pattern("settings", owner));
        Ok(())
    }

    pub async fn settings(&self, owner: &str) -> Result<Option<UserSettings>> {
        self.store.get_settings(owner).await
    }

    async fn invalidate(&self, owner: &str) {
        self.cache
            .write()
            .await
            .invalidate_by_pattern(&owner_pattern(&self.kind, owner));
    }
}

/// Remote list queries served through the TTL cache.
pub struct CachedRemote<R: ?Sized> {
    remote: Arc<R>,
    cache: SharedCache,
    kind: String,
}

impl<R: RemoteClient + ?Sized> CachedRemote<R> {
    pub fn new(remote: Arc<R>, cache: SharedCache, kind: impl Into<String>) -> Self {
        Self {
            remote,
            cache,
            kind: kind.into(),
        }
    }

    /// List an owner's remote records, using a live cached copy unless
    /// `force_refresh` is set. A fetched list replaces the cached one.
    pub async fn list(&self, owner: &str, force_refresh: bool) -> Result<Vec<RemoteRecord>> {
        let key = cache_key(&self.kind, owner, &[]);

        if !force_refresh {
            if let Some(cached) = self.cache.write().await.get(&key) {
                tracing::trace!(key = %key, "cache hit");
                return Ok(serde_json::from_value(cached)?);
            }
        }

        let records = self.remote.list(owner).await?;
        self.cache
            .write()
            .await
            .set(key, serde_json::to_value(&records)?);
        Ok(records)
    }

    /// Drop every cached query of this kind for `owner`.
    pub async fn invalidate(&self, owner: &str) -> usize {
        self.cache
            .write()
            .await
            .invalidate_by_pattern(&owner_pattern(&self.kind, owner))
    }
}
