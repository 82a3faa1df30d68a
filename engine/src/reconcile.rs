//! Reconciliation between the local store and the remote service.
//!
//! # Algorithm
//!
//! 1. Guard: refuse to run while offline or while another run is in flight
//! 2. Push every Pending record of the owner (create, update or delete)
//! 3. Pull the owner's remote records and merge them into Synced copies
//! 4. Purge expired cache entries (in memory and persisted)
//!
//! Remote failures are per record: they are collected into
//! [`SyncResult::errors`] and the loop moves on. Local store failures abort
//! the run. Conflicts are resolved local-wins.
//!
//! Local writes may land while a remote call is in flight. An acknowledgement
//! only marks a record Synced if it still holds the pushed revision; a newer
//! edit stays pending for the next run, and a record purged during its own
//! create has its fresh remote copy deleted again.

use crate::cache::SharedCache;
use crate::config::{ConflictReporting, SyncConfig};
use crate::error::RemoteError;
use crate::network::ConnectivityReceiver;
use crate::remote::{RecordDraft, RecordPatch, RemoteClient};
use crate::store::{Acknowledgement, LocalStore, RecordFilter, WriteMode};
use crate::{error::Result, Error, LocalRecord, PendingAction};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::Instrument;

/// Reason reported when a run is refused for lack of connectivity.
pub const OFFLINE_REASON: &str = "offline";

/// Reason reported when a run is refused because another is in flight.
pub const BUSY_REASON: &str = "sync already in progress";

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// No errors were recorded
    pub success: bool,
    /// Pending records settled: acknowledged remotely, or purged locally
    /// when they never reached the remote service
    pub synced_count: usize,
    pub errors: Vec<String>,
    /// Detected write/write conflicts (see [`ConflictReporting`])
    pub conflicts: usize,
}

impl SyncResult {
    fn started() -> Self {
        Self {
            success: true,
            synced_count: 0,
            errors: Vec::new(),
            conflicts: 0,
        }
    }

    /// A run that did nothing and failed for `reason`.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            synced_count: 0,
            errors: vec![reason.into()],
            conflicts: 0,
        }
    }

    pub fn offline() -> Self {
        Self::failed(OFFLINE_REASON)
    }

    pub fn busy() -> Self {
        Self::failed(BUSY_REASON)
    }

    /// Whether the run was refused by the in-flight guard.
    pub fn is_busy(&self) -> bool {
        !self.success && self.errors.len() == 1 && self.errors[0] == BUSY_REASON
    }

    /// Whether the run was refused for lack of connectivity.
    pub fn is_offline(&self) -> bool {
        !self.success && self.errors.len() == 1 && self.errors[0] == OFFLINE_REASON
    }

    fn record_error(&mut self, error: String) {
        self.success = false;
        self.errors.push(error);
    }
}

/// Whether a run is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
}

/// Flips [`RunState`] back to Idle when dropped, so a cancelled run future
/// still releases the engine.
struct RunGuard<'a> {
    state: &'a Mutex<RunState>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = RunState::Idle;
    }
}

/// What pushing one record did.
enum Pushed {
    Acknowledged,
    Purged,
    /// A local write landed during the remote call; the record stays pending.
    Superseded,
    /// The record was purged locally during its create; the remote copy was removed.
    Withdrawn,
}

/// Drives the push/pull protocol for one local store and one remote service.
pub struct SyncEngine<S: ?Sized, R: ?Sized> {
    store: Arc<S>,
    remote: Arc<R>,
    cache: SharedCache,
    connectivity: ConnectivityReceiver,
    config: SyncConfig,
    state: Mutex<RunState>,
}

impl<S, R> SyncEngine<S, R>
where
    S: LocalStore + ?Sized,
    R: RemoteClient + ?Sized,
{
    pub fn new(
        store: Arc<S>,
        remote: Arc<R>,
        cache: SharedCache,
        connectivity: ConnectivityReceiver,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            remote,
            cache,
            connectivity,
            config,
            state: Mutex::new(RunState::Idle),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Whether a run currently holds the in-flight guard.
    pub fn is_running(&self) -> bool {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) == RunState::Running
    }

    fn is_online(&self) -> bool {
        self.connectivity.borrow().is_online()
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            RunState::Running => None,
            RunState::Idle => {
                *state = RunState::Running;
                Some(RunGuard { state: &self.state })
            }
        }
    }

    /// Reconcile every Pending record of `owner`, then pull remote changes.
    ///
    /// Never returns an error: failures are reported through the result.
    pub async fn sync(&self, owner: &str) -> SyncResult {
        if !self.is_online() {
            tracing::debug!(owner, "sync skipped: offline");
            return SyncResult::offline();
        }
        let Some(_guard) = self.try_begin() else {
            tracing::debug!(owner, "sync skipped: already running");
            return SyncResult::busy();
        };

        let span = tracing::info_span!("sync", owner);
        let result = self.run(owner).instrument(span).await;

        tracing::info!(
            owner,
            success = result.success,
            synced = result.synced_count,
            errors = result.errors.len(),
            conflicts = result.conflicts,
            "sync finished"
        );
        result
    }

    async fn run(&self, owner: &str) -> SyncResult {
        let pending = match self.store.query(owner, RecordFilter::Pending).await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!(error = %e, "failed to load pending records");
                return SyncResult::failed(format!("failed to load pending records: {e}"));
            }
        };
        tracing::debug!(pending = pending.len(), "pushing local changes");

        let mut result = SyncResult::started();
        for record in &pending {
            match self.push(record, &mut result).await {
                Ok(Pushed::Acknowledged | Pushed::Purged) => result.synced_count += 1,
                Ok(Pushed::Superseded | Pushed::Withdrawn) => {}
                Err(e) if e.is_storage() => {
                    tracing::error!(record_id = ?record.id, error = %e, "local store failed");
                    result.record_error(format!("local store failure: {e}"));
                    return result;
                }
                Err(e) => {
                    tracing::warn!(record_id = ?record.id, error = %e, "record sync failed");
                    result.record_error(format!("record {}: {e}", describe(record)));
                }
            }
        }

        match self.pull(owner).await {
            Ok(merged) => tracing::debug!(merged, "pulled remote changes"),
            Err(e) => {
                tracing::warn!(error = %e, "pull failed");
                result.record_error(format!("pull failed: {e}"));
                return result;
            }
        }

        if let Err(e) = self.housekeeping().await {
            tracing::warn!(error = %e, "cache housekeeping failed");
            result.record_error(format!("cache housekeeping failed: {e}"));
        }
        result
    }

    async fn push(&self, record: &LocalRecord, result: &mut SyncResult) -> Result<Pushed> {
        let id = record.local_id()?;

        match (record.pending_action, record.remote_id.as_deref()) {
            (PendingAction::Delete, None) => {
                self.store.delete(id).await?;
                tracing::debug!(record_id = id, "purged local-only record");
                Ok(Pushed::Purged)
            }
            (PendingAction::Delete, Some(remote_id)) => {
                match self.remote.delete(remote_id).await {
                    Ok(()) | Err(RemoteError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
                self.store.delete(id).await?;
                tracing::debug!(record_id = id, remote_id, "deleted remotely");
                Ok(Pushed::Acknowledged)
            }
            (PendingAction::Create, _) | (PendingAction::None, None) => {
                let draft = RecordDraft {
                    owner_id: record.owner_id.clone(),
                    payload: record.payload.clone(),
                    created_at: record.created_at,
                };
                let created = self.remote.create(&draft).await?;
                let ack = self
                    .store
                    .mark_synced(record, Some(&created.id), Some(created.updated_at))
                    .await?;
                tracing::debug!(
                    record_id = id,
                    remote_id = %created.id,
                    ?ack,
                    "created remotely"
                );
                match ack {
                    Acknowledgement::Synced => Ok(Pushed::Acknowledged),
                    Acknowledgement::Superseded => Ok(Pushed::Superseded),
                    Acknowledgement::Missing => {
                        match self.remote.delete(&created.id).await {
                            Ok(()) | Err(RemoteError::NotFound(_)) => {}
                            Err(e) => return Err(e.into()),
                        }
                        tracing::debug!(
                            record_id = id,
                            remote_id = %created.id,
                            "record deleted during create, withdrew remote copy"
                        );
                        Ok(Pushed::Withdrawn)
                    }
                }
            }
            (PendingAction::Update, None) => Err(Error::MissingRemoteId(id)),
            (PendingAction::Update, Some(remote_id)) | (PendingAction::None, Some(remote_id)) => {
                let current = self.remote.get(remote_id).await?;
                if current.updated_at > record.updated_at {
                    tracing::warn!(
                        record_id = id,
                        remote_id,
                        local_updated_at = record.updated_at,
                        remote_updated_at = current.updated_at,
                        "conflict detected, keeping local changes"
                    );
                    if self.config.conflict_reporting == ConflictReporting::Counted {
                        result.conflicts += 1;
                    }
                }

                let patch = RecordPatch {
                    payload: record.payload.clone(),
                };
                let updated = self.remote.update(remote_id, &patch).await?;
                let ack = self
                    .store
                    .mark_synced(record, None, Some(updated.updated_at))
                    .await?;
                tracing::debug!(record_id = id, remote_id, ?ack, "updated remotely");
                match ack {
                    Acknowledgement::Synced => Ok(Pushed::Acknowledged),
                    Acknowledgement::Superseded | Acknowledgement::Missing => {
                        Ok(Pushed::Superseded)
                    }
                }
            }
        }
    }

    /// Merge the owner's remote records into the local store. Returns how
    /// many local rows were inserted or overwritten.
    async fn pull(&self, owner: &str) -> Result<usize> {
        let remote_records = self.remote.list(owner).await?;
        let mut merged = 0;

        for remote in &remote_records {
            match self.store.find_by_remote_id(owner, &remote.id).await? {
                None => {
                    self.store
                        .put(LocalRecord::from_remote(remote), WriteMode::Synced)
                        .await?;
                    merged += 1;
                }
                Some(mut local) if !local.is_pending() && remote.updated_at > local.updated_at => {
                    local.apply_remote(remote);
                    self.store.put(local, WriteMode::Synced).await?;
                    merged += 1;
                }
                Some(_) => {}
            }
        }
        Ok(merged)
    }

    async fn housekeeping(&self) -> Result<()> {
        let in_memory = self.cache.write().await.purge_expired();
        let persisted = self.store.purge_expired_cache().await?;
        if in_memory + persisted > 0 {
            tracing::debug!(in_memory, persisted, "purged expired cache entries");
        }
        Ok(())
    }
}

fn describe(record: &LocalRecord) -> String {
    match (&record.id, &record.remote_id) {
        (Some(id), Some(remote_id)) => format!("{id} ({remote_id})"),
        (Some(id), None) => id.to_string(),
        (None, _) => "<unsaved>".into(),
    }
}
