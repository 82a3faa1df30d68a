//! Record types held in the local tables.

use crate::{
    error::Result, remote::RemoteRecord, Error, LocalId, OwnerId, RemoteId, Timestamp,
};
use serde::{Deserialize, Serialize};

/// Whether a local row matches what the remote service last acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Acknowledged by the remote service
    Synced,
    /// Carries a local change not yet pushed
    Pending,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Synced => "synced",
            SyncState::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "synced" => Some(SyncState::Synced),
            "pending" => Some(SyncState::Pending),
            _ => None,
        }
    }
}

/// The outstanding local mutation of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingAction {
    #[default]
    None,
    Create,
    Update,
    Delete,
}

impl PendingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingAction::None => "none",
            PendingAction::Create => "create",
            PendingAction::Update => "update",
            PendingAction::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(PendingAction::None),
            "create" => Some(PendingAction::Create),
            "update" => Some(PendingAction::Update),
            "delete" => Some(PendingAction::Delete),
            _ => None,
        }
    }
}

/// What a local delete turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteDisposition {
    /// Never reached the remote service; drop the row now.
    Purge,
    /// Exists remotely; keep a Delete-pending row until the remote delete lands.
    Tombstone,
}

/// A domain record mirrored in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRecord {
    /// Store-assigned surrogate id; `None` until first saved
    pub id: Option<LocalId>,
    /// Remote id, set once the remote create is acknowledged
    pub remote_id: Option<RemoteId>,
    /// Owning user
    pub owner_id: OwnerId,
    /// Domain fields (JSON object)
    pub payload: serde_json::Value,
    /// Creation time (ms since epoch)
    pub created_at: Timestamp,
    /// Last modification time (ms since epoch)
    pub updated_at: Timestamp,
    pub sync_state: SyncState,
    pub pending_action: PendingAction,
}

impl LocalRecord {
    /// A brand new record written locally, waiting for its remote create.
    pub fn new_local(
        owner_id: impl Into<OwnerId>,
        payload: serde_json::Value,
        now: Timestamp,
    ) -> Self {
        Self {
            id: None,
            remote_id: None,
            owner_id: owner_id.into(),
            payload,
            created_at: now,
            updated_at: now,
            sync_state: SyncState::Pending,
            pending_action: PendingAction::Create,
        }
    }

    /// A record pulled from the remote service, already in agreement with it.
    pub fn from_remote(remote: &RemoteRecord) -> Self {
        Self {
            id: None,
            remote_id: Some(remote.id.clone()),
            owner_id: remote.owner_id.clone(),
            payload: remote.payload.clone(),
            created_at: remote.created_at,
            updated_at: remote.updated_at,
            sync_state: SyncState::Synced,
            pending_action: PendingAction::None,
        }
    }

    /// The store id, or [`Error::Unsaved`] for a record never put.
    pub fn local_id(&self) -> Result<LocalId> {
        self.id.ok_or(Error::Unsaved)
    }

    pub fn is_pending(&self) -> bool {
        self.sync_state == SyncState::Pending
    }

    /// Whether the record is waiting for deletion (terminal).
    pub fn is_deleted(&self) -> bool {
        self.pending_action == PendingAction::Delete
    }

    /// Replace the payload with a local edit.
    ///
    /// A record that never reached the remote service stays a Create; any
    /// other record becomes an Update. Records pending deletion reject edits.
    pub fn update_payload(&mut self, payload: serde_json::Value, now: Timestamp) -> Result<()> {
        if self.is_deleted() {
            return Err(Error::RecordDeleted(self.id.unwrap_or_default()));
        }
        self.payload = payload;
        self.updated_at = now;
        self.sync_state = SyncState::Pending;
        self.pending_action = match self.remote_id {
            None => PendingAction::Create,
            Some(_) => PendingAction::Update,
        };
        Ok(())
    }

    /// Mark the record deleted locally. Delete overrides any prior action.
    pub fn mark_deleted(&mut self, now: Timestamp) -> DeleteDisposition {
        self.updated_at = now;
        self.sync_state = SyncState::Pending;
        self.pending_action = PendingAction::Delete;
        match self.remote_id {
            None => DeleteDisposition::Purge,
            Some(_) => DeleteDisposition::Tombstone,
        }
    }

    /// Record the remote service's acknowledgement of the pending action.
    ///
    /// The remote id is only ever assigned once; later acknowledgements keep
    /// the existing one.
    pub fn acknowledge(&mut self, remote_id: Option<&str>, remote_updated_at: Option<Timestamp>) {
        if self.remote_id.is_none() {
            self.remote_id = remote_id.map(str::to_owned);
        }
        if let Some(ts) = remote_updated_at {
            self.updated_at = ts;
        }
        self.sync_state = SyncState::Synced;
        self.pending_action = PendingAction::None;
    }

    /// Whether `other` carries the same local revision: same payload, same
    /// edit time and same pending action.
    pub fn same_revision(&self, other: &LocalRecord) -> bool {
        self.updated_at == other.updated_at
            && self.pending_action == other.pending_action
            && self.payload == other.payload
    }

    /// Take the remote id of a push that a newer local edit has overtaken.
    /// The record stays Pending; a Create becomes an Update.
    pub fn adopt_remote_id(&mut self, remote_id: Option<&str>) {
        if self.remote_id.is_none() {
            self.remote_id = remote_id.map(str::to_owned);
        }
        if self.remote_id.is_some() && self.pending_action == PendingAction::Create {
            self.pending_action = PendingAction::Update;
        }
    }

    /// Overwrite local content with a newer remote copy.
    pub fn apply_remote(&mut self, remote: &RemoteRecord) {
        self.payload = remote.payload.clone();
        self.updated_at = remote.updated_at;
        self.sync_state = SyncState::Synced;
        self.pending_action = PendingAction::None;
    }
}

/// Per-user settings row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    pub owner_id: OwnerId,
    pub settings: serde_json::Value,
    pub updated_at: Timestamp,
    pub sync_state: SyncState,
}
