//! The remote record service, as seen by the sync engine.
//!
//! The engine depends only on [`RemoteClient`]; transports implement it.
//! [`HttpRemoteClient`] talks to `offsync-server`. With the `test-util`
//! feature, `InMemoryRemote` is a scriptable stand-in for tests and benchmarks.

mod http;
#[cfg(any(test, feature = "test-util"))]
mod memory;

pub use http::HttpRemoteClient;
#[cfg(any(test, feature = "test-util"))]
pub use memory::{InMemoryRemote, RemoteOp};

use crate::{error::RemoteError, OwnerId, RemoteId, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A record as stored by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub id: RemoteId,
    pub owner_id: OwnerId,
    pub payload: serde_json::Value,
    pub created_at: Timestamp,
    /// Set by the remote service on every write
    pub updated_at: Timestamp,
}

/// Body of a remote create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDraft {
    pub owner_id: OwnerId,
    pub payload: serde_json::Value,
    /// Local creation time, preserved remotely
    pub created_at: Timestamp,
}

/// Body of a remote update (full payload replacement).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    pub payload: serde_json::Value,
}

/// Narrow contract over the remote record service.
///
/// Every call either succeeds or fails with a [`RemoteError`] distinguishing
/// not-found, conflict, and everything else.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn create(&self, draft: &RecordDraft) -> Result<RemoteRecord, RemoteError>;

    async fn update(&self, id: &str, patch: &RecordPatch) -> Result<RemoteRecord, RemoteError>;

    async fn delete(&self, id: &str) -> Result<(), RemoteError>;

    async fn get(&self, id: &str) -> Result<RemoteRecord, RemoteError>;

    /// All records of one owner, newest first.
    async fn list(&self, owner: &str) -> Result<Vec<RemoteRecord>, RemoteError>;
}
