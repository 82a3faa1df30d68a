//! # Offsync Engine
//!
//! Offline-first persistence and synchronization for client applications.
//!
//! Writes land in a durable local store first and are pushed to a remote
//! record service whenever connectivity allows; remote changes are pulled back
//! into the same store. A bounded TTL cache fronts read queries that go to the
//! remote service directly.
//!
//! ## Components
//!
//! - [`store`]: the local table store ([`LocalStore`]) with an in-memory and a
//!   SQLite backend. Records carry a [`SyncState`] and a [`PendingAction`].
//! - [`cache`]: [`TtlCache`], capacity-bounded with oldest-first eviction and
//!   lazy expiry.
//! - [`reconcile`]: [`SyncEngine`], the push/pull protocol. Local edits win
//!   over newer remote copies; per-record remote failures are collected, not
//!   fatal.
//! - [`trigger`]: [`TriggerCoordinator`], which decides when the engine runs
//!   (startup, reconnect, interval, manual request, backoff retry).
//! - [`offline`]: [`OfflineRecords`], the write API application code uses, and
//!   [`CachedRemote`] for cached remote reads.
//! - [`remote`]: the [`RemoteClient`] contract plus an HTTP client. The
//!   `test-util` feature adds `InMemoryRemote`, a scriptable in-process service.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use offsync_engine::{
//!     network, CacheConfig, Connectivity, HttpRemoteClient, OfflineRecords, SqliteStore,
//!     SyncConfig, SyncEngine, SystemClock, TtlCache,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn demo() -> offsync_engine::error::Result<()> {
//! let clock = SystemClock::shared();
//! let store = Arc::new(SqliteStore::open("offsync.db", clock.clone()).await?);
//! let remote = Arc::new(HttpRemoteClient::new("http://localhost:3000")?);
//! let cache = TtlCache::shared(CacheConfig::default(), clock.clone());
//! let (_online, connectivity) = network::channel(Connectivity::Online);
//!
//! let diaries = OfflineRecords::new(store.clone(), cache.clone(), clock, "diaries");
//! diaries.create("user-1", json!({"title": "First entry"})).await?;
//!
//! let engine = SyncEngine::new(store, remote, cache, connectivity, SyncConfig::default());
//! let result = engine.sync("user-1").await;
//! assert!(result.success);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod network;
pub mod offline;
pub mod reconcile;
pub mod record;
pub mod remote;
pub mod store;
pub mod trigger;

// Re-export main types at crate root
pub use cache::{cache_key, owner_pattern, CacheEntry, CacheStats, SharedCache, TtlCache};
pub use clock::{ManualClock, SharedClock, SystemClock, TimeSource};
pub use config::{
    CacheConfig, ConflictReporting, EngineConfig, RetryPolicy, SyncConfig, TriggerConfig,
};
pub use error::{Error, RemoteError};
pub use network::Connectivity;
pub use offline::{CachedRemote, OfflineRecords, RemovalOutcome};
pub use reconcile::{SyncEngine, SyncResult};
pub use record::{DeleteDisposition, LocalRecord, PendingAction, SyncState, UserSettings};
#[cfg(any(test, feature = "test-util"))]
pub use remote::InMemoryRemote;
pub use remote::{HttpRemoteClient, RemoteClient, RemoteRecord};
pub use store::{
    Acknowledgement, LocalStore, MemoryStore, RecordFilter, SqliteStore, StorageUsage, WriteMode,
};
pub use trigger::{last_sync_result, TriggerCoordinator, TriggerHandle};

/// Type aliases for clarity
pub type LocalId = i64;
pub type RemoteId = String;
pub type OwnerId = String;
/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;
