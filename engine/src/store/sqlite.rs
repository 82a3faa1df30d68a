//! Durable SQLite backend.

use super::{stamp, Acknowledgement, LocalStore, RecordFilter, StorageUsage, WriteMode};
use crate::clock::{add_duration, SharedClock};
use crate::{
    error::Result, Error, LocalId, LocalRecord, PendingAction, SyncState, Timestamp,
    UserSettings,
};
use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{FromRow, Row};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const RECORD_COLUMNS: &str = "id, remote_id, owner_id, payload, created_at, updated_at, \
                              sync_state, pending_action";

/// A stored record row.
#[derive(Debug)]
struct StoredRecord {
    id: i64,
    remote_id: Option<String>,
    owner_id: String,
    payload: String,
    created_at: i64,
    updated_at: i64,
    sync_state: String,
    pending_action: String,
}

impl<'r> FromRow<'r, SqliteRow> for StoredRecord {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredRecord {
            id: row.try_get("id")?,
            remote_id: row.try_get("remote_id")?,
            owner_id: row.try_get("owner_id")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            sync_state: row.try_get("sync_state")?,
            pending_action: row.try_get("pending_action")?,
        })
    }
}

impl StoredRecord {
    fn into_record(self) -> Result<LocalRecord> {
        let sync_state = SyncState::parse(&self.sync_state)
            .ok_or_else(|| corrupt(format!("unknown sync state {:?}", self.sync_state)))?;
        let pending_action = PendingAction::parse(&self.pending_action)
            .ok_or_else(|| corrupt(format!("unknown pending action {:?}", self.pending_action)))?;

        Ok(LocalRecord {
            id: Some(self.id),
            remote_id: self.remote_id,
            owner_id: self.owner_id,
            payload: serde_json::from_str(&self.payload)?,
            created_at: self.created_at as Timestamp,
            updated_at: self.updated_at as Timestamp,
            sync_state,
            pending_action,
        })
    }
}

fn corrupt(msg: String) -> Error {
    Error::Database(sqlx::Error::Decode(msg.into()))
}

/// Sort a sqlx failure into the store error kinds.
fn storage_error(err: sqlx::Error) -> Error {
    // Primary SQLite result codes: 5 BUSY, 6 LOCKED, 13 FULL, 14 CANTOPEN.
    let primary_code = match &err {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|c| c.parse::<i32>().ok())
            .map(|c| c & 0xff),
        _ => None,
    };

    match (&err, primary_code) {
        (_, Some(13)) => Error::QuotaExceeded(err.to_string()),
        (_, Some(5 | 6 | 14)) => Error::StoreUnavailable(err.to_string()),
        (sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_), _) => {
            Error::StoreUnavailable(err.to_string())
        }
        _ => Error::Database(err),
    }
}

/// [`LocalStore`] backed by SQLite through sqlx.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    clock: SharedClock,
}

impl SqliteStore {
    /// Open (creating if needed) a database file.
    pub async fn open(path: impl AsRef<Path>, clock: SharedClock) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(storage_error)?;
        Self::from_pool(pool, clock).await
    }

    /// A private in-memory database, gone when the store is dropped.
    pub async fn open_in_memory(clock: SharedClock) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // Every connection to :memory: is its own database, so keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(storage_error)?;
        Self::from_pool(pool, clock).await
    }

    /// Wrap an existing pool and bring its schema up to date.
    pub async fn from_pool(pool: SqlitePool, clock: SharedClock) -> Result<Self> {
        run_migrations(&pool).await?;
        Ok(Self { pool, clock })
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn fetch_records(
        &self,
        sql: &str,
        owner: &str,
        extra: Option<&str>,
    ) -> Result<Vec<LocalRecord>> {
        let mut query = sqlx::query_as::<_, StoredRecord>(sql).bind(owner);
        if let Some(extra) = extra {
            query = query.bind(extra);
        }
        query
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?
            .into_iter()
            .map(StoredRecord::into_record)
            .collect()
    }
}

/// Run embedded schema migrations.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn put(&self, mut record: LocalRecord, mode: WriteMode) -> Result<LocalId> {
        stamp(&mut record, mode, self.clock.now_ms());
        let payload = serde_json::to_string(&record.payload)?;

        match record.id {
            None => {
                let done = sqlx::query(
                    r#"
                    INSERT INTO records (
                        remote_id, owner_id, payload, created_at, updated_at,
                        sync_state, pending_action
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(&record.remote_id)
                .bind(&record.owner_id)
                .bind(&payload)
                .bind(record.created_at as i64)
                .bind(record.updated_at as i64)
                .bind(record.sync_state.as_str())
                .bind(record.pending_action.as_str())
                .execute(&self.pool)
                .await
                .map_err(storage_error)?;
                Ok(done.last_insert_rowid())
            }
            Some(id) => {
                let done = sqlx::query(
                    r#"
                    UPDATE records SET
                        remote_id = $1, owner_id = $2, payload = $3, created_at = $4,
                        updated_at = $5, sync_state = $6, pending_action = $7
                    WHERE id = $8
                    "#,
                )
                .bind(&record.remote_id)
                .bind(&record.owner_id)
                .bind(&payload)
                .bind(record.created_at as i64)
                .bind(record.updated_at as i64)
                .bind(record.sync_state.as_str())
                .bind(record.pending_action.as_str())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(storage_error)?;
                if done.rows_affected() == 0 {
                    return Err(Error::RecordNotFound(id));
                }
                Ok(id)
            }
        }
    }

    async fn get(&self, id: LocalId) -> Result<Option<LocalRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = $1");
        sqlx::query_as::<_, StoredRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?
            .map(StoredRecord::into_record)
            .transpose()
    }

    async fn query(&self, owner: &str, filter: RecordFilter) -> Result<Vec<LocalRecord>> {
        let (condition, extra) = match filter {
            RecordFilter::All => ("", None),
            RecordFilter::Pending => ("AND sync_state = $2", Some(SyncState::Pending.as_str())),
            RecordFilter::Synced => ("AND sync_state = $2", Some(SyncState::Synced.as_str())),
            RecordFilter::Visible => (
                "AND pending_action != $2",
                Some(PendingAction::Delete.as_str()),
            ),
        };
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE owner_id = $1 {condition} \
             ORDER BY created_at DESC, id DESC"
        );
        self.fetch_records(&sql, owner, extra).await
    }

    async fn find_by_remote_id(
        &self,
        owner: &str,
        remote_id: &str,
    ) -> Result<Option<LocalRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE owner_id = $1 AND remote_id = $2"
        );
        Ok(self
            .fetch_records(&sql, owner, Some(remote_id))
            .await?
            .into_iter()
            .next())
    }

    async fn mark_synced(
        &self,
        pushed: &LocalRecord,
        remote_id: Option<&str>,
        remote_updated_at: Option<Timestamp>,
    ) -> Result<Acknowledgement> {
        let id = pushed.local_id()?;
        let payload = serde_json::to_string(&pushed.payload)?;

        let done = sqlx::query(
            r#"
            UPDATE records SET
                remote_id = COALESCE(remote_id, $1),
                updated_at = COALESCE($2, updated_at),
                sync_state = $3,
                pending_action = $4
            WHERE id = $5 AND updated_at = $6 AND pending_action = $7 AND payload = $8
            "#,
        )
        .bind(remote_id)
        .bind(remote_updated_at.map(|ts| ts as i64))
        .bind(SyncState::Synced.as_str())
        .bind(PendingAction::None.as_str())
        .bind(id)
        .bind(pushed.updated_at as i64)
        .bind(pushed.pending_action.as_str())
        .bind(&payload)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        if done.rows_affected() > 0 {
            return Ok(Acknowledgement::Synced);
        }

        // Overtaken by a local write: keep it pending, but remember the remote id.
        let done = sqlx::query(
            r#"
            UPDATE records SET
                remote_id = COALESCE(remote_id, $1),
                pending_action = CASE
                    WHEN pending_action = $2 AND COALESCE(remote_id, $3) IS NOT NULL THEN $4
                    ELSE pending_action
                END
            WHERE id = $5
            "#,
        )
        .bind(remote_id)
        .bind(PendingAction::Create.as_str())
        .bind(remote_id)
        .bind(PendingAction::Update.as_str())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        if done.rows_affected() == 0 {
            return Ok(Acknowledgement::Missing);
        }
        Ok(Acknowledgement::Superseded)
    }

    async fn delete(&self, id: LocalId) -> Result<bool> {
        let done = sqlx::query("DELETE FROM records WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(done.rows_affected() > 0)
    }

    async fn put_settings(&self, owner: &str, settings: serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (owner_id, settings, updated_at, sync_state)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (owner_id) DO UPDATE SET
                settings = excluded.settings,
                updated_at = excluded.updated_at,
                sync_state = excluded.sync_state
            "#,
        )
        .bind(owner)
        .bind(serde_json::to_string(&settings)?)
        .bind(self.clock.now_ms() as i64)
        .bind(SyncState::Pending.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn get_settings(&self, owner: &str) -> Result<Option<UserSettings>> {
        let row = sqlx::query(
            "SELECT owner_id, settings, updated_at, sync_state FROM settings WHERE owner_id = $1",
        )
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let raw_state: String = row.try_get("sync_state").map_err(storage_error)?;
        let raw_settings: String = row.try_get("settings").map_err(storage_error)?;
        let updated_at: i64 = row.try_get("updated_at").map_err(storage_error)?;
        Ok(Some(UserSettings {
            owner_id: row.try_get("owner_id").map_err(storage_error)?,
            settings: serde_json::from_str(&raw_settings)?,
            updated_at: updated_at as Timestamp,
            sync_state: SyncState::parse(&raw_state)
                .ok_or_else(|| corrupt(format!("unknown sync state {raw_state:?}")))?,
        }))
    }

    async fn put_cache_entry(
        &self,
        key: &str,
        payload: serde_json::Value,
        ttl: Duration,
    ) -> Result<()> {
        let now = self.clock.now_ms();
        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, payload, inserted_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key) DO UPDATE SET
                payload = excluded.payload,
                inserted_at = excluded.inserted_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(serde_json::to_string(&payload)?)
        .bind(now as i64)
        .bind(add_duration(now, ttl) as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn get_cache_entry(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT payload, expires_at FROM cache_entries WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_error)?;

        match row {
            Some((payload, expires_at)) if (expires_at as Timestamp) > self.clock.now_ms() => {
                Ok(Some(serde_json::from_str(&payload)?))
            }
            Some(_) => {
                sqlx::query("DELETE FROM cache_entries WHERE key = $1")
                    .bind(key)
                    .execute(&self.pool)
                    .await
                    .map_err(storage_error)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn purge_expired_cache(&self) -> Result<usize> {
        let done = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= $1")
            .bind(self.clock.now_ms() as i64)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(done.rows_affected() as usize)
    }

    async fn clear_all(&self) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        for table in ["records", "settings", "cache_entries"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
        }
        tx.commit().await.map_err(storage_error)?;
        Ok(())
    }

    async fn usage(&self) -> Result<StorageUsage> {
        let (records, settings, cache_entries): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM records),
                (SELECT COUNT(*) FROM settings),
                (SELECT COUNT(*) FROM cache_entries)
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(StorageUsage::new(
            records as usize,
            settings as usize,
            cache_entries as usize,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, TimeSource};
    use serde_json::json;
    use std::sync::Arc;

    async fn store() -> (Arc<ManualClock>, SqliteStore) {
        let (handle, clock) = ManualClock::shared(1_000);
        (handle, SqliteStore::open_in_memory(clock).await.unwrap())
    }

    #[tokio::test]
    async fn insert_get_update() {
        let (clock, store) = store().await;
        let id = store
            .put(
                LocalRecord::new_local("u1", json!({"title": "日記"}), 1_000),
                WriteMode::Local,
            )
            .await
            .unwrap();

        let mut record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.payload["title"], "日記");
        assert_eq!(record.pending_action, PendingAction::Create);

        clock.advance(Duration::from_secs(5));
        record.payload = json!({"title": "edited"});
        store.put(record, WriteMode::Local).await.unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.payload["title"], "edited");
        assert_eq!(record.updated_at, 6_000);
        assert!(store.get(id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pending_query_and_ordering() {
        let (_, store) = store().await;
        for created in [3, 1, 2] {
            store
                .put(LocalRecord::new_local("u1", json!({}), created), WriteMode::Local)
                .await
                .unwrap();
        }
        store
            .put(LocalRecord::new_local("u1", json!({}), 9), WriteMode::Synced)
            .await
            .unwrap();

        let pending = store.query("u1", RecordFilter::Pending).await.unwrap();
        let created: Vec<_> = pending.iter().map(|r| r.created_at).collect();
        assert_eq!(created, vec![3, 2, 1]);
        assert_eq!(store.query("u1", RecordFilter::Synced).await.unwrap().len(), 1);
        assert!(store.query("u2", RecordFilter::All).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_synced_keeps_first_remote_id() {
        let (_, store) = store().await;
        let id = store
            .put(LocalRecord::new_local("u1", json!({}), 1), WriteMode::Local)
            .await
            .unwrap();
        let pushed = store.get(id).await.unwrap().unwrap();
        let ack = store.mark_synced(&pushed, Some("r-1"), Some(777)).await.unwrap();
        assert_eq!(ack, Acknowledgement::Synced);
        let pushed = store.get(id).await.unwrap().unwrap();
        store.mark_synced(&pushed, Some("r-2"), None).await.unwrap();

        let record = store.find_by_remote_id("u1", "r-1").await.unwrap().unwrap();
        assert_eq!(record.id, Some(id));
        assert_eq!(record.updated_at, 777);
        assert_eq!(record.sync_state, SyncState::Synced);

        let mut gone = record.clone();
        gone.id = Some(99);
        let ack = store.mark_synced(&gone, None, None).await.unwrap();
        assert_eq!(ack, Acknowledgement::Missing);
    }

    #[tokio::test]
    async fn mark_synced_skips_rows_edited_since_push() {
        let (clock, store) = store().await;
        let id = store
            .put(LocalRecord::new_local("u1", json!({"v": 1}), 1), WriteMode::Local)
            .await
            .unwrap();
        let pushed = store.get(id).await.unwrap().unwrap();

        // Same millisecond, different payload.
        let mut edited = pushed.clone();
        edited.update_payload(json!({"v": 2}), clock.now_ms()).unwrap();
        store.put(edited, WriteMode::Local).await.unwrap();

        let ack = store.mark_synced(&pushed, Some("r-1"), Some(900)).await.unwrap();
        assert_eq!(ack, Acknowledgement::Superseded);
        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.remote_id.as_deref(), Some("r-1"));
        assert_eq!(record.payload, json!({"v": 2}));
        assert_eq!(record.sync_state, SyncState::Pending);
        assert_eq!(record.pending_action, PendingAction::Update);
        assert_ne!(record.updated_at, 900);
    }

    #[tokio::test]
    async fn visible_filter_hides_tombstones() {
        let (_, store) = store().await;
        let mut record = LocalRecord::new_local("u1", json!({}), 1);
        record.remote_id = Some("r-1".into());
        record.mark_deleted(2);
        store.put(record, WriteMode::Local).await.unwrap();
        store
            .put(LocalRecord::new_local("u1", json!({}), 3), WriteMode::Local)
            .await
            .unwrap();

        assert_eq!(store.query("u1", RecordFilter::Visible).await.unwrap().len(), 1);
        assert_eq!(store.query("u1", RecordFilter::All).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn settings_upsert() {
        let (_, store) = store().await;
        store.put_settings("u1", json!({"theme": "dark"})).await.unwrap();
        store.put_settings("u1", json!({"theme": "light"})).await.unwrap();
        let settings = store.get_settings("u1").await.unwrap().unwrap();
        assert_eq!(settings.settings["theme"], "light");
        assert_eq!(store.usage().await.unwrap().settings, 1);
    }

    #[tokio::test]
    async fn cache_entries_expire() {
        let (clock, store) = store().await;
        store
            .put_cache_entry("a", json!({"n": 1}), Duration::from_secs(10))
            .await
            .unwrap();
        store
            .put_cache_entry("b", json!({"n": 2}), Duration::from_secs(100))
            .await
            .unwrap();
        assert_eq!(store.get_cache_entry("a").await.unwrap(), Some(json!({"n": 1})));

        clock.advance(Duration::from_secs(10));
        assert_eq!(store.get_cache_entry("a").await.unwrap(), None);
        assert_eq!(store.usage().await.unwrap().cache_entries, 1);

        clock.advance(Duration::from_secs(100));
        assert_eq!(store.purge_expired_cache().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn clear_all_empties_tables() {
        let (_, store) = store().await;
        store
            .put(LocalRecord::new_local("u1", json!({}), 1), WriteMode::Local)
            .await
            .unwrap();
        store.put_settings("u1", json!({})).await.unwrap();
        store
            .put_cache_entry("k", json!(1), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(store.usage().await.unwrap().total, 3);

        store.clear_all().await.unwrap();
        assert_eq!(store.usage().await.unwrap(), StorageUsage::default());
    }

    #[tokio::test]
    async fn closed_pool_is_unavailable() {
        let (_, store) = store().await;
        store.close().await;
        let err = store.query("u1", RecordFilter::Pending).await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)), "{err:?}");
    }

    #[tokio::test]
    async fn survives_reopen() {
        let path = std::env::temp_dir().join(format!(
            "offsync-reopen-{}-{}.db",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let (_, clock) = ManualClock::shared(1_000);

        let store = SqliteStore::open(&path, clock.clone()).await.unwrap();
        let id = store
            .put(LocalRecord::new_local("u1", json!({"keep": true}), 1), WriteMode::Local)
            .await
            .unwrap();
        store.close().await;

        let reopened = SqliteStore::open(&path, clock).await.unwrap();
        let record = reopened.get(id).await.unwrap().unwrap();
        assert_eq!(record.payload["keep"], true);
        assert!(record.is_pending());
        reopened.close().await;

        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}
